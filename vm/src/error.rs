//! Errors from driver-level operations.
//!
//! These are Rust errors for misusing the library surface. Failures *inside*
//! a simulated run are never errors; they are [`skein_types::Failure`]
//! values reified into the run outcome.

/// Errors from VM driver operations.
#[derive(Debug, thiserror::Error)]
pub enum VMError {
    /// The configuration requested zero capabilities.
    #[error("invalid capability count: {n}")]
    InvalidCapabilities {
        /// Requested capability count.
        n: usize,
    },
    /// A serialized trace could not be decoded.
    #[error("trace decode error: {0}")]
    TraceDecode(#[from] serde_json::Error),
}
