//! The closed failure taxonomy for a run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a run ended without producing a value.
///
/// These are ordinary return values of the driver, not Rust errors:
/// a scheduler exploring many interleavings treats each as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    /// The interpreter reached a state it believes impossible, or the
    /// program violated a structural contract (foreign cell id, nested
    /// sub-computation, main thread stopping without a result).
    InternalError,
    /// The scheduler picked a blocked or nonexistent thread, returned
    /// its stop sentinel, or the step limit was exhausted.
    Abort,
    /// Every thread is blocked and none is blocked on a transaction.
    Deadlock,
    /// Every thread is blocked and a non-main thread is blocked on a
    /// transactional retry.
    STMDeadlock,
    /// An exception escaped the main thread's handler stack.
    UncaughtException,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::InternalError => write!(f, "internal error"),
            Failure::Abort => write!(f, "aborted"),
            Failure::Deadlock => write!(f, "deadlock"),
            Failure::STMDeadlock => write!(f, "STM deadlock"),
            Failure::UncaughtException => write!(f, "uncaught exception"),
        }
    }
}

impl std::error::Error for Failure {}
