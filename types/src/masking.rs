//! Asynchronous-exception masking states.

use serde::{Deserialize, Serialize};

/// How a thread responds to asynchronous exception delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskingState {
    /// Deliveries land at any time.
    #[default]
    Unmasked,
    /// Deliveries land only while the thread is blocked.
    MaskedInterruptible,
    /// Deliveries never land.
    MaskedUninterruptible,
}

impl MaskingState {
    /// Whether a thread in this state can receive an asynchronous
    /// exception, given whether it is currently blocked.
    #[must_use]
    pub fn interruptible(self, blocked: bool) -> bool {
        match self {
            MaskingState::Unmasked => true,
            MaskingState::MaskedInterruptible => blocked,
            MaskingState::MaskedUninterruptible => false,
        }
    }
}
