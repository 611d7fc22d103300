//! Memory models for mutable-cell writes.

use serde::{Deserialize, Serialize};

/// Visibility discipline for mutable-cell writes.
///
/// Under the relaxed models, plain writes park in per-thread FIFO buffers
/// and become visible to other threads only when a commit pseudo-thread
/// publishes them; the scheduler chooses when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemoryModel {
    /// Writes are published immediately.
    SequentialConsistency,
    /// One write FIFO per thread, shared by all cells.
    #[default]
    TotalStoreOrder,
    /// One write FIFO per (thread, cell) pair.
    PartialStoreOrder,
}
