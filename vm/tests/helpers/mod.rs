//! Shared helpers for integration tests.

use skein_types::{IdSource, MRefId, MVarId, ThreadId};
use skein_vm::trace::{ThreadAction, TraceEntry};

/// The thread id a run will assign to the `n`-th forked thread (1-based).
///
/// Thread identity lives in the integer, so minting from a throwaway
/// source produces ids equal to the run's.
pub fn tid(n: usize) -> ThreadId {
    let mut src = IdSource::new();
    let mut last = ThreadId::MAIN;
    for _ in 0..n {
        last = src.next_thread(None);
    }
    last
}

/// The id a run will assign to its `n`-th blocking cell (0-based).
pub fn mvar(n: usize) -> MVarId {
    let mut src = IdSource::new();
    let mut last = src.next_mvar(None);
    for _ in 0..n {
        last = src.next_mvar(None);
    }
    last
}

/// The id a run will assign to its `n`-th mutable cell (0-based).
pub fn mref(n: usize) -> MRefId {
    let mut src = IdSource::new();
    let mut last = src.next_mref(None);
    for _ in 0..n {
        last = src.next_mref(None);
    }
    last
}

/// The actions of a trace, discarding decisions and lookaheads.
pub fn actions(trace: &[TraceEntry]) -> Vec<ThreadAction> {
    trace.iter().map(|e| e.action.clone()).collect()
}

/// Whether the trace contains this exact action.
pub fn has_action(trace: &[TraceEntry], wanted: &ThreadAction) -> bool {
    trace.iter().any(|e| e.action == *wanted)
}
