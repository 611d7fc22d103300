//! Trace vocabulary: scheduling decisions, executed actions, lookaheads.
//!
//! A run's trace is the canonical record of what happened: one entry per
//! interpreter step, carrying the scheduling decision, the narrowed form of
//! the action that executed (including every id it touched and every thread
//! it woke), and the lookahead of whatever that thread would do next. Traces
//! are plain data: serializable, comparable, replayable.

use serde::{Deserialize, Serialize};
use skein_types::{MRefId, MVarId, MaskingState, ThreadId};

use crate::error::VMError;
use crate::stm::TAction;

/// Which thread the loop picked, relative to the previous step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// First step of this thread.
    Start(ThreadId),
    /// Same thread as the previous step.
    Continue,
    /// A different, already-started thread.
    SwitchTo(ThreadId),
}

/// Narrowed form of the next action of a thread, for logging and for
/// schedulers that peek ahead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lookahead {
    /// Will create a thread.
    WillFork,
    /// Will read its own thread id.
    WillMyThreadId,
    /// Will read the capability count.
    WillGetNumCapabilities,
    /// Will set the capability count.
    WillSetNumCapabilities(usize),
    /// Will yield.
    WillYield,
    /// Will take an explicit no-op step.
    WillReturn,
    /// Will run a lifted host effect.
    WillLift,
    /// Will create a blocking cell.
    WillNewMVar,
    /// Will put into a blocking cell.
    WillPut(MVarId),
    /// Will try to put into a blocking cell.
    WillTryPut(MVarId),
    /// Will take from a blocking cell.
    WillTake(MVarId),
    /// Will try to take from a blocking cell.
    WillTryTake(MVarId),
    /// Will read a blocking cell.
    WillRead(MVarId),
    /// Will try to read a blocking cell.
    WillTryRead(MVarId),
    /// Will create a mutable cell.
    WillNewMRef,
    /// Will read a mutable cell.
    WillReadMRef(MRefId),
    /// Will write a mutable cell.
    WillWriteMRef(MRefId),
    /// Will atomically modify a mutable cell.
    WillModifyMRef(MRefId),
    /// Will compare-and-swap a mutable cell.
    WillCasMRef(MRefId),
    /// Will snapshot a mutable cell for compare-and-swap.
    WillReadForCas(MRefId),
    /// Will publish a pending write for the given thread and cell.
    WillCommitMRef(ThreadId, MRefId),
    /// Will run a transaction.
    WillAtomically,
    /// Will raise an exception in itself.
    WillThrow,
    /// Will deliver an exception to the given thread.
    WillThrowTo(ThreadId),
    /// Will push an exception handler.
    WillCatching,
    /// Will pop an exception handler.
    WillPopCatching,
    /// Will transition its masking state.
    WillSetMasking(bool, MaskingState),
    /// Will restore its masking state.
    WillResetMasking(bool, MaskingState),
    /// Will run a nested interpreter.
    WillSubconcurrency,
    /// Will terminate.
    WillStop,
}

/// What one interpreter step did.
///
/// Variants record the ids touched and, where an operation can unblock
/// other threads, the set of woken thread ids in ascending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThreadAction {
    /// Created a thread with this id.
    Fork(ThreadId),
    /// Read its own thread id.
    MyThreadId,
    /// Read the capability count.
    GetNumCapabilities(usize),
    /// Set the capability count.
    SetNumCapabilities(usize),
    /// Yielded.
    Yield,
    /// Took an explicit no-op step.
    Return,
    /// Ran a lifted host effect.
    Lift,
    /// Created a blocking cell.
    NewMVar(MVarId),
    /// Put into a blocking cell, waking these threads.
    Put(MVarId, Vec<ThreadId>),
    /// Blocked trying to put.
    BlockedPut(MVarId),
    /// Tried to put; flag says whether it stored.
    TryPut(MVarId, bool, Vec<ThreadId>),
    /// Took from a blocking cell, waking these threads.
    Take(MVarId, Vec<ThreadId>),
    /// Blocked trying to take.
    BlockedTake(MVarId),
    /// Tried to take; flag says whether a value was there.
    TryTake(MVarId, bool, Vec<ThreadId>),
    /// Read a blocking cell.
    Read(MVarId),
    /// Blocked trying to read.
    BlockedRead(MVarId),
    /// Tried to read; flag says whether a value was there.
    TryRead(MVarId, bool),
    /// Created a mutable cell.
    NewMRef(MRefId),
    /// Read a mutable cell.
    ReadMRef(MRefId),
    /// Wrote a mutable cell (committed or buffered per the model).
    WriteMRef(MRefId),
    /// Atomically modified a mutable cell.
    ModifyMRef(MRefId),
    /// Compare-and-swapped a mutable cell; flag says whether it won.
    CasMRef(MRefId, bool),
    /// Snapshot a mutable cell for compare-and-swap.
    ReadForCas(MRefId),
    /// Published the oldest pending write of (thread, cell).
    CommitMRef(ThreadId, MRefId),
    /// Committed a transaction, waking these threads.
    STM(Vec<TAction>, Vec<ThreadId>),
    /// Transaction retried; thread blocked on its read set.
    BlockedSTM(Vec<TAction>),
    /// Transaction aborted with an exception, raised in the thread.
    ThrownSTM(Vec<TAction>),
    /// Raised an exception in itself.
    Throw,
    /// Delivered an exception to a thread, waking these threads.
    ThrowTo(ThreadId, Vec<ThreadId>),
    /// Blocked delivering to an uninterruptible thread.
    BlockedThrowTo(ThreadId),
    /// Pushed an exception handler.
    Catching,
    /// Popped an exception handler.
    PopCatching,
    /// Transitioned masking state (flag: done by a restore capability).
    SetMasking(bool, MaskingState),
    /// Restored masking state (flag: done by a restore capability).
    ResetMasking(bool, MaskingState),
    /// Entered a nested interpreter.
    StartSubconcurrency,
    /// Left a nested interpreter.
    StopSubconcurrency,
    /// Terminated.
    Stop,
}

/// One step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// The scheduling decision for this step.
    pub decision: Decision,
    /// What the chosen thread did.
    pub action: ThreadAction,
    /// What that thread would do next, if it is still alive.
    pub next: Option<Lookahead>,
}

/// A full run trace in execution order.
pub type Trace = Vec<TraceEntry>;

/// Serialize a trace to a JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn trace_to_json(trace: &[TraceEntry]) -> Result<String, VMError> {
    Ok(serde_json::to_string(trace)?)
}

/// Decode a trace from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is not a valid trace.
pub fn trace_from_json(json: &str) -> Result<Trace, VMError> {
    Ok(serde_json::from_str(json)?)
}

/// The thread stepped by each entry, reconstructed from the decisions.
#[must_use]
pub fn thread_per_entry(trace: &[TraceEntry]) -> Vec<ThreadId> {
    let mut out = Vec::with_capacity(trace.len());
    let mut current = ThreadId::MAIN;
    for entry in trace {
        match &entry.decision {
            Decision::Start(tid) | Decision::SwitchTo(tid) => current = tid.clone(),
            Decision::Continue => {}
        }
        out.push(current.clone());
    }
    out
}

/// Count preemptive context switches in a trace.
///
/// A switch is preemptive when the interrupted thread had not just yielded.
/// Switches *to* a commit pseudo-thread are transparent, and a switch *from*
/// a commit pseudo-thread counts only if it lands on a thread other than the
/// one the commit run interrupted.
#[must_use]
pub fn preemption_count(trace: &[TraceEntry]) -> usize {
    let tids = thread_per_entry(trace);
    let mut count = 0;
    for (i, entry) in trace.iter().enumerate() {
        let target = match &entry.decision {
            Decision::SwitchTo(t) | Decision::Start(t) if i > 0 => t,
            _ => continue,
        };
        if target.is_commit() {
            continue;
        }
        // Last step on a user thread before this one.
        let Some(j) = (0..i).rev().find(|&j| !tids[j].is_commit()) else {
            continue;
        };
        if tids[j] == *target {
            continue;
        }
        if matches!(trace[j].action, ThreadAction::Yield) {
            continue;
        }
        count += 1;
    }
    count
}
