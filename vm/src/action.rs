//! The action algebra: what a suspended thread exposes to the interpreter.
//!
//! A user program is a tree of action nodes. Each non-terminal node carries
//! its continuation as a boxed closure typed by the primitive's result, so
//! the tree is a defunctionalised CPS encoding: the interpreter executes the
//! root node of a thread, invokes the continuation with the result, and the
//! closure yields the next root. Nothing beyond the current root is ever
//! forced, which keeps recursive programs finite per step.
//!
//! Nodes are built by the combinators in [`crate::program`]; the interpreter
//! in [`crate::vm`] pattern-matches here and nowhere deeper.

use serde::{Deserialize, Serialize};
use skein_types::{Failure, MRefId, MVarId, MaskingState, ThreadId, Value};

use crate::mref::Ticket;
use crate::program::Restore;
use crate::stm::Stm;
use crate::trace::Lookahead;

/// Continuation taking the primitive's result to the next action.
pub type Cont<T> = Box<dyn FnOnce(T) -> Action>;

/// Continuation for result-less primitives.
pub type Thunk = Box<dyn FnOnce() -> Action>;

/// A user-thrown exception: a type tag plus a dynamic payload.
///
/// Handlers select on the tag (or any predicate over the whole value); the
/// payload travels to whichever handler accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    /// Type tag used for handler matching.
    pub tag: String,
    /// Payload carried to the handler.
    pub payload: Value,
}

impl Exception {
    /// An exception with a tag and no payload.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            payload: Value::Unit,
        }
    }

    /// An exception carrying a payload.
    #[must_use]
    pub fn with_payload(tag: impl Into<String>, payload: Value) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }
}

/// Result of forcing a sub-computation node: the nested interpreter's
/// initial action plus the closure resuming the outer thread with the
/// reified outcome.
pub struct SubSpawn {
    /// Initial action of the nested interpreter's main thread.
    pub action: Action,
    /// Builds the outer thread's next action from the nested outcome
    /// (`None` means the nested run succeeded).
    pub finish: Box<dyn FnOnce(Option<Failure>) -> Action>,
}

/// One primitive operation plus its continuation.
pub enum Action {
    /// Create a thread running `child`; continue with its id.
    Fork {
        /// Optional label for the new thread's id.
        name: Option<String>,
        /// The child thread's initial action.
        child: Box<Action>,
        /// Parent continuation.
        k: Cont<ThreadId>,
    },
    /// Continue with the executing thread's own id.
    MyThreadId {
        /// Continuation.
        k: Cont<ThreadId>,
    },
    /// Continue with the capability count.
    GetCaps {
        /// Continuation.
        k: Cont<usize>,
    },
    /// Set the capability count.
    SetCaps {
        /// New capability count.
        n: usize,
        /// Continuation.
        k: Thunk,
    },
    /// Cooperative reschedule hint; a no-op step the scheduler observes.
    Yield {
        /// Continuation.
        k: Thunk,
    },
    /// Explicit no-op step.
    Return {
        /// Continuation.
        k: Thunk,
    },
    /// Run an opaque host effect atomically and continue with its next
    /// action (the effect closure already embeds the continuation).
    Lift {
        /// The effect; yields the next action.
        effect: Thunk,
    },
    /// Create an empty blocking cell.
    NewMVar {
        /// Optional label for the cell id.
        name: Option<String>,
        /// Continuation.
        k: Cont<MVarId>,
    },
    /// Put into a blocking cell; blocks while full.
    PutMVar {
        /// Target cell.
        mvar: MVarId,
        /// Value to store.
        value: Value,
        /// Continuation.
        k: Thunk,
    },
    /// Non-blocking put; continues with whether it stored.
    TryPutMVar {
        /// Target cell.
        mvar: MVarId,
        /// Value to store.
        value: Value,
        /// Continuation.
        k: Cont<bool>,
    },
    /// Take from a blocking cell, emptying it; blocks while empty.
    TakeMVar {
        /// Target cell.
        mvar: MVarId,
        /// Continuation.
        k: Cont<Value>,
    },
    /// Non-blocking take.
    TryTakeMVar {
        /// Target cell.
        mvar: MVarId,
        /// Continuation.
        k: Cont<Option<Value>>,
    },
    /// Read a blocking cell without emptying it; blocks while empty.
    ReadMVar {
        /// Target cell.
        mvar: MVarId,
        /// Continuation.
        k: Cont<Value>,
    },
    /// Non-blocking read.
    TryReadMVar {
        /// Target cell.
        mvar: MVarId,
        /// Continuation.
        k: Cont<Option<Value>>,
    },
    /// Create a mutable cell.
    NewMRef {
        /// Optional label for the cell id.
        name: Option<String>,
        /// Initial value.
        init: Value,
        /// Continuation.
        k: Cont<MRefId>,
    },
    /// Read a mutable cell (sees the thread's own pending writes).
    ReadMRef {
        /// Target cell.
        mref: MRefId,
        /// Continuation.
        k: Cont<Value>,
    },
    /// Write a mutable cell under the configured memory model.
    WriteMRef {
        /// Target cell.
        mref: MRefId,
        /// Value to write.
        value: Value,
        /// Continuation.
        k: Thunk,
    },
    /// Atomic read-modify-write; flushes the thread's pending writes.
    ModifyMRef {
        /// Target cell.
        mref: MRefId,
        /// Computes (new cell value, value passed to the continuation).
        f: Box<dyn FnOnce(Value) -> (Value, Value)>,
        /// Continuation.
        k: Cont<Value>,
    },
    /// Compare-and-swap against a ticket; flushes pending writes first.
    CasMRef {
        /// Target cell.
        mref: MRefId,
        /// Ticket from a prior [`Action::ReadForCas`].
        ticket: Ticket,
        /// Replacement value.
        value: Value,
        /// Continuation: success flag and a fresh ticket.
        k: Cont<(bool, Ticket)>,
    },
    /// Snapshot a mutable cell for a later compare-and-swap.
    ReadForCas {
        /// Target cell.
        mref: MRefId,
        /// Continuation.
        k: Cont<Ticket>,
    },
    /// Run a transaction to completion in one step.
    Atomically {
        /// The transaction (re-runnable: a blocked retry re-executes it).
        tx: Stm,
        /// Continuation with the committed result.
        k: Cont<Value>,
    },
    /// Raise an exception in the executing thread.
    Throw {
        /// The exception.
        exc: Exception,
    },
    /// Deliver an exception to another thread; blocks until the target is
    /// interruptible.
    ThrowTo {
        /// Target thread.
        target: ThreadId,
        /// The exception.
        exc: Exception,
        /// Sender continuation, run once delivery completes.
        k: Thunk,
    },
    /// Push an exception handler, then run `body`.
    Catching {
        /// Which exceptions this handler accepts.
        matches: Box<dyn Fn(&Exception) -> bool>,
        /// Handler continuation, invoked with the caught exception.
        handler: Box<dyn FnOnce(Exception) -> Action>,
        /// Protected body.
        body: Box<Action>,
    },
    /// Pop the innermost handler (normal exit of a protected body).
    PopCatching {
        /// Continuation.
        k: Thunk,
    },
    /// Enter a masking scope: set the masking state and run the body with
    /// a restore capability for the saved outer state.
    Mask {
        /// Masking state inside the scope.
        mask: MaskingState,
        /// Body builder; receives the restore capability.
        body: Box<dyn FnOnce(Restore) -> Action>,
    },
    /// Explicit masking transition entering a restored scope.
    SetMasking {
        /// Whether a restore capability performed the transition.
        outer: bool,
        /// New masking state.
        mask: MaskingState,
        /// Continuation.
        k: Thunk,
    },
    /// Explicit masking transition leaving a scope.
    ResetMasking {
        /// Whether a restore capability performed the transition.
        outer: bool,
        /// New masking state.
        mask: MaskingState,
        /// Continuation.
        k: Thunk,
    },
    /// Run a nested interpreter whose failure is reified as a value.
    Subconcurrency {
        /// Forces the nested main action and the resume closure.
        spawn: Box<dyn FnOnce() -> SubSpawn>,
    },
    /// Terminate the executing thread.
    Stop,
}

impl Action {
    /// The logging-friendly narrowing of this node, recorded in trace
    /// entries as "what this thread does next".
    ///
    /// A single shallow match: continuations are never forced.
    #[must_use]
    pub fn lookahead(&self) -> Lookahead {
        match self {
            Action::Fork { .. } => Lookahead::WillFork,
            Action::MyThreadId { .. } => Lookahead::WillMyThreadId,
            Action::GetCaps { .. } => Lookahead::WillGetNumCapabilities,
            Action::SetCaps { n, .. } => Lookahead::WillSetNumCapabilities(*n),
            Action::Yield { .. } => Lookahead::WillYield,
            Action::Return { .. } => Lookahead::WillReturn,
            Action::Lift { .. } => Lookahead::WillLift,
            Action::NewMVar { .. } => Lookahead::WillNewMVar,
            Action::PutMVar { mvar, .. } => Lookahead::WillPut(mvar.clone()),
            Action::TryPutMVar { mvar, .. } => Lookahead::WillTryPut(mvar.clone()),
            Action::TakeMVar { mvar, .. } => Lookahead::WillTake(mvar.clone()),
            Action::TryTakeMVar { mvar, .. } => Lookahead::WillTryTake(mvar.clone()),
            Action::ReadMVar { mvar, .. } => Lookahead::WillRead(mvar.clone()),
            Action::TryReadMVar { mvar, .. } => Lookahead::WillTryRead(mvar.clone()),
            Action::NewMRef { .. } => Lookahead::WillNewMRef,
            Action::ReadMRef { mref, .. } => Lookahead::WillReadMRef(mref.clone()),
            Action::WriteMRef { mref, .. } => Lookahead::WillWriteMRef(mref.clone()),
            Action::ModifyMRef { mref, .. } => Lookahead::WillModifyMRef(mref.clone()),
            Action::CasMRef { mref, .. } => Lookahead::WillCasMRef(mref.clone()),
            Action::ReadForCas { mref, .. } => Lookahead::WillReadForCas(mref.clone()),
            Action::Atomically { .. } => Lookahead::WillAtomically,
            Action::Throw { .. } => Lookahead::WillThrow,
            Action::ThrowTo { target, .. } => Lookahead::WillThrowTo(target.clone()),
            Action::Catching { .. } => Lookahead::WillCatching,
            Action::PopCatching { .. } => Lookahead::WillPopCatching,
            Action::Mask { mask, .. } => Lookahead::WillSetMasking(false, *mask),
            Action::SetMasking { outer, mask, .. } => Lookahead::WillSetMasking(*outer, *mask),
            Action::ResetMasking { outer, mask, .. } => Lookahead::WillResetMasking(*outer, *mask),
            Action::Subconcurrency { .. } => Lookahead::WillSubconcurrency,
            Action::Stop => Lookahead::WillStop,
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Action({:?})", self.lookahead())
    }
}
