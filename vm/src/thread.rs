//! The thread table: per-thread state and block/wake/kill operations.
//!
//! A thread is its continuation (the next action), an optional blocked-on
//! reason, an exception-handler stack, and a masking state. Blocking never
//! advances the continuation: a woken thread re-executes the same action,
//! so "wake everyone, let the scheduler pick the winner, losers re-block"
//! falls out for free.

use std::collections::{BTreeMap, BTreeSet};

use skein_types::{MVarId, MaskingState, TVarId, ThreadId};

use crate::action::{Action, Exception};

/// Why a thread is blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BlockedOn {
    /// Waiting for a blocking cell to become full (take/read).
    MVarFull(MVarId),
    /// Waiting for a blocking cell to become empty (put).
    MVarEmpty(MVarId),
    /// Waiting for any var in the set to be written (transactional retry).
    TVars(BTreeSet<TVarId>),
    /// Waiting for a thread to become interruptible (exception delivery).
    Mask(ThreadId),
}

/// One pushed exception handler.
pub(crate) struct HandlerEntry {
    /// Which exceptions this handler accepts.
    pub(crate) matches: Box<dyn Fn(&Exception) -> bool>,
    /// Continuation run with the caught exception.
    pub(crate) run: Box<dyn FnOnce(Exception) -> Action>,
}

/// A live thread.
pub(crate) struct Thread {
    /// What to do next. `None` only transiently while a step executes.
    pub(crate) continuation: Option<Action>,
    /// Why the thread is blocked, if it is.
    pub(crate) blocked_on: Option<BlockedOn>,
    /// Exception handler stack, innermost last.
    pub(crate) handlers: Vec<HandlerEntry>,
    /// Current masking state.
    pub(crate) masking: MaskingState,
}

impl Thread {
    fn new(action: Action, masking: MaskingState) -> Self {
        Self {
            continuation: Some(action),
            blocked_on: None,
            handlers: Vec::new(),
            masking,
        }
    }

    pub(crate) fn runnable(&self) -> bool {
        self.blocked_on.is_none()
    }
}

/// Outcome of raising an exception in a thread.
pub(crate) enum Raised {
    /// A handler accepted it; the thread continues there.
    Caught,
    /// No handler matched; the thread must be killed (or, for the main
    /// thread, the run ends with an uncaught exception).
    Unhandled,
}

/// All live threads of one interpreter, keyed by ascending id.
#[derive(Default)]
pub(crate) struct Threads {
    map: BTreeMap<ThreadId, Thread>,
}

impl Threads {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Install the main thread of an interpreter.
    pub(crate) fn install_main(&mut self, action: Action, masking: MaskingState) {
        self.map.insert(ThreadId::MAIN, Thread::new(action, masking));
    }

    /// Create a thread inheriting the parent's masking state.
    pub(crate) fn launch(&mut self, parent: &ThreadId, tid: ThreadId, action: Action) {
        let masking = self
            .map
            .get(parent)
            .map_or(MaskingState::Unmasked, |t| t.masking);
        self.map.insert(tid, Thread::new(action, masking));
    }

    pub(crate) fn contains(&self, tid: &ThreadId) -> bool {
        self.map.contains_key(tid)
    }

    pub(crate) fn get(&self, tid: &ThreadId) -> Option<&Thread> {
        self.map.get(tid)
    }

    pub(crate) fn get_mut(&mut self, tid: &ThreadId) -> Option<&mut Thread> {
        self.map.get_mut(tid)
    }

    /// Remove a thread outright. Callers wake `Mask` waiters themselves:
    /// a dead target is trivially deliverable.
    pub(crate) fn kill(&mut self, tid: &ThreadId) {
        self.map.remove(tid);
    }

    /// Replace a thread's continuation.
    pub(crate) fn goto(&mut self, tid: &ThreadId, action: Action) {
        if let Some(thread) = self.map.get_mut(tid) {
            thread.continuation = Some(action);
        }
    }

    /// Block a thread. Waking `Mask` waiters on it is the caller's job:
    /// blocking can make a masked-interruptible target deliverable.
    pub(crate) fn block(&mut self, tid: &ThreadId, reason: BlockedOn) {
        if let Some(thread) = self.map.get_mut(tid) {
            thread.blocked_on = Some(reason);
        }
    }

    /// Unblock every thread whose reason matches, in ascending id order.
    ///
    /// `TVars` wakes on any intersection with the written set; the other
    /// reasons match exactly.
    pub(crate) fn wake(&mut self, reason: &BlockedOn) -> Vec<ThreadId> {
        let mut woken = Vec::new();
        for (tid, thread) in &mut self.map {
            let matches = match (&thread.blocked_on, reason) {
                (Some(BlockedOn::TVars(waiting)), BlockedOn::TVars(written)) => {
                    !waiting.is_disjoint(written)
                }
                (Some(blocked), wanted) => blocked == wanted,
                (None, _) => false,
            };
            if matches {
                thread.blocked_on = None;
                woken.push(tid.clone());
            }
        }
        woken
    }

    /// Runnable thread ids in ascending order.
    pub(crate) fn runnable(&self) -> Vec<ThreadId> {
        self.map
            .iter()
            .filter(|(_, t)| t.runnable())
            .map(|(tid, _)| tid.clone())
            .collect()
    }

    /// Whether any thread matching the predicate is blocked on a
    /// transactional retry.
    pub(crate) fn any_blocked_on_stm(&self, skip_main: bool) -> bool {
        self.map.iter().any(|(tid, t)| {
            (!skip_main || !tid.is_main()) && matches!(t.blocked_on, Some(BlockedOn::TVars(_)))
        })
    }

    /// Raise an exception in a thread: pop handlers to the first match and
    /// continue there. The thread is unblocked as part of delivery.
    pub(crate) fn raise(&mut self, tid: &ThreadId, exc: Exception) -> Raised {
        let Some(thread) = self.map.get_mut(tid) else {
            return Raised::Unhandled;
        };
        while let Some(entry) = thread.handlers.pop() {
            if (entry.matches)(&exc) {
                thread.continuation = Some((entry.run)(exc));
                thread.blocked_on = None;
                return Raised::Caught;
            }
        }
        Raised::Unhandled
    }
}
