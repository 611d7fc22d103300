//! Blocking single-slot cells.
//!
//! An MVar holds at most one value. Puts block while it is full, takes and
//! reads block while it is empty; waiter bookkeeping lives in the thread
//! table, not here, so the store is nothing but slot state. All wake and
//! retry behavior is in the interpreter loop.

use std::collections::BTreeMap;

use skein_types::{Failure, MVarId, RunToken, Value};

/// Slot state of every blocking cell in a run.
#[derive(Debug, Default)]
pub(crate) struct MVarStore {
    slots: BTreeMap<MVarId, Option<Value>>,
    token: RunToken,
}

impl MVarStore {
    pub(crate) fn new(token: RunToken) -> Self {
        Self {
            slots: BTreeMap::new(),
            token,
        }
    }

    /// Register a freshly minted cell, empty.
    pub(crate) fn insert(&mut self, id: MVarId) {
        self.slots.insert(id, None);
    }

    /// Current slot content, or `InternalError` for an id this run never
    /// minted (a stale handle from another run, or a forged id).
    pub(crate) fn peek(&self, id: &MVarId) -> Result<&Option<Value>, Failure> {
        if !id.minted_by(self.token) {
            return Err(Failure::InternalError);
        }
        self.slots.get(id).ok_or(Failure::InternalError)
    }

    /// Fill an empty slot. Caller must have checked emptiness.
    pub(crate) fn fill(&mut self, id: &MVarId, value: Value) {
        if let Some(slot) = self.slots.get_mut(id) {
            *slot = Some(value);
        }
    }

    /// Empty a full slot, returning its value.
    pub(crate) fn drain(&mut self, id: &MVarId) -> Option<Value> {
        self.slots.get_mut(id).and_then(Option::take)
    }
}
