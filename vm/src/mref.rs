//! Memory-model-aware mutable cells and the pending-write machinery.
//!
//! Every cell stores a committed value and a write counter. Under the
//! relaxed models, plain writes go into per-key FIFO queues instead of the
//! cell: one key per thread under total store order, one per (thread, cell)
//! under partial store order. Each nonempty queue surfaces as a commit
//! pseudo-thread with a stable negative id; the scheduler steps it like any
//! other thread, publishing the oldest write. A thread always reads its own
//! latest pending write first, so per-thread program order is preserved
//! while cross-thread visibility is whatever the schedule makes it.

use std::collections::{BTreeMap, VecDeque};

use skein_types::{Failure, MRefId, MemoryModel, RunToken, ThreadId, Value};

/// Snapshot of a mutable cell used to validate a compare-and-swap.
///
/// A ticket captures the value visible to the reading thread and the cell's
/// write counter; the swap succeeds only while the counter still matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    mref: MRefId,
    ordinal: u64,
    value: Value,
}

impl Ticket {
    /// The cell this ticket snapshots.
    #[must_use]
    pub fn mref(&self) -> &MRefId {
        &self.mref
    }

    /// The snapshot value (the `peek` of a ticket).
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// A mutable cell: committed value plus write counter.
#[derive(Debug)]
struct MRef {
    committed: Value,
    write_count: u64,
}

/// All mutable cells of a run.
#[derive(Debug)]
pub(crate) struct MRefStore {
    cells: BTreeMap<MRefId, MRef>,
    token: RunToken,
}

impl MRefStore {
    pub(crate) fn new(token: RunToken) -> Self {
        Self {
            cells: BTreeMap::new(),
            token,
        }
    }

    pub(crate) fn insert(&mut self, id: MRefId, init: Value) {
        self.cells.insert(
            id,
            MRef {
                committed: init,
                write_count: 0,
            },
        );
    }

    fn cell(&self, id: &MRefId) -> Result<&MRef, Failure> {
        if !id.minted_by(self.token) {
            return Err(Failure::InternalError);
        }
        self.cells.get(id).ok_or(Failure::InternalError)
    }

    fn cell_mut(&mut self, id: &MRefId) -> Result<&mut MRef, Failure> {
        if !id.minted_by(self.token) {
            return Err(Failure::InternalError);
        }
        self.cells.get_mut(id).ok_or(Failure::InternalError)
    }

    /// Publish a value: replace the committed value and bump the counter.
    pub(crate) fn commit(&mut self, id: &MRefId, value: Value) -> Result<(), Failure> {
        let cell = self.cell_mut(id)?;
        cell.committed = value;
        cell.write_count += 1;
        Ok(())
    }

    /// The committed value, ignoring pending writes.
    pub(crate) fn committed(&self, id: &MRefId) -> Result<&Value, Failure> {
        Ok(&self.cell(id)?.committed)
    }

    /// The value `tid` observes: its own latest pending write, else the
    /// committed value.
    pub(crate) fn read(
        &self,
        tid: &ThreadId,
        id: &MRefId,
        buffer: &WriteBuffer,
    ) -> Result<Value, Failure> {
        if let Some(pending) = buffer.latest_pending(tid, id) {
            return Ok(pending.clone());
        }
        Ok(self.cell(id)?.committed.clone())
    }

    /// Snapshot for a later compare-and-swap.
    pub(crate) fn read_for_cas(
        &self,
        tid: &ThreadId,
        id: &MRefId,
        buffer: &WriteBuffer,
    ) -> Result<Ticket, Failure> {
        Ok(Ticket {
            mref: id.clone(),
            ordinal: self.cell(id)?.write_count,
            value: self.read(tid, id, buffer)?,
        })
    }

    /// Attempt the swap. The caller must already have flushed the thread's
    /// pending writes. Returns the success flag and a fresh ticket.
    pub(crate) fn cas(
        &mut self,
        id: &MRefId,
        ticket: &Ticket,
        value: Value,
    ) -> Result<(bool, Ticket), Failure> {
        let cell = self.cell(id)?;
        if cell.committed == ticket.value && cell.write_count == ticket.ordinal {
            self.commit(id, value.clone())?;
            let cell = self.cell(id)?;
            Ok((
                true,
                Ticket {
                    mref: id.clone(),
                    ordinal: cell.write_count,
                    value,
                },
            ))
        } else {
            Ok((
                false,
                Ticket {
                    mref: id.clone(),
                    ordinal: cell.write_count,
                    value: cell.committed.clone(),
                },
            ))
        }
    }
}

/// FIFO key: the writing thread, plus the cell under partial store order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CommitKey {
    tid: ThreadId,
    mref: Option<MRefId>,
}

/// Pending writes awaiting publication, with their commit pseudo-threads.
///
/// Slot numbers are assigned to keys on first use and never reused, so a
/// key's commit pseudo-thread id is stable for the whole run.
#[derive(Debug)]
pub(crate) struct WriteBuffer {
    model: MemoryModel,
    queues: BTreeMap<CommitKey, VecDeque<(MRefId, Value)>>,
    slots: BTreeMap<CommitKey, u64>,
    by_commit_tid: BTreeMap<ThreadId, CommitKey>,
    next_slot: u64,
}

impl WriteBuffer {
    pub(crate) fn new(model: MemoryModel) -> Self {
        Self {
            model,
            queues: BTreeMap::new(),
            slots: BTreeMap::new(),
            by_commit_tid: BTreeMap::new(),
            next_slot: 0,
        }
    }

    pub(crate) fn model(&self) -> MemoryModel {
        self.model
    }

    fn key(&self, tid: &ThreadId, mref: &MRefId) -> CommitKey {
        match self.model {
            MemoryModel::TotalStoreOrder => CommitKey {
                tid: tid.clone(),
                mref: None,
            },
            MemoryModel::PartialStoreOrder => CommitKey {
                tid: tid.clone(),
                mref: Some(mref.clone()),
            },
            MemoryModel::SequentialConsistency => {
                unreachable!("sequentially consistent writes commit immediately")
            }
        }
    }

    /// Park a write, assigning the key's commit pseudo-thread on first use.
    pub(crate) fn park(&mut self, tid: &ThreadId, mref: MRefId, value: Value) {
        let key = self.key(tid, &mref);
        if !self.slots.contains_key(&key) {
            let slot = self.next_slot;
            self.next_slot += 1;
            self.slots.insert(key.clone(), slot);
            self.by_commit_tid.insert(ThreadId::commit(slot), key.clone());
        }
        self.queues.entry(key).or_default().push_back((mref, value));
    }

    /// Commit pseudo-threads with at least one pending write.
    pub(crate) fn commit_tids(&self) -> Vec<ThreadId> {
        let mut tids: Vec<ThreadId> = self
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(key, _)| ThreadId::commit(self.slots[key]))
            .collect();
        tids.sort();
        tids
    }

    /// Pop the oldest pending write behind a commit pseudo-thread.
    pub(crate) fn take_commit(&mut self, commit: &ThreadId) -> Option<(ThreadId, MRefId, Value)> {
        let key = self.by_commit_tid.get(commit)?.clone();
        let (mref, value) = self.queues.get_mut(&key)?.pop_front()?;
        Some((key.tid, mref, value))
    }

    /// The (writer, cell) a commit pseudo-thread would publish next.
    pub(crate) fn peek_commit(&self, commit: &ThreadId) -> Option<(ThreadId, MRefId)> {
        let key = self.by_commit_tid.get(commit)?;
        let (mref, _) = self.queues.get(key)?.front()?;
        Some((key.tid.clone(), mref.clone()))
    }

    /// The latest pending write `tid` has made to `mref`, if any.
    pub(crate) fn latest_pending(&self, tid: &ThreadId, mref: &MRefId) -> Option<&Value> {
        if self.model == MemoryModel::SequentialConsistency {
            return None;
        }
        let key = self.key(tid, mref);
        self.queues
            .get(&key)?
            .iter()
            .rev()
            .find(|(r, _)| r == mref)
            .map(|(_, v)| v)
    }

    /// Drain every pending write of `tid` in FIFO order per key.
    pub(crate) fn drain_thread(&mut self, tid: &ThreadId) -> Vec<(MRefId, Value)> {
        let mut out = Vec::new();
        for (key, queue) in &mut self.queues {
            if key.tid == *tid {
                out.extend(queue.drain(..));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::IdSource;

    fn setup(model: MemoryModel) -> (IdSource, MRefStore, WriteBuffer) {
        let ids = IdSource::new();
        let store = MRefStore::new(ids.token());
        let buffer = WriteBuffer::new(model);
        (ids, store, buffer)
    }

    #[test]
    fn own_pending_write_is_visible_under_tso() {
        let (mut ids, mut store, mut buffer) = setup(MemoryModel::TotalStoreOrder);
        let r = ids.next_mref(None);
        store.insert(r.clone(), Value::Int(0));
        let me = ids.next_thread(None);
        let other = ids.next_thread(None);

        buffer.park(&me, r.clone(), Value::Int(1));
        assert_eq!(store.read(&me, &r, &buffer).unwrap(), Value::Int(1));
        assert_eq!(store.read(&other, &r, &buffer).unwrap(), Value::Int(0));
    }

    #[test]
    fn commits_publish_in_fifo_order() {
        let (mut ids, mut store, mut buffer) = setup(MemoryModel::TotalStoreOrder);
        let r = ids.next_mref(None);
        store.insert(r.clone(), Value::Int(0));
        let me = ids.next_thread(None);

        buffer.park(&me, r.clone(), Value::Int(1));
        buffer.park(&me, r.clone(), Value::Int(2));

        let tids = buffer.commit_tids();
        assert_eq!(tids, vec![ThreadId::commit(0)]);

        let (writer, mref, value) = buffer.take_commit(&tids[0]).unwrap();
        assert_eq!(writer, me);
        assert_eq!(mref, r);
        assert_eq!(value, Value::Int(1));
        store.commit(&mref, value).unwrap();
        assert_eq!(store.committed(&r).unwrap(), &Value::Int(1));

        let (_, _, value) = buffer.take_commit(&tids[0]).unwrap();
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn pso_gives_one_queue_per_cell() {
        let (mut ids, mut store, mut buffer) = setup(MemoryModel::PartialStoreOrder);
        let a = ids.next_mref(None);
        let b = ids.next_mref(None);
        store.insert(a.clone(), Value::Int(0));
        store.insert(b.clone(), Value::Int(0));
        let me = ids.next_thread(None);

        buffer.park(&me, a.clone(), Value::Int(1));
        buffer.park(&me, b.clone(), Value::Int(2));

        // Two commit pseudo-threads: commits to different cells interleave.
        assert_eq!(buffer.commit_tids().len(), 2);
    }

    #[test]
    fn commit_tid_slots_are_stable_across_draining() {
        let (mut ids, _store, mut buffer) = setup(MemoryModel::TotalStoreOrder);
        let r = ids.next_mref(None);
        let me = ids.next_thread(None);

        buffer.park(&me, r.clone(), Value::Int(1));
        let first = buffer.commit_tids();
        buffer.take_commit(&first[0]).unwrap();
        assert!(buffer.commit_tids().is_empty());

        buffer.park(&me, r, Value::Int(2));
        assert_eq!(buffer.commit_tids(), first);
    }

    #[test]
    fn cas_requires_matching_ordinal() {
        let (mut ids, mut store, buffer) = setup(MemoryModel::SequentialConsistency);
        let r = ids.next_mref(None);
        store.insert(r.clone(), Value::Int(5));
        let me = ids.next_thread(None);

        let ticket = store.read_for_cas(&me, &r, &buffer).unwrap();
        store.commit(&r, Value::Int(6)).unwrap();

        let (ok, fresh) = store.cas(&r, &ticket, Value::Int(7)).unwrap();
        assert!(!ok);
        assert_eq!(fresh.value(), &Value::Int(6));

        let (ok, fresh) = store.cas(&r, &fresh, Value::Int(7)).unwrap();
        assert!(ok);
        assert_eq!(fresh.value(), &Value::Int(7));
        assert_eq!(store.committed(&r).unwrap(), &Value::Int(7));
    }

    #[test]
    fn drain_thread_flushes_only_that_thread() {
        let (mut ids, mut store, mut buffer) = setup(MemoryModel::TotalStoreOrder);
        let r = ids.next_mref(None);
        store.insert(r.clone(), Value::Int(0));
        let me = ids.next_thread(None);
        let other = ids.next_thread(None);

        buffer.park(&me, r.clone(), Value::Int(1));
        buffer.park(&other, r.clone(), Value::Int(9));

        let mine = buffer.drain_thread(&me);
        assert_eq!(mine, vec![(r.clone(), Value::Int(1))]);
        assert_eq!(store.read(&other, &r, &buffer).unwrap(), Value::Int(9));
    }
}
