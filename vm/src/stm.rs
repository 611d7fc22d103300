//! Log-based software transactional memory.
//!
//! A transaction is a self-contained CPS program over transactional vars.
//! It executes to completion inside a single interpreter step against a
//! local log: reads snapshot committed values, writes land only in the log.
//! The interpreter then either commits every write at once, blocks the
//! thread on the accumulated read set (retry), or raises the transaction's
//! exception in the thread. Transactions are re-runnable by construction:
//! a retried transaction executes again in full when any var it read is
//! written.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use skein_types::{Failure, IdSource, RunToken, TVarId, Value};

use crate::action::Exception;

/// Continuation inside a transaction.
pub(crate) type StmKont = Box<dyn FnOnce(Value) -> StmAction>;

/// A transaction producing a [`Value`].
///
/// Cloning is cheap (shared description) and a clone re-executes from
/// scratch, which is exactly what a blocked retry needs.
#[derive(Clone)]
pub struct Stm {
    run: Rc<dyn Fn(StmKont) -> StmAction>,
}

impl std::fmt::Debug for Stm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Stm")
    }
}

/// One primitive transactional operation plus its continuation.
pub(crate) enum StmAction {
    /// Create a transactional var (visible outside only on commit).
    New {
        name: Option<String>,
        value: Value,
        k: Box<dyn FnOnce(TVarId) -> StmAction>,
    },
    /// Read a var through the log.
    Read { tvar: TVarId, k: StmKont },
    /// Write a var into the log.
    Write {
        tvar: TVarId,
        value: Value,
        k: Box<dyn FnOnce() -> StmAction>,
    },
    /// Abort and re-run when the read set changes.
    Retry,
    /// Abort with an exception.
    Throw { exc: Exception },
    /// Run `first`; if it retries, run `second` instead.
    OrElse { first: Stm, second: Stm, k: StmKont },
    /// Run `body`; if it throws, run the handler with its writes discarded.
    Catch {
        body: Stm,
        handler: Box<dyn FnOnce(Exception) -> Stm>,
        k: StmKont,
    },
    /// Transaction finished with this result.
    Stop { value: Value },
}

impl Stm {
    fn from_run(run: impl Fn(StmKont) -> StmAction + 'static) -> Self {
        Self { run: Rc::new(run) }
    }

    pub(crate) fn into_action(&self) -> StmAction {
        (self.run)(Box::new(|value| StmAction::Stop { value }))
    }

    /// A transaction that just returns `value`.
    #[must_use]
    pub fn pure(value: Value) -> Self {
        Self::from_run(move |k| k(value.clone()))
    }

    /// Sequence: run `self`, feed its result to `f`.
    #[must_use]
    pub fn bind(self, f: impl Fn(Value) -> Stm + 'static) -> Self {
        let f = Rc::new(f);
        Self::from_run(move |k| {
            let f = Rc::clone(&f);
            (self.run)(Box::new(move |v| (f(v).run)(k)))
        })
    }

    /// Sequence, discarding the first result.
    #[must_use]
    pub fn then(self, next: Stm) -> Self {
        self.bind(move |_| next.clone())
    }

    /// Map the transaction's result.
    #[must_use]
    pub fn map(self, f: impl Fn(Value) -> Value + 'static) -> Self {
        let f = Rc::new(f);
        Self::from_run(move |k| {
            let f = Rc::clone(&f);
            (self.run)(Box::new(move |v| k(f(v))))
        })
    }

    /// Create a transactional var holding `value`; yields `Value::TVar`.
    #[must_use]
    pub fn new_tvar(value: Value) -> Self {
        Self::from_run(move |k| StmAction::New {
            name: None,
            value: value.clone(),
            k: Box::new(move |id| k(Value::TVar(id))),
        })
    }

    /// Create a labelled transactional var.
    #[must_use]
    pub fn new_tvar_named(name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        Self::from_run(move |k| StmAction::New {
            name: Some(name.clone()),
            value: value.clone(),
            k: Box::new(move |id| k(Value::TVar(id))),
        })
    }

    /// Read a var.
    #[must_use]
    pub fn read(tvar: TVarId) -> Self {
        Self::from_run(move |k| StmAction::Read {
            tvar: tvar.clone(),
            k,
        })
    }

    /// Write a var.
    #[must_use]
    pub fn write(tvar: TVarId, value: Value) -> Self {
        Self::from_run(move |k| StmAction::Write {
            tvar: tvar.clone(),
            value: value.clone(),
            k: Box::new(move || k(Value::Unit)),
        })
    }

    /// Abort; re-run in full next time a var in the read set is written.
    #[must_use]
    pub fn retry() -> Self {
        Self::from_run(|_k| StmAction::Retry)
    }

    /// Run `first`; if it calls [`Stm::retry`], run `second` with the read
    /// sets unioned.
    #[must_use]
    pub fn or_else(first: Stm, second: Stm) -> Self {
        Self::from_run(move |k| StmAction::OrElse {
            first: first.clone(),
            second: second.clone(),
            k,
        })
    }

    /// Abort the transaction with an exception.
    #[must_use]
    pub fn throw(exc: Exception) -> Self {
        Self::from_run(move |_k| StmAction::Throw { exc: exc.clone() })
    }

    /// Run `body`; if it throws, discard its writes and run the handler.
    #[must_use]
    pub fn catch(body: Stm, handler: impl Fn(Exception) -> Stm + 'static) -> Self {
        let handler = Rc::new(handler);
        Self::from_run(move |k| {
            let handler = Rc::clone(&handler);
            StmAction::Catch {
                body: body.clone(),
                handler: Box::new(move |e| handler(e)),
                k,
            }
        })
    }
}

/// One entry of a transaction trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TAction {
    /// Created a var.
    TNew(TVarId),
    /// Read a var.
    TRead(TVarId),
    /// Wrote a var.
    TWrite(TVarId),
    /// Called retry.
    TRetry,
    /// Ran an or-else; second trace present if the first branch retried.
    TOrElse(Vec<TAction>, Option<Vec<TAction>>),
    /// Ran a catch; handler trace present if the body threw.
    TCatch(Vec<TAction>, Option<Vec<TAction>>),
    /// Threw an exception.
    TThrow,
    /// Finished.
    TStop,
}

/// Committed values of every transactional var in a run.
#[derive(Debug)]
pub(crate) struct TVarStore {
    vars: BTreeMap<TVarId, Value>,
    token: RunToken,
}

impl TVarStore {
    pub(crate) fn new(token: RunToken) -> Self {
        Self {
            vars: BTreeMap::new(),
            token,
        }
    }

    pub(crate) fn check(&self, id: &TVarId) -> Result<(), Failure> {
        if !id.minted_by(self.token) || !self.vars.contains_key(id) {
            return Err(Failure::InternalError);
        }
        Ok(())
    }

    pub(crate) fn get(&self, id: &TVarId) -> Result<&Value, Failure> {
        if !id.minted_by(self.token) {
            return Err(Failure::InternalError);
        }
        self.vars.get(id).ok_or(Failure::InternalError)
    }

    pub(crate) fn insert(&mut self, id: TVarId, value: Value) {
        self.vars.insert(id, value);
    }
}

/// How a transaction finished.
#[derive(Debug)]
pub(crate) enum TxOutcome {
    /// Commit these writes and continue with the value.
    Committed {
        value: Value,
        writes: BTreeMap<TVarId, Value>,
        created: BTreeSet<TVarId>,
    },
    /// Block the thread until a var in the read set is written.
    Retry { read_set: BTreeSet<TVarId> },
    /// Raise in the executing thread.
    Thrown(Exception),
}

/// Log of one (possibly nested) transaction frame.
struct Frame {
    writes: BTreeMap<TVarId, Value>,
    created: BTreeSet<TVarId>,
    read_set: BTreeSet<TVarId>,
    trace: Vec<TAction>,
}

impl Frame {
    fn root() -> Self {
        Self {
            writes: BTreeMap::new(),
            created: BTreeSet::new(),
            read_set: BTreeSet::new(),
            trace: Vec::new(),
        }
    }

    /// A nested frame seeing this frame's writes; read set and trace are
    /// deltas merged back by the caller.
    fn child(&self) -> Self {
        Self {
            writes: self.writes.clone(),
            created: self.created.clone(),
            read_set: BTreeSet::new(),
            trace: Vec::new(),
        }
    }

    /// Keep a finished child's effects.
    fn adopt(&mut self, child: Frame) {
        self.writes = child.writes;
        self.created = child.created;
        self.read_set.extend(child.read_set);
    }
}

enum Partial {
    Done(Value),
    Retried,
    Thrown(Exception),
}

/// Execute a transaction against the committed state.
///
/// Never mutates the store: the caller publishes the returned writes (and
/// wakes readers) only for `Committed`.
pub(crate) fn execute(
    tx: &Stm,
    ids: &mut IdSource,
    store: &TVarStore,
) -> Result<(TxOutcome, Vec<TAction>), Failure> {
    let mut frame = Frame::root();
    let partial = run_frame(tx.into_action(), &mut frame, ids, store)?;
    let outcome = match partial {
        Partial::Done(value) => TxOutcome::Committed {
            value,
            writes: frame.writes,
            created: frame.created,
        },
        Partial::Retried => TxOutcome::Retry {
            read_set: frame.read_set,
        },
        Partial::Thrown(exc) => TxOutcome::Thrown(exc),
    };
    Ok((outcome, frame.trace))
}

fn run_frame(
    action: StmAction,
    frame: &mut Frame,
    ids: &mut IdSource,
    store: &TVarStore,
) -> Result<Partial, Failure> {
    let mut action = action;
    loop {
        match action {
            StmAction::Stop { value } => {
                frame.trace.push(TAction::TStop);
                return Ok(Partial::Done(value));
            }
            StmAction::New { name, value, k } => {
                let id = ids.next_tvar(name.as_deref());
                frame.created.insert(id.clone());
                frame.writes.insert(id.clone(), value);
                frame.trace.push(TAction::TNew(id.clone()));
                action = k(id);
            }
            StmAction::Read { tvar, k } => {
                let value = if let Some(written) = frame.writes.get(&tvar) {
                    written.clone()
                } else {
                    store.get(&tvar)?.clone()
                };
                if !frame.created.contains(&tvar) {
                    frame.read_set.insert(tvar.clone());
                }
                frame.trace.push(TAction::TRead(tvar));
                action = k(value);
            }
            StmAction::Write { tvar, value, k } => {
                if !frame.created.contains(&tvar) {
                    store.check(&tvar)?;
                }
                frame.writes.insert(tvar.clone(), value);
                frame.trace.push(TAction::TWrite(tvar));
                action = k();
            }
            StmAction::Retry => {
                frame.trace.push(TAction::TRetry);
                return Ok(Partial::Retried);
            }
            StmAction::Throw { exc } => {
                frame.trace.push(TAction::TThrow);
                return Ok(Partial::Thrown(exc));
            }
            StmAction::OrElse { first, second, k } => {
                let mut left = frame.child();
                match run_frame(first.into_action(), &mut left, ids, store)? {
                    Partial::Done(v) => {
                        let t1 = std::mem::take(&mut left.trace);
                        frame.adopt(left);
                        frame.trace.push(TAction::TOrElse(t1, None));
                        action = k(v);
                    }
                    Partial::Thrown(e) => {
                        frame.read_set.extend(left.read_set);
                        frame.trace.push(TAction::TOrElse(left.trace, None));
                        return Ok(Partial::Thrown(e));
                    }
                    Partial::Retried => {
                        frame.read_set.extend(std::mem::take(&mut left.read_set));
                        let t1 = left.trace;
                        let mut right = frame.child();
                        match run_frame(second.into_action(), &mut right, ids, store)? {
                            Partial::Done(v) => {
                                let t2 = std::mem::take(&mut right.trace);
                                frame.adopt(right);
                                frame.trace.push(TAction::TOrElse(t1, Some(t2)));
                                action = k(v);
                            }
                            Partial::Retried => {
                                frame.read_set.extend(right.read_set);
                                frame.trace.push(TAction::TOrElse(t1, Some(right.trace)));
                                return Ok(Partial::Retried);
                            }
                            Partial::Thrown(e) => {
                                frame.read_set.extend(right.read_set);
                                frame.trace.push(TAction::TOrElse(t1, Some(right.trace)));
                                return Ok(Partial::Thrown(e));
                            }
                        }
                    }
                }
            }
            StmAction::Catch { body, handler, k } => {
                let mut inner = frame.child();
                match run_frame(body.into_action(), &mut inner, ids, store)? {
                    Partial::Done(v) => {
                        let t1 = std::mem::take(&mut inner.trace);
                        frame.adopt(inner);
                        frame.trace.push(TAction::TCatch(t1, None));
                        action = k(v);
                    }
                    Partial::Retried => {
                        frame.read_set.extend(inner.read_set);
                        frame.trace.push(TAction::TCatch(inner.trace, None));
                        return Ok(Partial::Retried);
                    }
                    Partial::Thrown(e) => {
                        frame.read_set.extend(std::mem::take(&mut inner.read_set));
                        let t1 = inner.trace;
                        let mut rescue = frame.child();
                        match run_frame(handler(e).into_action(), &mut rescue, ids, store)? {
                            Partial::Done(v) => {
                                let t2 = std::mem::take(&mut rescue.trace);
                                frame.adopt(rescue);
                                frame.trace.push(TAction::TCatch(t1, Some(t2)));
                                action = k(v);
                            }
                            Partial::Retried => {
                                frame.read_set.extend(rescue.read_set);
                                frame.trace.push(TAction::TCatch(t1, Some(rescue.trace)));
                                return Ok(Partial::Retried);
                            }
                            Partial::Thrown(e2) => {
                                frame.read_set.extend(rescue.read_set);
                                frame.trace.push(TAction::TCatch(t1, Some(rescue.trace)));
                                return Ok(Partial::Thrown(e2));
                            }
                        }
                    }
                }
            }
        }
    }
}
