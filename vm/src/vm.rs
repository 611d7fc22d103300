//! The interpreter loop: pick a thread, step it one action, record it.
//!
//! State between steps is the thread table, the cell stores, the write
//! buffer, the id source, and the prior thread. One iteration asks the
//! scheduler for a runnable thread (commit pseudo-threads included),
//! advances it by exactly one action, and appends a trace entry. The run
//! ends when the main thread is gone (success), nothing is runnable
//! (deadlock), the scheduler makes an impossible pick (abort), or an
//! exception escapes the main thread.
//!
//! Sub-computations run a nested loop over the same machine: the thread
//! table, prior, and start set are swapped out and back, while the id
//! source, cell stores, write buffer, capability count, scheduler, and
//! trace are shared with the outer interpreter.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use skein_types::{Failure, IdSource, MaskingState, MemoryModel, ThreadId};

use crate::action::{Action, Exception, SubSpawn};
use crate::error::VMError;
use crate::mref::{MRefStore, WriteBuffer};
use crate::mvar::MVarStore;
use crate::program::{Program, Restore};
use crate::sched::Scheduler;
use crate::stm::{self, TVarStore, TxOutcome};
use crate::thread::{BlockedOn, HandlerEntry, Raised, Threads};
use crate::trace::{Decision, Lookahead, ThreadAction, Trace, TraceEntry};

/// Interpreter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VMConfig {
    /// Visibility discipline for mutable-cell writes.
    pub memory_model: MemoryModel,
    /// Capability count reported until a program changes it.
    pub initial_capabilities: usize,
    /// Step budget; exceeding it aborts the run. `None` is unbounded.
    pub max_steps: Option<usize>,
}

impl Default for VMConfig {
    fn default() -> Self {
        Self {
            memory_model: MemoryModel::default(),
            initial_capabilities: 2,
            max_steps: None,
        }
    }
}

/// Result of one run.
#[derive(Debug)]
pub struct RunOutcome<A> {
    /// The program's value, or the reified failure.
    pub result: Result<A, Failure>,
    /// Every step in execution order.
    pub trace: Trace,
}

/// Execute a program under a scheduler until it terminates.
///
/// The scheduler is threaded through the whole run — including nested
/// sub-computations — and holds whatever state it accumulated when this
/// returns.
///
/// # Errors
///
/// Returns an error for an unusable configuration. Failures *of the run*
/// are not errors; they land in [`RunOutcome::result`].
pub fn run<A, S>(
    config: VMConfig,
    scheduler: &mut S,
    program: Program<A>,
) -> Result<RunOutcome<A>, VMError>
where
    A: 'static,
    S: Scheduler + ?Sized,
{
    if config.initial_capabilities == 0 {
        return Err(VMError::InvalidCapabilities { n: 0 });
    }

    let slot: Rc<RefCell<Option<A>>> = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    let action = program.into_action(Box::new(move |a| {
        *sink.borrow_mut() = Some(a);
        Action::Stop
    }));

    let ids = IdSource::new();
    let token = ids.token();
    let mut machine = Machine {
        threads: Threads::new(),
        mvars: MVarStore::new(token),
        mrefs: MRefStore::new(token),
        tvars: TVarStore::new(token),
        buffer: WriteBuffer::new(config.memory_model),
        ids,
        caps: config.initial_capabilities,
        max_steps: config.max_steps,
        steps: 0,
        prior: None,
        started: BTreeSet::new(),
        depth: 0,
        trace: Vec::new(),
        scheduler,
    };
    machine.threads.install_main(action, MaskingState::Unmasked);

    let failure = machine.run_loop();
    let trace = machine.trace;
    let result = match failure {
        Some(f) => Err(f),
        None => slot.borrow_mut().take().ok_or(Failure::InternalError),
    };
    Ok(RunOutcome { result, trace })
}

/// Convenience entry point: default configuration.
///
/// # Errors
///
/// See [`run`].
pub fn run_default<A: 'static, S: Scheduler + ?Sized>(
    scheduler: &mut S,
    program: Program<A>,
) -> Result<RunOutcome<A>, VMError> {
    run(VMConfig::default(), scheduler, program)
}

/// What one step produced, from the loop's point of view.
enum StepRecord {
    /// An action to append as a trace entry.
    Simple {
        action: ThreadAction,
        ending: Option<Failure>,
    },
    /// The step recorded its own entries (sub-computation markers).
    Recorded { ending: Option<Failure> },
}

struct Machine<'s, S: Scheduler + ?Sized> {
    threads: Threads,
    mvars: MVarStore,
    mrefs: MRefStore,
    tvars: TVarStore,
    buffer: WriteBuffer,
    ids: IdSource,
    caps: usize,
    max_steps: Option<usize>,
    steps: usize,
    prior: Option<ThreadId>,
    started: BTreeSet<ThreadId>,
    depth: usize,
    trace: Trace,
    scheduler: &'s mut S,
}

impl<S: Scheduler + ?Sized> Machine<'_, S> {
    /// Drive this interpreter to termination. `None` means the main thread
    /// finished; `Some` is the reified failure.
    fn run_loop(&mut self) -> Option<Failure> {
        loop {
            if !self.threads.contains(&ThreadId::MAIN) {
                return None;
            }

            let mut runnable = self.threads.runnable();
            runnable.extend(self.buffer.commit_tids());
            runnable.sort();
            if runnable.is_empty() {
                return Some(if self.threads.any_blocked_on_stm(true) {
                    Failure::STMDeadlock
                } else {
                    Failure::Deadlock
                });
            }

            let chosen = match &self.prior {
                // The first step of an interpreter is always its main thread.
                None => ThreadId::MAIN,
                Some(prior) => match self.scheduler.schedule(Some(prior), &runnable) {
                    Some(tid) => tid,
                    None => return Some(Failure::Abort),
                },
            };
            if !runnable.contains(&chosen) {
                return Some(Failure::Abort);
            }
            if let Some(limit) = self.max_steps {
                if self.steps >= limit {
                    return Some(Failure::Abort);
                }
            }
            self.steps += 1;

            let decision = if self.started.insert(chosen.clone()) {
                Decision::Start(chosen.clone())
            } else if self.prior.as_ref() == Some(&chosen) {
                Decision::Continue
            } else {
                Decision::SwitchTo(chosen.clone())
            };

            let record = if chosen.is_commit() {
                self.step_commit(&chosen)
            } else {
                self.step_thread(&chosen, &decision)
            };
            self.prior = Some(chosen.clone());

            match record {
                Ok(StepRecord::Simple { action, ending }) => {
                    let next = self.lookahead_of(&chosen);
                    self.trace.push(TraceEntry {
                        decision,
                        action,
                        next,
                    });
                    if let Some(f) = ending {
                        return Some(f);
                    }
                }
                Ok(StepRecord::Recorded { ending }) => {
                    if let Some(f) = ending {
                        return Some(f);
                    }
                }
                Err(f) => return Some(f),
            }
        }
    }

    /// What `tid` would do next, after the step just taken.
    fn lookahead_of(&self, tid: &ThreadId) -> Option<Lookahead> {
        if tid.is_commit() {
            return self
                .buffer
                .peek_commit(tid)
                .map(|(writer, mref)| Lookahead::WillCommitMRef(writer, mref));
        }
        self.threads
            .get(tid)
            .and_then(|t| t.continuation.as_ref())
            .map(Action::lookahead)
    }

    /// Publish the oldest pending write behind a commit pseudo-thread.
    fn step_commit(&mut self, commit: &ThreadId) -> Result<StepRecord, Failure> {
        let (writer, mref, value) = self
            .buffer
            .take_commit(commit)
            .ok_or(Failure::InternalError)?;
        self.mrefs.commit(&mref, value)?;
        Ok(StepRecord::Simple {
            action: ThreadAction::CommitMRef(writer, mref),
            ending: None,
        })
    }

    /// Advance a user thread by exactly one action.
    fn step_thread(&mut self, tid: &ThreadId, decision: &Decision) -> Result<StepRecord, Failure> {
        let thread = self.threads.get_mut(tid).ok_or(Failure::InternalError)?;
        let action = thread
            .continuation
            .take()
            .expect("runnable thread has a continuation");

        let (action, ending) = match action {
            Action::Fork { name, child, k } => {
                let child_tid = self.ids.next_thread(name.as_deref());
                self.threads.launch(tid, child_tid.clone(), *child);
                self.threads.goto(tid, k(child_tid.clone()));
                (ThreadAction::Fork(child_tid), None)
            }
            Action::MyThreadId { k } => {
                self.threads.goto(tid, k(tid.clone()));
                (ThreadAction::MyThreadId, None)
            }
            Action::GetCaps { k } => {
                let caps = self.caps;
                self.threads.goto(tid, k(caps));
                (ThreadAction::GetNumCapabilities(caps), None)
            }
            Action::SetCaps { n, k } => {
                self.caps = n.max(1);
                self.threads.goto(tid, k());
                (ThreadAction::SetNumCapabilities(n.max(1)), None)
            }
            Action::Yield { k } => {
                self.threads.goto(tid, k());
                (ThreadAction::Yield, None)
            }
            Action::Return { k } => {
                self.threads.goto(tid, k());
                (ThreadAction::Return, None)
            }
            Action::Lift { effect } => {
                self.threads.goto(tid, effect());
                (ThreadAction::Lift, None)
            }
            Action::Stop => {
                self.threads.kill(tid);
                let _ = self.threads.wake(&BlockedOn::Mask(tid.clone()));
                (ThreadAction::Stop, None)
            }

            Action::NewMVar { name, k } => {
                let id = self.ids.next_mvar(name.as_deref());
                self.mvars.insert(id.clone());
                self.threads.goto(tid, k(id.clone()));
                (ThreadAction::NewMVar(id), None)
            }
            Action::PutMVar { mvar, value, k } => {
                if self.mvars.peek(&mvar)?.is_none() {
                    self.mvars.fill(&mvar, value);
                    let woken = self.threads.wake(&BlockedOn::MVarFull(mvar.clone()));
                    self.threads.goto(tid, k());
                    (ThreadAction::Put(mvar, woken), None)
                } else {
                    self.block_thread(tid, BlockedOn::MVarEmpty(mvar.clone()));
                    self.threads.goto(
                        tid,
                        Action::PutMVar {
                            mvar: mvar.clone(),
                            value,
                            k,
                        },
                    );
                    (ThreadAction::BlockedPut(mvar), None)
                }
            }
            Action::TryPutMVar { mvar, value, k } => {
                if self.mvars.peek(&mvar)?.is_none() {
                    self.mvars.fill(&mvar, value);
                    let woken = self.threads.wake(&BlockedOn::MVarFull(mvar.clone()));
                    self.threads.goto(tid, k(true));
                    (ThreadAction::TryPut(mvar, true, woken), None)
                } else {
                    self.threads.goto(tid, k(false));
                    (ThreadAction::TryPut(mvar, false, Vec::new()), None)
                }
            }
            Action::TakeMVar { mvar, k } => {
                if self.mvars.peek(&mvar)?.is_some() {
                    let value = self.mvars.drain(&mvar).ok_or(Failure::InternalError)?;
                    let woken = self.threads.wake(&BlockedOn::MVarEmpty(mvar.clone()));
                    self.threads.goto(tid, k(value));
                    (ThreadAction::Take(mvar, woken), None)
                } else {
                    self.block_thread(tid, BlockedOn::MVarFull(mvar.clone()));
                    self.threads.goto(
                        tid,
                        Action::TakeMVar {
                            mvar: mvar.clone(),
                            k,
                        },
                    );
                    (ThreadAction::BlockedTake(mvar), None)
                }
            }
            Action::TryTakeMVar { mvar, k } => {
                if self.mvars.peek(&mvar)?.is_some() {
                    let value = self.mvars.drain(&mvar).ok_or(Failure::InternalError)?;
                    let woken = self.threads.wake(&BlockedOn::MVarEmpty(mvar.clone()));
                    self.threads.goto(tid, k(Some(value)));
                    (ThreadAction::TryTake(mvar, true, woken), None)
                } else {
                    self.threads.goto(tid, k(None));
                    (ThreadAction::TryTake(mvar, false, Vec::new()), None)
                }
            }
            Action::ReadMVar { mvar, k } => {
                if let Some(value) = self.mvars.peek(&mvar)?.clone() {
                    self.threads.goto(tid, k(value));
                    (ThreadAction::Read(mvar), None)
                } else {
                    self.block_thread(tid, BlockedOn::MVarFull(mvar.clone()));
                    self.threads.goto(
                        tid,
                        Action::ReadMVar {
                            mvar: mvar.clone(),
                            k,
                        },
                    );
                    (ThreadAction::BlockedRead(mvar), None)
                }
            }
            Action::TryReadMVar { mvar, k } => {
                let value = self.mvars.peek(&mvar)?.clone();
                let present = value.is_some();
                self.threads.goto(tid, k(value));
                (ThreadAction::TryRead(mvar, present), None)
            }

            Action::NewMRef { name, init, k } => {
                let id = self.ids.next_mref(name.as_deref());
                self.mrefs.insert(id.clone(), init);
                self.threads.goto(tid, k(id.clone()));
                (ThreadAction::NewMRef(id), None)
            }
            Action::ReadMRef { mref, k } => {
                let value = self.mrefs.read(tid, &mref, &self.buffer)?;
                self.threads.goto(tid, k(value));
                (ThreadAction::ReadMRef(mref), None)
            }
            Action::WriteMRef { mref, value, k } => {
                if self.buffer.model() == MemoryModel::SequentialConsistency {
                    self.mrefs.commit(&mref, value)?;
                } else {
                    // Existence check up front; the write itself only parks.
                    self.mrefs.committed(&mref)?;
                    self.buffer.park(tid, mref.clone(), value);
                }
                self.threads.goto(tid, k());
                (ThreadAction::WriteMRef(mref), None)
            }
            Action::ModifyMRef { mref, f, k } => {
                self.flush_thread(tid)?;
                let old = self.mrefs.committed(&mref)?.clone();
                let (new, result) = f(old);
                self.mrefs.commit(&mref, new)?;
                self.threads.goto(tid, k(result));
                (ThreadAction::ModifyMRef(mref), None)
            }
            Action::CasMRef {
                mref,
                ticket,
                value,
                k,
            } => {
                self.flush_thread(tid)?;
                let (swapped, fresh) = self.mrefs.cas(&mref, &ticket, value)?;
                self.threads.goto(tid, k((swapped, fresh)));
                (ThreadAction::CasMRef(mref, swapped), None)
            }
            Action::ReadForCas { mref, k } => {
                let ticket = self.mrefs.read_for_cas(tid, &mref, &self.buffer)?;
                self.threads.goto(tid, k(ticket));
                (ThreadAction::ReadForCas(mref), None)
            }

            Action::Atomically { tx, k } => {
                let (outcome, ttrace) = stm::execute(&tx, &mut self.ids, &self.tvars)?;
                match outcome {
                    TxOutcome::Committed {
                        value,
                        writes,
                        created,
                    } => {
                        let mut changed = BTreeSet::new();
                        for (tvar, new) in writes {
                            if !created.contains(&tvar) && *self.tvars.get(&tvar)? != new {
                                changed.insert(tvar.clone());
                            }
                            self.tvars.insert(tvar, new);
                        }
                        let woken = self.threads.wake(&BlockedOn::TVars(changed));
                        self.threads.goto(tid, k(value));
                        (ThreadAction::STM(ttrace, woken), None)
                    }
                    TxOutcome::Retry { read_set } => {
                        self.block_thread(tid, BlockedOn::TVars(read_set));
                        self.threads.goto(tid, Action::Atomically { tx, k });
                        (ThreadAction::BlockedSTM(ttrace), None)
                    }
                    TxOutcome::Thrown(exc) => {
                        let ending = self.deliver_to_self(tid, exc);
                        (ThreadAction::ThrownSTM(ttrace), ending)
                    }
                }
            }

            Action::Throw { exc } => {
                let ending = self.deliver_to_self(tid, exc);
                (ThreadAction::Throw, ending)
            }
            Action::ThrowTo { target, exc, k } => return self.step_throw_to(tid, target, exc, k),
            Action::Catching {
                matches,
                handler,
                body,
            } => {
                let thread = self.threads.get_mut(tid).ok_or(Failure::InternalError)?;
                thread.handlers.push(HandlerEntry {
                    matches,
                    run: handler,
                });
                thread.continuation = Some(*body);
                (ThreadAction::Catching, None)
            }
            Action::PopCatching { k } => {
                let thread = self.threads.get_mut(tid).ok_or(Failure::InternalError)?;
                if thread.handlers.pop().is_none() {
                    return Err(Failure::InternalError);
                }
                self.threads.goto(tid, k());
                (ThreadAction::PopCatching, None)
            }

            Action::Mask { mask, body } => {
                let thread = self.threads.get_mut(tid).ok_or(Failure::InternalError)?;
                let outer = thread.masking;
                thread.masking = mask;
                thread.continuation = Some(body(Restore::new(outer, mask)));
                let _ = self.threads.wake(&BlockedOn::Mask(tid.clone()));
                (ThreadAction::SetMasking(false, mask), None)
            }
            Action::SetMasking { outer, mask, k } => {
                self.transition_masking(tid, mask);
                self.threads.goto(tid, k());
                (ThreadAction::SetMasking(outer, mask), None)
            }
            Action::ResetMasking { outer, mask, k } => {
                self.transition_masking(tid, mask);
                self.threads.goto(tid, k());
                (ThreadAction::ResetMasking(outer, mask), None)
            }

            Action::Subconcurrency { spawn } => {
                return self.step_subconcurrency(tid, decision, spawn);
            }
        };

        Ok(StepRecord::Simple { action, ending })
    }

    /// Deliver an exception to another thread; blocks the sender while the
    /// target is uninterruptible. A dead target is trivially deliverable.
    fn step_throw_to(
        &mut self,
        tid: &ThreadId,
        target: ThreadId,
        exc: Exception,
        k: crate::action::Thunk,
    ) -> Result<StepRecord, Failure> {
        if target == *tid {
            let ending = self.deliver_to_self(tid, exc);
            return Ok(StepRecord::Simple {
                action: ThreadAction::ThrowTo(target, Vec::new()),
                ending,
            });
        }

        let Some(state) = self
            .threads
            .get(&target)
            .map(|t| (t.masking, t.blocked_on.is_some()))
        else {
            self.threads.goto(tid, k());
            return Ok(StepRecord::Simple {
                action: ThreadAction::ThrowTo(target, Vec::new()),
                ending: None,
            });
        };

        let (masking, blocked) = state;
        if !masking.interruptible(blocked) {
            self.block_thread(tid, BlockedOn::Mask(target.clone()));
            self.threads.goto(
                tid,
                Action::ThrowTo {
                    target: target.clone(),
                    exc,
                    k,
                },
            );
            return Ok(StepRecord::Simple {
                action: ThreadAction::BlockedThrowTo(target),
                ending: None,
            });
        }

        let mut woken = Vec::new();
        let ending = match self.threads.raise(&target, exc) {
            Raised::Caught => {
                if blocked {
                    woken.push(target.clone());
                }
                None
            }
            Raised::Unhandled if target.is_main() => Some(Failure::UncaughtException),
            Raised::Unhandled => {
                self.threads.kill(&target);
                woken.extend(self.threads.wake(&BlockedOn::Mask(target.clone())));
                None
            }
        };
        self.threads.goto(tid, k());
        Ok(StepRecord::Simple {
            action: ThreadAction::ThrowTo(target, woken),
            ending,
        })
    }

    /// Run a nested interpreter and resume the outer thread with its
    /// reified outcome. The inner trace lands between the start and stop
    /// markers.
    fn step_subconcurrency(
        &mut self,
        tid: &ThreadId,
        decision: &Decision,
        spawn: Box<dyn FnOnce() -> SubSpawn>,
    ) -> Result<StepRecord, Failure> {
        if self.depth > 0 {
            return Err(Failure::InternalError);
        }
        let SubSpawn { action, finish } = spawn();

        self.trace.push(TraceEntry {
            decision: decision.clone(),
            action: ThreadAction::StartSubconcurrency,
            next: Some(action.lookahead()),
        });

        let masking = self
            .threads
            .get(tid)
            .map_or(MaskingState::Unmasked, |t| t.masking);
        let (failure, inner_prior) = self.run_nested(action, masking);

        // The stop marker reads as a step of the outer thread following
        // whatever the inner run stepped last.
        let stop_decision = match inner_prior {
            Some(ref last) if last == tid => Decision::Continue,
            Some(_) => Decision::SwitchTo(tid.clone()),
            None => Decision::Continue,
        };
        self.threads.goto(tid, finish(failure));
        self.trace.push(TraceEntry {
            decision: stop_decision,
            action: ThreadAction::StopSubconcurrency,
            next: self.lookahead_of(tid),
        });
        Ok(StepRecord::Recorded { ending: None })
    }

    fn run_nested(
        &mut self,
        action: Action,
        masking: MaskingState,
    ) -> (Option<Failure>, Option<ThreadId>) {
        let saved_threads = std::mem::take(&mut self.threads);
        let saved_prior = self.prior.take();
        let saved_started = std::mem::take(&mut self.started);
        self.depth += 1;
        self.threads.install_main(action, masking);

        let failure = self.run_loop();

        self.depth -= 1;
        self.threads = saved_threads;
        let inner_prior = std::mem::replace(&mut self.prior, saved_prior);
        self.started = saved_started;
        (failure, inner_prior)
    }

    /// Raise in the executing thread. `Some` ends the run (uncaught on the
    /// main thread); a killed child is removed and its `Mask` waiters wake.
    fn deliver_to_self(&mut self, tid: &ThreadId, exc: Exception) -> Option<Failure> {
        match self.threads.raise(tid, exc) {
            Raised::Caught => None,
            Raised::Unhandled if tid.is_main() => Some(Failure::UncaughtException),
            Raised::Unhandled => {
                self.threads.kill(tid);
                let _ = self.threads.wake(&BlockedOn::Mask(tid.clone()));
                None
            }
        }
    }

    /// Block a thread, waking `Mask` waiters on it: blocking can make a
    /// masked-interruptible target deliverable.
    fn block_thread(&mut self, tid: &ThreadId, reason: BlockedOn) {
        self.threads.block(tid, reason);
        let _ = self.threads.wake(&BlockedOn::Mask(tid.clone()));
    }

    /// Apply a masking transition, waking delivery attempts on this thread.
    fn transition_masking(&mut self, tid: &ThreadId, mask: MaskingState) {
        if let Some(thread) = self.threads.get_mut(tid) {
            thread.masking = mask;
        }
        let _ = self.threads.wake(&BlockedOn::Mask(tid.clone()));
    }

    /// Publish every pending write of `tid`, in buffer FIFO order.
    fn flush_thread(&mut self, tid: &ThreadId) -> Result<(), Failure> {
        for (mref, value) in self.buffer.drain_thread(tid) {
            self.mrefs.commit(&mref, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{
        self, atomically, fork, new_empty_mvar, put_mvar, take_mvar, yield_now,
    };
    use crate::sched::RoundRobin;
    use crate::stm::Stm;
    use assert_matches::assert_matches;
    use skein_types::Value;

    #[test]
    fn zero_capabilities_is_a_config_error() {
        let config = VMConfig {
            initial_capabilities: 0,
            ..VMConfig::default()
        };
        let result = run(config, &mut RoundRobin, program::pure(()));
        assert_matches!(result, Err(VMError::InvalidCapabilities { n: 0 }));
    }

    #[test]
    fn pure_program_returns_its_value() {
        let outcome = run_default(&mut RoundRobin, program::pure(7)).unwrap();
        assert_eq!(outcome.result, Ok(7));
        // The only step is the main thread stopping.
        assert_matches!(
            outcome.trace[..],
            [TraceEntry {
                decision: Decision::Start(_),
                action: ThreadAction::Stop,
                next: None,
            }]
        );
    }

    #[test]
    fn explicit_stop_without_a_value_is_an_internal_error() {
        let outcome = run_default(&mut RoundRobin, program::stop::<i64>()).unwrap();
        assert_eq!(outcome.result, Err(Failure::InternalError));
    }

    #[test]
    fn step_budget_aborts() {
        let config = VMConfig {
            max_steps: Some(2),
            ..VMConfig::default()
        };
        let program = yield_now().then(yield_now()).then(program::pure(()));
        let outcome = run(config, &mut RoundRobin, program).unwrap();
        assert_eq!(outcome.result, Err(Failure::Abort));
        assert_eq!(outcome.trace.len(), 2);
    }

    #[test]
    fn scheduler_stop_sentinel_aborts() {
        let mut sched = crate::sched::ScriptScheduler::default();
        let program = yield_now().then(yield_now());
        let outcome = run_default(&mut sched, program).unwrap();
        // First step runs without consulting the scheduler; the empty
        // script then stops the run.
        assert_eq!(outcome.result, Err(Failure::Abort));
        assert_eq!(outcome.trace.len(), 1);
    }

    #[test]
    fn fork_then_join_round_trips_a_value() {
        let program = new_empty_mvar().bind(|m| {
            fork(put_mvar(m.clone(), Value::Int(7))).then(take_mvar(m))
        });
        let outcome = run_default(&mut RoundRobin, program).unwrap();
        assert_eq!(outcome.result, Ok(Value::Int(7)));
    }

    #[test]
    fn stm_commit_wakes_blocked_readers() {
        let program = atomically(Stm::new_tvar(Value::Int(0))).bind(|v| {
            let tvar = v.as_tvar().expect("tvar ref").clone();
            let waiter = {
                let tvar = tvar.clone();
                atomically(Stm::read(tvar).bind(|x| {
                    if x.as_int() == Some(0) {
                        Stm::retry()
                    } else {
                        Stm::pure(x)
                    }
                }))
            };
            fork(atomically(Stm::write(tvar, Value::Int(1)))).then(waiter)
        });
        let outcome = run_default(&mut RoundRobin, program).unwrap();
        assert_eq!(outcome.result, Ok(Value::Int(1)));
    }
}
