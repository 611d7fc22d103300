//! The program builder: typed CPS combinators over the action algebra.
//!
//! A [`Program`] is a continuation-passing computation producing a typed
//! result. Combinators compose programs without executing anything; the
//! interpreter forces one action node per step. Primitives with resource
//! results stay typed (`Program<MVarId>`, `Program<Ticket>`, …) while cell
//! contents are dynamic [`Value`]s.

use std::cell::RefCell;
use std::rc::Rc;

use skein_types::{Failure, MRefId, MVarId, MaskingState, ThreadId, Value};

use crate::action::{Action, Cont, Exception, SubSpawn};
use crate::mref::Ticket;
use crate::stm::Stm;

/// A concurrent program producing an `A`.
pub struct Program<A> {
    run: Box<dyn FnOnce(Cont<A>) -> Action>,
}

impl<A: 'static> Program<A> {
    pub(crate) fn prim(run: impl FnOnce(Cont<A>) -> Action + 'static) -> Self {
        Self { run: Box::new(run) }
    }

    /// Lower the program to its root action, wiring `k` as the final
    /// continuation.
    pub(crate) fn into_action(self, k: Cont<A>) -> Action {
        (self.run)(k)
    }

    /// A program that immediately produces `a` without taking a step.
    #[must_use]
    pub fn pure(a: A) -> Self {
        Self::prim(move |k| k(a))
    }

    /// Run `self`, then feed its result to `f`.
    #[must_use]
    pub fn bind<B: 'static>(self, f: impl FnOnce(A) -> Program<B> + 'static) -> Program<B> {
        Program::prim(move |k| self.into_action(Box::new(move |a| f(a).into_action(k))))
    }

    /// Run `self`, discard its result, then run `next`.
    #[must_use]
    pub fn then<B: 'static>(self, next: Program<B>) -> Program<B> {
        self.bind(move |_| next)
    }

    /// Map the result.
    #[must_use]
    pub fn map<B: 'static>(self, f: impl FnOnce(A) -> B + 'static) -> Program<B> {
        self.bind(move |a| Program::pure(f(a)))
    }
}

/// A program that immediately produces `a` without taking a step.
#[must_use]
pub fn pure<A: 'static>(a: A) -> Program<A> {
    Program::pure(a)
}

/// An explicit no-op step producing `a`.
///
/// Unlike [`pure`], this consumes one scheduler step, which gives a thread
/// an observable action in the trace.
#[must_use]
pub fn ret<A: 'static>(a: A) -> Program<A> {
    Program::prim(move |k| Action::Return {
        k: Box::new(move || k(a)),
    })
}

/// Terminate the executing thread without producing a value.
#[must_use]
pub fn stop<A: 'static>() -> Program<A> {
    Program::prim(|_k| Action::Stop)
}

/// Fork a child thread; produces the child's id.
#[must_use]
pub fn fork<B: 'static>(child: Program<B>) -> Program<ThreadId> {
    fork_inner(None, child)
}

/// Fork a child thread with a label on its id.
#[must_use]
pub fn fork_named<B: 'static>(name: impl Into<String>, child: Program<B>) -> Program<ThreadId> {
    fork_inner(Some(name.into()), child)
}

fn fork_inner<B: 'static>(name: Option<String>, child: Program<B>) -> Program<ThreadId> {
    Program::prim(move |k| Action::Fork {
        name,
        child: Box::new(child.into_action(Box::new(|_| Action::Stop))),
        k,
    })
}

/// The executing thread's own id.
#[must_use]
pub fn my_thread_id() -> Program<ThreadId> {
    Program::prim(|k| Action::MyThreadId { k })
}

/// The current capability count.
#[must_use]
pub fn get_num_capabilities() -> Program<usize> {
    Program::prim(|k| Action::GetCaps { k })
}

/// Set the capability count.
#[must_use]
pub fn set_num_capabilities(n: usize) -> Program<()> {
    Program::prim(move |k| Action::SetCaps {
        n,
        k: Box::new(move || k(())),
    })
}

/// Cooperatively yield to the scheduler.
#[must_use]
pub fn yield_now() -> Program<()> {
    Program::prim(|k| Action::Yield {
        k: Box::new(move || k(())),
    })
}

/// Run an opaque host effect as one atomic step.
///
/// The effect must be total: a panicking effect tears down the whole run,
/// uncategorised.
#[must_use]
pub fn lift<A: 'static>(effect: impl FnOnce() -> A + 'static) -> Program<A> {
    Program::prim(move |k| Action::Lift {
        effect: Box::new(move || k(effect())),
    })
}

// ---- Blocking cells ----

/// Create an empty blocking cell.
#[must_use]
pub fn new_empty_mvar() -> Program<MVarId> {
    Program::prim(|k| Action::NewMVar { name: None, k })
}

/// Create an empty blocking cell with a labelled id.
#[must_use]
pub fn new_empty_mvar_named(name: impl Into<String>) -> Program<MVarId> {
    let name = name.into();
    Program::prim(move |k| Action::NewMVar {
        name: Some(name),
        k,
    })
}

/// Create a blocking cell already holding `value`.
#[must_use]
pub fn new_mvar(value: Value) -> Program<MVarId> {
    new_empty_mvar().bind(move |mv| put_mvar(mv.clone(), value).map(move |()| mv))
}

/// Put into a blocking cell; blocks while it is full.
#[must_use]
pub fn put_mvar(mvar: MVarId, value: Value) -> Program<()> {
    Program::prim(move |k| Action::PutMVar {
        mvar,
        value,
        k: Box::new(move || k(())),
    })
}

/// Non-blocking put; produces whether the value was stored.
#[must_use]
pub fn try_put_mvar(mvar: MVarId, value: Value) -> Program<bool> {
    Program::prim(move |k| Action::TryPutMVar { mvar, value, k })
}

/// Take from a blocking cell, emptying it; blocks while it is empty.
#[must_use]
pub fn take_mvar(mvar: MVarId) -> Program<Value> {
    Program::prim(move |k| Action::TakeMVar { mvar, k })
}

/// Non-blocking take.
#[must_use]
pub fn try_take_mvar(mvar: MVarId) -> Program<Option<Value>> {
    Program::prim(move |k| Action::TryTakeMVar { mvar, k })
}

/// Read a blocking cell without emptying it; blocks while it is empty.
#[must_use]
pub fn read_mvar(mvar: MVarId) -> Program<Value> {
    Program::prim(move |k| Action::ReadMVar { mvar, k })
}

/// Non-blocking read.
#[must_use]
pub fn try_read_mvar(mvar: MVarId) -> Program<Option<Value>> {
    Program::prim(move |k| Action::TryReadMVar { mvar, k })
}

// ---- Mutable cells ----

/// Create a mutable cell.
#[must_use]
pub fn new_mref(init: Value) -> Program<MRefId> {
    Program::prim(move |k| Action::NewMRef {
        name: None,
        init,
        k,
    })
}

/// Create a mutable cell with a labelled id.
#[must_use]
pub fn new_mref_named(name: impl Into<String>, init: Value) -> Program<MRefId> {
    let name = name.into();
    Program::prim(move |k| Action::NewMRef {
        name: Some(name),
        init,
        k,
    })
}

/// Read a mutable cell (sees the thread's own pending writes).
#[must_use]
pub fn read_mref(mref: MRefId) -> Program<Value> {
    Program::prim(move |k| Action::ReadMRef { mref, k })
}

/// Write a mutable cell under the configured memory model.
#[must_use]
pub fn write_mref(mref: MRefId, value: Value) -> Program<()> {
    Program::prim(move |k| Action::WriteMRef {
        mref,
        value,
        k: Box::new(move || k(())),
    })
}

/// Read-then-write sugar. Two steps, no atomicity: other threads can
/// interleave between the read and the write.
#[must_use]
pub fn modify_mref(mref: MRefId, f: impl FnOnce(Value) -> Value + 'static) -> Program<()> {
    read_mref(mref.clone()).bind(move |v| write_mref(mref, f(v)))
}

/// Atomic read-modify-write. One step, full barrier for the thread's
/// pending writes; `f` returns (new cell value, result).
#[must_use]
pub fn atomic_modify_mref(
    mref: MRefId,
    f: impl FnOnce(Value) -> (Value, Value) + 'static,
) -> Program<Value> {
    Program::prim(move |k| Action::ModifyMRef {
        mref,
        f: Box::new(f),
        k,
    })
}

/// Snapshot a mutable cell for a later compare-and-swap.
#[must_use]
pub fn read_for_cas(mref: MRefId) -> Program<Ticket> {
    Program::prim(move |k| Action::ReadForCas { mref, k })
}

/// Compare-and-swap against a ticket; produces the success flag and a
/// fresh ticket.
#[must_use]
pub fn cas_mref(mref: MRefId, ticket: Ticket, value: Value) -> Program<(bool, Ticket)> {
    Program::prim(move |k| Action::CasMRef {
        mref,
        ticket,
        value,
        k,
    })
}

// ---- STM ----

/// Run a transaction to completion as one atomic step.
#[must_use]
pub fn atomically(tx: Stm) -> Program<Value> {
    Program::prim(move |k| Action::Atomically { tx, k })
}

// ---- Exceptions and masking ----

/// Raise an exception in the executing thread.
#[must_use]
pub fn throw<A: 'static>(exc: Exception) -> Program<A> {
    Program::prim(move |_k| Action::Throw { exc })
}

/// Run `body` with a handler for exceptions accepted by `matches`.
#[must_use]
pub fn catch<A: 'static>(
    body: Program<A>,
    matches: impl Fn(&Exception) -> bool + 'static,
    handler: impl FnOnce(Exception) -> Program<A> + 'static,
) -> Program<A> {
    Program::prim(move |k| {
        let slot = Rc::new(RefCell::new(Some(k)));
        let body_slot = Rc::clone(&slot);
        let handler_slot = slot;
        let body_action = body.into_action(Box::new(move |a| Action::PopCatching {
            k: Box::new(move || {
                let k = body_slot
                    .borrow_mut()
                    .take()
                    .expect("catch continuation resumed twice");
                k(a)
            }),
        }));
        Action::Catching {
            matches: Box::new(matches),
            handler: Box::new(move |e| {
                handler(e).into_action(Box::new(move |a| {
                    let k = handler_slot
                        .borrow_mut()
                        .take()
                        .expect("catch continuation resumed twice");
                    k(a)
                }))
            }),
            body: Box::new(body_action),
        }
    })
}

/// Catch every exception.
#[must_use]
pub fn catch_all<A: 'static>(
    body: Program<A>,
    handler: impl FnOnce(Exception) -> Program<A> + 'static,
) -> Program<A> {
    catch(body, |_| true, handler)
}

/// Catch exceptions with a specific tag.
#[must_use]
pub fn catch_tag<A: 'static>(
    tag: impl Into<String>,
    body: Program<A>,
    handler: impl FnOnce(Exception) -> Program<A> + 'static,
) -> Program<A> {
    let tag = tag.into();
    catch(body, move |e| e.tag == tag, handler)
}

/// Deliver an exception to another thread, blocking until the target is
/// interruptible. Delivering to one's own id raises immediately.
#[must_use]
pub fn throw_to(target: ThreadId, exc: Exception) -> Program<()> {
    Program::prim(move |k| Action::ThrowTo {
        target,
        exc,
        k: Box::new(move || k(())),
    })
}

/// Capability restoring the masking state saved when a mask was entered.
///
/// May be applied any number of times; each application brackets the
/// sub-program with observable masking transitions.
#[derive(Debug, Clone, Copy)]
pub struct Restore {
    outer: MaskingState,
    inner: MaskingState,
}

impl Restore {
    pub(crate) fn new(outer: MaskingState, inner: MaskingState) -> Self {
        Self { outer, inner }
    }

    pub(crate) fn outer(self) -> MaskingState {
        self.outer
    }

    /// Run a sub-program at the saved outer masking state, then return to
    /// the mask's state.
    #[must_use]
    pub fn apply<A: 'static>(&self, p: Program<A>) -> Program<A> {
        let Restore { outer, inner } = *self;
        Program::prim(move |k| Action::SetMasking {
            outer: true,
            mask: outer,
            k: Box::new(move || {
                p.into_action(Box::new(move |a| Action::ResetMasking {
                    outer: true,
                    mask: inner,
                    k: Box::new(move || k(a)),
                }))
            }),
        })
    }
}

/// Run `body` with asynchronous exceptions masked (interruptibly); the
/// capability restores the saved masking state for sub-programs.
#[must_use]
pub fn mask<A: 'static>(body: impl FnOnce(Restore) -> Program<A> + 'static) -> Program<A> {
    mask_with(MaskingState::MaskedInterruptible, body)
}

/// Like [`mask`], but deliveries never land inside the scope.
#[must_use]
pub fn uninterruptible_mask<A: 'static>(
    body: impl FnOnce(Restore) -> Program<A> + 'static,
) -> Program<A> {
    mask_with(MaskingState::MaskedUninterruptible, body)
}

fn mask_with<A: 'static>(
    new_mask: MaskingState,
    body: impl FnOnce(Restore) -> Program<A> + 'static,
) -> Program<A> {
    Program::prim(move |k| Action::Mask {
        mask: new_mask,
        body: Box::new(move |restore| {
            let outer = restore.outer();
            body(restore).into_action(Box::new(move |a| Action::ResetMasking {
                outer: false,
                mask: outer,
                k: Box::new(move || k(a)),
            }))
        }),
    })
}

// ---- Sub-computation ----

/// Run `body` in a nested interpreter; its failure is reified into the
/// result instead of ending the outer run.
#[must_use]
pub fn subconcurrency<A: 'static>(body: Program<A>) -> Program<Result<A, Failure>> {
    Program::prim(move |k| Action::Subconcurrency {
        spawn: Box::new(move || {
            let slot: Rc<RefCell<Option<A>>> = Rc::new(RefCell::new(None));
            let sink = Rc::clone(&slot);
            let action = body.into_action(Box::new(move |a| {
                *sink.borrow_mut() = Some(a);
                Action::Stop
            }));
            SubSpawn {
                action,
                finish: Box::new(move |failure| match failure {
                    Some(f) => k(Err(f)),
                    None => match slot.borrow_mut().take() {
                        Some(a) => k(Ok(a)),
                        None => k(Err(Failure::InternalError)),
                    },
                }),
            }
        }),
    })
}
