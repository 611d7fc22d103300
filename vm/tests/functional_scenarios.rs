//! End-to-end scenarios: literal programs with known outcomes and traces.

#[allow(dead_code)]
mod helpers;

use skein_types::{Failure, ThreadId, Value};
use skein_vm::program::{
    atomically, cas_mref, catch_tag, fork, my_thread_id, new_empty_mvar, new_mref, pure,
    put_mvar, read_for_cas, read_mref, take_mvar, throw_to, try_take_mvar, write_mref,
};
use skein_vm::trace::{Decision, ThreadAction};
use skein_vm::{run_default, Exception, RoundRobin, Stm};

use helpers::{actions, has_action, mvar, tid};

#[test]
fn empty_take_deadlocks() {
    let program = new_empty_mvar().bind(take_mvar);
    let outcome = run_default(&mut RoundRobin, program).unwrap();
    assert_eq!(outcome.result, Err(Failure::Deadlock));
    assert!(has_action(&outcome.trace, &ThreadAction::BlockedTake(mvar(0))));
}

#[test]
fn try_take_on_empty_returns_none() {
    let program = new_empty_mvar().bind(try_take_mvar);
    let outcome = run_default(&mut RoundRobin, program).unwrap();
    assert_eq!(outcome.result, Ok(None));
    assert!(has_action(
        &outcome.trace,
        &ThreadAction::TryTake(mvar(0), false, vec![]),
    ));
}

#[test]
fn fork_and_join_returns_the_sent_value() {
    let program = new_empty_mvar()
        .bind(|m| fork(put_mvar(m.clone(), Value::Int(7))).then(take_mvar(m)));
    let outcome = run_default(&mut RoundRobin, program).unwrap();
    assert_eq!(outcome.result, Ok(Value::Int(7)));

    let m = mvar(0);
    assert_eq!(
        actions(&outcome.trace),
        vec![
            ThreadAction::NewMVar(m.clone()),
            ThreadAction::Fork(tid(1)),
            ThreadAction::BlockedTake(m.clone()),
            ThreadAction::Put(m.clone(), vec![ThreadId::MAIN]),
            ThreadAction::Stop,
            ThreadAction::Take(m, vec![]),
            ThreadAction::Stop,
        ]
    );
}

#[test]
fn fork_and_join_trace_decisions_are_valid() {
    let program = new_empty_mvar()
        .bind(|m| fork(put_mvar(m.clone(), Value::Int(7))).then(take_mvar(m)));
    let outcome = run_default(&mut RoundRobin, program).unwrap();

    assert_eq!(outcome.trace[0].decision, Decision::Start(ThreadId::MAIN));
    assert_eq!(outcome.trace[1].decision, Decision::Continue);
    assert_eq!(outcome.trace[2].decision, Decision::Continue);
    assert_eq!(outcome.trace[3].decision, Decision::Start(tid(1)));
    assert_eq!(outcome.trace[4].decision, Decision::Continue);
    assert_eq!(outcome.trace[5].decision, Decision::SwitchTo(ThreadId::MAIN));
    assert_eq!(outcome.trace[6].decision, Decision::Continue);
}

#[test]
fn cas_fails_after_an_intervening_write() {
    let program = new_mref(Value::Int(5)).bind(|r| {
        let r_for_read = r.clone();
        read_for_cas(r.clone()).bind(move |ticket| {
            write_mref(r.clone(), Value::Int(6))
                .then(cas_mref(r, ticket, Value::Int(7)))
                .bind(move |(swapped, _)| {
                    read_mref(r_for_read).map(move |seen| (swapped, seen))
                })
        })
    });
    let outcome = run_default(&mut RoundRobin, program).unwrap();
    assert_eq!(outcome.result, Ok((false, Value::Int(6))));
    assert!(has_action(
        &outcome.trace,
        &ThreadAction::CasMRef(helpers::mref(0), false),
    ));
}

#[test]
fn stm_retry_observes_the_write_that_woke_it() {
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

    let blocked = outcome
        .trace
        .iter()
        .position(|e| matches!(e.action, ThreadAction::BlockedSTM(_)))
        .expect("waiter blocks first");
    let commit = outcome
        .trace
        .iter()
        .position(|e| matches!(e.action, ThreadAction::STM(_, ref woken) if woken == &vec![ThreadId::MAIN]))
        .expect("writer wakes the waiter");
    assert!(blocked < commit);
}

#[test]
fn throw_to_self_without_a_handler_is_uncaught() {
    let program =
        my_thread_id().bind(|me| throw_to(me, Exception::new("Overflow")));
    let outcome = run_default(&mut RoundRobin, program).unwrap();
    assert_eq!(outcome.result, Err(Failure::UncaughtException));
}

#[test]
fn throw_to_self_with_a_handler_is_caught() {
    let program = catch_tag(
        "Overflow",
        my_thread_id()
            .bind(|me| throw_to(me, Exception::new("Overflow")))
            .then(pure(false)),
        |_| pure(true),
    );
    let outcome = run_default(&mut RoundRobin, program).unwrap();
    assert_eq!(outcome.result, Ok(true));
}

// ---- Round-trip laws ----

#[test]
fn put_then_take_round_trips() {
    let program = new_empty_mvar().bind(|m| {
        put_mvar(m.clone(), Value::Str("x".into())).then(take_mvar(m))
    });
    let outcome = run_default(&mut RoundRobin, program).unwrap();
    assert_eq!(outcome.result, Ok(Value::Str("x".into())));
}

#[test]
fn cas_with_a_fresh_ticket_succeeds() {
    let program = new_mref(Value::Int(5)).bind(|r| {
        read_for_cas(r.clone()).bind(move |ticket| cas_mref(r, ticket, Value::Int(7)))
    });
    let outcome = run_default(&mut RoundRobin, program).unwrap();
    let (swapped, fresh) = outcome.result.expect("run succeeds");
    assert!(swapped);
    assert_eq!(fresh.value(), &Value::Int(7));
}

#[test]
fn stm_write_then_read_round_trips() {
    let program = atomically(Stm::new_tvar(Value::Int(0))).bind(|v| {
        let tvar = v.as_tvar().expect("tvar ref").clone();
        let read_back = atomically(Stm::read(tvar.clone()));
        atomically(Stm::write(tvar, Value::Int(42))).then(read_back)
    });
    let outcome = run_default(&mut RoundRobin, program).unwrap();
    assert_eq!(outcome.result, Ok(Value::Int(42)));
}

#[test]
fn read_does_not_empty_the_cell() {
    let program = new_empty_mvar().bind(|m| {
        put_mvar(m.clone(), Value::Int(3))
            .then(skein_vm::program::read_mvar(m.clone()))
            .then(take_mvar(m))
    });
    let outcome = run_default(&mut RoundRobin, program).unwrap();
    assert_eq!(outcome.result, Ok(Value::Int(3)));
    assert!(has_action(&outcome.trace, &ThreadAction::Read(mvar(0))));
}
