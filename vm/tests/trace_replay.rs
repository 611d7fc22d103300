//! Trace serialization round-trips and replay equality.

#[allow(dead_code)]
mod helpers;

use skein_types::Value;
use skein_vm::program::{
    atomically, fork, new_empty_mvar, put_mvar, take_mvar, yield_now,
};
use skein_vm::trace::{trace_from_json, trace_to_json};
use skein_vm::{run_default, Program, RandomScheduler, RoundRobin, Stm};

fn sample_program() -> Program<Value> {
    new_empty_mvar().bind(|m| {
        atomically(Stm::new_tvar(Value::Int(0))).bind(move |tvv| {
            let tv = tvv.as_tvar().expect("tvar ref").clone();
            fork(
                atomically(Stm::write(tv.clone(), Value::Int(1)))
                    .then(put_mvar(m.clone(), Value::Int(7))),
            )
            .then(yield_now())
            .then(take_mvar(m))
        })
    })
}

#[test]
fn traces_round_trip_through_json() {
    let outcome = run_default(&mut RandomScheduler::new(42), sample_program()).unwrap();
    let json = trace_to_json(&outcome.trace).unwrap();
    let back = trace_from_json(&json).unwrap();
    assert_eq!(outcome.trace, back);
}

#[test]
fn equal_seeds_replay_identically() {
    let first = run_default(&mut RandomScheduler::new(1234), sample_program()).unwrap();
    let second = run_default(&mut RandomScheduler::new(1234), sample_program()).unwrap();
    assert_eq!(first.result, second.result);
    assert_eq!(first.trace, second.trace);
    assert_eq!(
        trace_to_json(&first.trace).unwrap(),
        trace_to_json(&second.trace).unwrap()
    );
}

#[test]
fn cooperative_runs_replay_identically() {
    let first = run_default(&mut RoundRobin, sample_program()).unwrap();
    let second = run_default(&mut RoundRobin, sample_program()).unwrap();
    assert_eq!(first.result, Ok(Value::Int(7)));
    assert_eq!(first.trace, second.trace);
}

#[test]
fn malformed_trace_json_is_rejected() {
    assert!(trace_from_json("not a trace").is_err());
    assert!(trace_from_json("{\"decision\": 3}").is_err());
}
