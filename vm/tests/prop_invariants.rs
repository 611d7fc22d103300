//! Property-based invariants: determinism, trace validity, and
//! handler/masking balance over generated programs and schedules.

#[allow(dead_code)]
mod helpers;

use std::collections::BTreeSet;

use proptest::prelude::*;
use skein_types::Value as RtValue;
use skein_types::{MRefId, MVarId, TVarId, ThreadId};
use skein_vm::program::{
    atomic_modify_mref, atomically, catch_all, fork, mask, new_empty_mvar, new_mref, pure,
    put_mvar, take_mvar, throw, try_put_mvar, try_take_mvar, write_mref, yield_now,
};
use skein_vm::trace::{preemption_count, thread_per_entry, Decision, ThreadAction, TraceEntry};
use skein_vm::{run_default, Exception, Program, RandomScheduler, Stm};

/// One primitive step of a generated thread.
#[derive(Debug, Clone)]
enum Op {
    Yield,
    Ret,
    Put(i64),
    TryPut(i64),
    Take,
    TryTake,
    WriteRef(i64),
    Modify,
    StmWrite(i64),
    CatchOk,
    CatchThrow,
    Mask,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Yield),
        Just(Op::Ret),
        (0..8i64).prop_map(Op::Put),
        (0..8i64).prop_map(Op::TryPut),
        Just(Op::Take),
        Just(Op::TryTake),
        (0..8i64).prop_map(Op::WriteRef),
        Just(Op::Modify),
        (1..4i64).prop_map(Op::StmWrite),
        Just(Op::CatchOk),
        Just(Op::CatchThrow),
        Just(Op::Mask),
    ]
}

fn threads_strategy() -> impl Strategy<Value = Vec<Vec<Op>>> {
    prop::collection::vec(prop::collection::vec(op_strategy(), 0..6), 1..4)
}

fn op_program(op: Op, m: &MVarId, r: &MRefId, tv: &TVarId) -> Program<()> {
    match op {
        Op::Yield => yield_now(),
        Op::Ret => skein_vm::program::ret(()),
        Op::Put(v) => put_mvar(m.clone(), RtValue::Int(v)),
        Op::TryPut(v) => try_put_mvar(m.clone(), RtValue::Int(v)).map(|_| ()),
        Op::Take => take_mvar(m.clone()).map(|_| ()),
        Op::TryTake => try_take_mvar(m.clone()).map(|_| ()),
        Op::WriteRef(v) => write_mref(r.clone(), RtValue::Int(v)),
        Op::Modify => atomic_modify_mref(r.clone(), |v| {
            let n = v.as_int().unwrap_or(0);
            (RtValue::Int(n + 1), RtValue::Unit)
        })
        .map(|_| ()),
        Op::StmWrite(v) => atomically(Stm::write(tv.clone(), RtValue::Int(v))).map(|_| ()),
        Op::CatchOk => catch_all(yield_now(), |_| pure(())),
        Op::CatchThrow => catch_all(throw(Exception::new("Generated")), |_| pure(())),
        Op::Mask => mask(|_| yield_now()),
    }
}

fn thread_program(ops: Vec<Op>, m: &MVarId, r: &MRefId, tv: &TVarId) -> Program<()> {
    let mut program = pure(());
    for op in ops {
        program = program.then(op_program(op, m, r, tv));
    }
    program
}

/// Shared cells, one forked thread per op list, main finishes on its own.
fn build(threads: Vec<Vec<Op>>) -> Program<()> {
    new_empty_mvar().bind(move |m| {
        new_mref(RtValue::Int(0)).bind(move |r| {
            atomically(Stm::new_tvar(RtValue::Int(0))).bind(move |tvv| {
                let tv = tvv.as_tvar().expect("tvar ref").clone();
                let mut program: Program<()> = pure(());
                for ops in threads {
                    let body = thread_program(ops, &m, &r, &tv);
                    program = program.then(fork(body).map(|_| ()));
                }
                program.then(yield_now()).then(yield_now())
            })
        })
    })
}

fn assert_trace_valid(trace: &[TraceEntry]) {
    let tids = thread_per_entry(trace);
    let mut started: BTreeSet<ThreadId> = BTreeSet::new();
    for (i, entry) in trace.iter().enumerate() {
        match &entry.decision {
            Decision::Start(t) => {
                assert!(started.insert(t.clone()), "thread started twice: {t}");
            }
            Decision::SwitchTo(t) => {
                assert!(i > 0, "a run cannot begin with a switch");
                assert_ne!(&tids[i - 1], t, "switch to the thread already running");
                assert!(started.contains(t), "switch to a never-started thread");
            }
            Decision::Continue => {
                assert!(i > 0, "a run cannot begin with a continue");
                assert_eq!(tids[i - 1], tids[i], "continue changed threads");
            }
        }
    }
    if let Some(first) = trace.first() {
        assert_eq!(first.decision, Decision::Start(ThreadId::MAIN));
    }
}

fn assert_balances(trace: &[TraceEntry]) {
    let tids = thread_per_entry(trace);
    let threads: BTreeSet<_> = tids.iter().cloned().collect();
    for tid in threads {
        let mut catching = 0i64;
        let mut masking = 0i64;
        for (entry, owner) in trace.iter().zip(&tids) {
            if *owner != tid {
                continue;
            }
            match entry.action {
                ThreadAction::Catching => catching += 1,
                ThreadAction::PopCatching => catching -= 1,
                ThreadAction::SetMasking(..) => masking += 1,
                ThreadAction::ResetMasking(..) => masking -= 1,
                _ => {}
            }
            assert!(catching >= 0, "handler stack underflow on {tid}");
            assert!(masking >= 0, "masking underflow on {tid}");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        ..ProptestConfig::default()
    })]

    #[test]
    fn identical_inputs_give_identical_runs(
        threads in threads_strategy(),
        seed in any::<u64>(),
    ) {
        let first = run_default(&mut RandomScheduler::new(seed), build(threads.clone())).unwrap();
        let second = run_default(&mut RandomScheduler::new(seed), build(threads)).unwrap();
        prop_assert_eq!(first.result, second.result);
        prop_assert_eq!(first.trace, second.trace);
    }

    #[test]
    fn traces_are_structurally_valid(
        threads in threads_strategy(),
        seed in any::<u64>(),
    ) {
        let outcome = run_default(&mut RandomScheduler::new(seed), build(threads)).unwrap();
        assert_trace_valid(&outcome.trace);
        assert_balances(&outcome.trace);
        prop_assert!(preemption_count(&outcome.trace) <= outcome.trace.len());
    }

    #[test]
    fn fork_count_matches_distinct_child_ids(
        threads in threads_strategy(),
        seed in any::<u64>(),
    ) {
        let outcome = run_default(&mut RandomScheduler::new(seed), build(threads)).unwrap();
        let forked: Vec<_> = outcome
            .trace
            .iter()
            .filter_map(|e| match &e.action {
                ThreadAction::Fork(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        let distinct: BTreeSet<_> = forked.iter().cloned().collect();
        prop_assert_eq!(forked.len(), distinct.len());
        let stepped: BTreeSet<_> = thread_per_entry(&outcome.trace)
            .into_iter()
            .filter(|t| !t.is_main() && !t.is_commit())
            .collect();
        prop_assert!(stepped.is_subset(&distinct));
    }
}
