//! Deterministic interpreter for concurrent programs.
//!
//! This crate executes a user-supplied concurrent program one primitive
//! action at a time under a pluggable scheduler, so every interleaving
//! decision is externally chosen, observable, and reproducible. A run
//! yields the program's value or a classified failure, plus the full trace
//! of scheduling decisions and thread actions — the raw material for
//! systematic concurrency testing.
//!
//! # Architecture
//!
//! - **Actions** ([`action::Action`]): defunctionalised CPS tree of
//!   primitive operations; the interpreter looks one node deep.
//! - **Programs** ([`program::Program`]): typed builder combinators over
//!   the action algebra (fork/cells/STM/exceptions/masking).
//! - **Threads** (internal table): continuation, blocked-on reason,
//!   handler stack, masking state; block/wake/kill.
//! - **Cells**: blocking single-slot cells, memory-model-aware mutable
//!   cells with commit pseudo-threads, transactional vars.
//! - **Scheduler** ([`sched::Scheduler`]): externally supplied policy; the
//!   interpreter itself makes no choices and has no randomness.
//! - **Trace** ([`trace`]): decisions, thread actions, lookaheads;
//!   serializable for replay comparison.
//!
//! # Usage
//!
//! ```
//! use skein_types::Value;
//! use skein_vm::program::{fork, new_empty_mvar, put_mvar, take_mvar};
//! use skein_vm::sched::RoundRobin;
//! use skein_vm::vm::run_default;
//!
//! let program = new_empty_mvar().bind(|m| {
//!     fork(put_mvar(m.clone(), Value::Int(7))).then(take_mvar(m))
//! });
//! let outcome = run_default(&mut RoundRobin, program).unwrap();
//! assert_eq!(outcome.result, Ok(Value::Int(7)));
//! ```

pub mod action;
pub mod program;
pub mod sched;
pub mod stm;
pub mod trace;
pub mod vm;

mod error;
mod mref;
mod mvar;
mod thread;

pub use action::Exception;
pub use error::VMError;
pub use mref::Ticket;
pub use program::{Program, Restore};
pub use sched::{RandomScheduler, RoundRobin, Scheduler, ScriptScheduler};
pub use stm::{Stm, TAction};
pub use trace::{Decision, Lookahead, ThreadAction, Trace, TraceEntry};
pub use vm::{run, run_default, RunOutcome, VMConfig};
