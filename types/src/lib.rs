//! Shared vocabulary for the skein deterministic concurrency interpreter.
//!
//! This crate holds the types that flow between the interpreter, user
//! programs, schedulers, and trace consumers: typed identifiers and the
//! id source, runtime values, masking states, memory models, and the
//! failure taxonomy. The interpreter itself lives in `skein-vm`.

mod failure;
mod ids;
mod masking;
mod memory;
mod value;

pub use failure::Failure;
pub use ids::{IdSource, MRefId, MVarId, RunToken, TVarId, ThreadId};
pub use masking::MaskingState;
pub use memory::MemoryModel;
pub use value::Value;
