//! Typed identifiers and the monotonic id source.
//!
//! Every resource in a run — threads, blocking cells, mutable cells,
//! transactional vars — is named by an *(optional label, integer)* pair.
//! Identity, ordering, and hashing use the integer only; the label exists
//! for humans reading traces. The [`IdSource`] mints ids monotonically for
//! the lifetime of one run and disambiguates reused labels by appending
//! `-1`, `-2`, … to later mints.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Token identifying the run (strictly: the [`IdSource`]) a cell id was
/// minted by.
///
/// Cell ids from a previous run can collide numerically with the current
/// run's; the interpreter compares tokens at access time and rejects
/// foreign ids instead of silently aliasing a fresh cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunToken(u64);

static NEXT_RUN_TOKEN: AtomicU64 = AtomicU64::new(1);

impl RunToken {
    fn fresh() -> Self {
        Self(NEXT_RUN_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $tokened:tt) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            name: Option<String>,
            id: i64,
            #[serde(skip)]
            #[allow(dead_code)]
            token: RunToken,
        }

        impl $name {
            /// The raw integer identity.
            #[must_use]
            pub fn raw(&self) -> i64 {
                self.id
            }

            /// The disambiguated label, if one was supplied at mint time.
            #[must_use]
            pub fn label(&self) -> Option<&str> {
                self.name.as_deref()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $name {}

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.id.cmp(&other.id)
            }
        }

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match &self.name {
                    Some(name) => f.write_str(name),
                    None => write!(f, "{}", self.id),
                }
            }
        }

        define_id!(@token $name, $tokened);
    };
    (@token $name:ident, tokened) => {
        impl $name {
            /// Whether this id was minted by the source holding `token`.
            #[must_use]
            pub fn minted_by(&self, token: RunToken) -> bool {
                self.token == token
            }
        }
    };
    (@token $name:ident, untokened) => {};
}

define_id! {
    /// Identifier of a simulated thread.
    ///
    /// The main thread is always id 0; commit pseudo-threads use negative
    /// ids so they sort before every user thread in runnable lists.
    ThreadId, untokened
}

define_id! {
    /// Identifier of a blocking single-slot cell.
    MVarId, tokened
}

define_id! {
    /// Identifier of a memory-model-aware mutable cell.
    MRefId, tokened
}

define_id! {
    /// Identifier of a transactional variable.
    TVarId, tokened
}

impl ThreadId {
    /// The reserved main thread, id 0.
    pub const MAIN: Self = Self {
        name: None,
        id: 0,
        token: RunToken(0),
    };

    /// Commit pseudo-thread for write-buffer slot `slot`.
    ///
    /// Slot 0 maps to id -1, slot 1 to -2, and so on; the mapping is
    /// stable for the lifetime of a run.
    #[must_use]
    pub fn commit(slot: u64) -> Self {
        Self {
            name: None,
            id: -1 - slot as i64,
            token: RunToken(0),
        }
    }

    /// Whether this is a commit pseudo-thread (negative id).
    #[must_use]
    pub fn is_commit(&self) -> bool {
        self.id < 0
    }

    /// Whether this is the main thread.
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.id == 0
    }
}

/// Monotonic id allocator for one run.
///
/// Thread ids start at 1 (0 is reserved for the main thread); cell ids
/// start at 0. Labels are disambiguated per kind: the first `next_mvar
/// (Some("lock"))` yields `lock`, the second `lock-1`, the third `lock-2`.
#[derive(Debug)]
pub struct IdSource {
    token: RunToken,
    next_thread: i64,
    next_mvar: i64,
    next_mref: i64,
    next_tvar: i64,
    thread_names: BTreeMap<String, u64>,
    mvar_names: BTreeMap<String, u64>,
    mref_names: BTreeMap<String, u64>,
    tvar_names: BTreeMap<String, u64>,
}

fn disambiguate(used: &mut BTreeMap<String, u64>, base: &str) -> String {
    let count = used.entry(base.to_string()).or_insert(0);
    let label = if *count == 0 {
        base.to_string()
    } else {
        format!("{base}-{count}")
    };
    *count += 1;
    label
}

impl IdSource {
    /// Create a source for a new run.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: RunToken::fresh(),
            next_thread: 1,
            next_mvar: 0,
            next_mref: 0,
            next_tvar: 0,
            thread_names: BTreeMap::new(),
            mvar_names: BTreeMap::new(),
            mref_names: BTreeMap::new(),
            tvar_names: BTreeMap::new(),
        }
    }

    /// The token stamped onto cell ids minted by this source.
    #[must_use]
    pub fn token(&self) -> RunToken {
        self.token
    }

    /// Mint a thread id.
    pub fn next_thread(&mut self, name: Option<&str>) -> ThreadId {
        let id = self.next_thread;
        self.next_thread += 1;
        ThreadId {
            name: name.map(|n| disambiguate(&mut self.thread_names, n)),
            id,
            token: RunToken(0),
        }
    }

    /// Mint a blocking-cell id.
    pub fn next_mvar(&mut self, name: Option<&str>) -> MVarId {
        let id = self.next_mvar;
        self.next_mvar += 1;
        MVarId {
            name: name.map(|n| disambiguate(&mut self.mvar_names, n)),
            id,
            token: self.token,
        }
    }

    /// Mint a mutable-cell id.
    pub fn next_mref(&mut self, name: Option<&str>) -> MRefId {
        let id = self.next_mref;
        self.next_mref += 1;
        MRefId {
            name: name.map(|n| disambiguate(&mut self.mref_names, n)),
            id,
            token: self.token,
        }
    }

    /// Mint a transactional-var id.
    pub fn next_tvar(&mut self, name: Option<&str>) -> TVarId {
        let id = self.next_tvar;
        self.next_tvar += 1;
        TVarId {
            name: name.map(|n| disambiguate(&mut self.tvar_names, n)),
            id,
            token: self.token,
        }
    }
}

impl Default for IdSource {
    fn default() -> Self {
        Self::new()
    }
}
