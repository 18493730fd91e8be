//! A cgroup v1 backend mediating per-resource-group CPU, CPU-set and memory limits for a
//! multi-process database server.
//!
//! The database hands this crate two things: a *group identifier* (an opaque non-zero integer,
//! plus the reserved ids in [`types`]) and a set of [`context::Tunables`]. Everything else
//! (discovering which controllers are mounted where, maintaining the group directory hierarchy,
//! migrating pids between groups, and translating percentages/chunks into kernel units) is
//! handled behind the [`backend::Backend`] trait.

pub mod backend;
pub mod context;
pub mod discovery;
pub mod error;
pub mod group;
pub mod limit;
pub mod path;
pub mod perm;
pub mod probe;
pub mod types;

#[cfg(test)]
mod testutil;

pub use backend::{Backend, CgroupV1Backend};
pub use context::{Context, Tunables};
pub use error::{Error, ErrorKind, Result};
pub use types::{Controller, DEFAULT_CPUSET, ROOT, SYSTEM};
