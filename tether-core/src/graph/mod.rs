//! Dependency Graph
//!
//! This module tracks the relationships between reactive state and the
//! watchers that read it.
//!
//! # Overview
//!
//! The graph is bipartite:
//!
//! - Dependencies ([`DepId`]) stand for one observable unit of state: a
//!   property slot, or the structure of an observed container.
//! - Watchers ([`WatcherId`]) are the computations that read them.
//!
//! An edge exists when a watcher read a dependency during its last
//! evaluation. It is recorded twice: in the watcher's own dependency set, and
//! in the dependency's subscriber list held by the [`Runtime`].
//!
//! # Design Decisions
//!
//! 1. Both sides refer to each other by id rather than by pointer, so there
//!    are no reference cycles between state and computations.
//!
//! 2. The subscriber registry is global and concurrent. Scheduling is not:
//!    the [`scheduler`] queue belongs to the thread that mutated the state.

mod dep;
mod id;
mod runtime;
pub mod scheduler;

pub use dep::Dep;
pub use id::{DepId, WatcherId};
pub use runtime::Runtime;
