//! Reactive Primitives
//!
//! This module implements the core reactive system: observers, watchers, and
//! computed values. Together with the dependency graph in [`crate::graph`]
//! they form the foundation of Tether's data binding.
//!
//! # Concepts
//!
//! ## Observers
//!
//! [`observe`] converts a plain object or array into reactive state. Every
//! property of an observed object becomes a reactive slot with its own
//! dependency; the container itself gets a collection-level dependency that
//! fires on structural changes (added keys, deleted keys, array mutations).
//!
//! ## Watchers
//!
//! A [`Watcher`] evaluates a getter or a dotted path against a target object.
//! While it evaluates, every reactive slot it reads records it as a
//! subscriber. When one of those slots changes, the watcher is re-run, either
//! synchronously or through the batching scheduler, and its callback fires if
//! the value changed.
//!
//! ## Computed Values
//!
//! A [`Computed`] is a lazy watcher. A change upstream only marks it dirty;
//! the getter runs again on the next read.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to detect
//! dependencies automatically. When a slot is read, we check if a watcher is
//! evaluating and, if so, register the dependency on both sides.

mod computed;
mod context;
mod observer;
mod watcher;

pub use computed::{define_computed, Computed, ComputedDef};
pub use context::{untracked, ReactiveContext};
pub use observer::{define_reactive, del, observe, set, Observer};
pub use watcher::{parse_path, Callback, ComputeFn, Expression, Watcher, WatcherOptions};

pub(crate) use observer::{array_mutated, ReactiveSlot};
pub(crate) use watcher::WeakWatcher;
