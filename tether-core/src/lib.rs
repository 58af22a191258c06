//! Tether Core
//!
//! This crate provides the core runtime for the Tether reactive data-binding
//! library. It implements:
//!
//! - Observable objects and arrays (getter/setter interception)
//! - Dependency tracking between state and the watchers that read it
//! - Computed values with lazy re-evaluation
//! - A batching scheduler that coalesces updates into one flush per tick
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: the dynamic [`Value`] model, with shared objects and arrays
//! - `graph`: dependency ids, the subscriber registry and the scheduler
//! - `reactive`: observers, watchers and computed values
//! - `instance`: root data, proxies, computed properties and watchers bundled
//!   the way a component uses them
//! - `config` and `error`: runtime settings and the error/warning channels
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use serde_json::json;
//! use tether_core::graph::scheduler;
//! use tether_core::{Instance, InstanceOptions, Value, WatchOptions};
//!
//! let data = Value::from(json!({ "a": { "b": 1 } }));
//! let instance = Instance::new(InstanceOptions::new().data(data.as_object().cloned().unwrap()));
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let seen_clone = seen.clone();
//! instance.watch(
//!     "a.b",
//!     move |new, old| seen_clone.lock().unwrap().push((new.clone(), old.clone())),
//!     WatchOptions::default(),
//! );
//!
//! instance.get("a").as_object().unwrap().set("b", 2);
//! instance.get("a").as_object().unwrap().set("b", 3);
//!
//! // Both writes land in one flush.
//! scheduler::flush();
//! assert_eq!(seen.lock().unwrap().as_slice(), [(Value::from(3), Value::from(1))]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod instance;
pub mod reactive;
pub mod value;

pub use config::Config;
pub use error::{ReactiveError, Result};
pub use instance::{DataSource, Instance, InstanceOptions, WatchOptions};
pub use reactive::{
    define_computed, define_reactive, del, observe, set, untracked, Computed, ComputedDef,
    Expression, Observer, Watcher, WatcherOptions,
};
pub use value::{Array, Key, Object, Value};
