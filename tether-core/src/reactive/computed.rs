//! Computed Values
//!
//! A computed value is a lazy watcher with a read contract on top.
//!
//! # How Computed Values Work
//!
//! 1. Nothing runs at creation. The watcher starts dirty.
//!
//! 2. On read, a dirty watcher evaluates and caches its value. Reads while
//!    clean return the cache without calling the getter.
//!
//! 3. When an upstream dependency changes, the watcher is only marked dirty.
//!    The getter runs again on the next read, if there is one.
//!
//! 4. If another watcher is evaluating when the computed value is read, every
//!    dependency of the computed watcher is handed to that outer watcher. A
//!    render function reading `full_name` therefore re-runs when `first` or
//!    `last` changes, even though it never read them itself.

use std::fmt;
use std::sync::Arc;

use super::context::ReactiveContext;
use super::watcher::{ComputeFn, Expression, Watcher, WatcherOptions};
use crate::error::{handle_error, warn, Result};
use crate::value::{Getter, Object, Property, Setter, Value};

const COMPUTED_OPTIONS: WatcherOptions = WatcherOptions {
    lazy: true,
    deep: false,
    sync: false,
};

/// A memoized derived value.
#[derive(Clone)]
pub struct Computed {
    watcher: Watcher,
}

impl Computed {
    /// Create a computed value over `target`. The getter does not run until
    /// the first [`get`](Computed::get).
    pub fn new<F>(target: &Object, getter: F) -> Self
    where
        F: Fn(&Object) -> Result<Value> + Send + Sync + 'static,
    {
        Self::from_fn(target, Arc::new(getter))
    }

    fn from_fn(target: &Object, getter: ComputeFn) -> Self {
        Self {
            watcher: Watcher::without_callback(target, Expression::Getter(getter), COMPUTED_OPTIONS),
        }
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> Value {
        if self.watcher.is_dirty() {
            self.watcher.evaluate();
        }
        if ReactiveContext::is_active() {
            self.watcher.depend();
        }
        self.watcher.value()
    }

    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    /// The lazy watcher behind this value.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("watcher", &self.watcher)
            .finish()
    }
}

/// Definition of a computed property.
#[derive(Clone)]
pub struct ComputedDef {
    pub get: Option<ComputeFn>,
    pub set: Option<Setter>,
    /// Read through the memoized watcher. When false, every read calls the
    /// getter directly.
    pub cache: bool,
}

impl ComputedDef {
    pub fn getter<F>(get: F) -> Self
    where
        F: Fn(&Object) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            get: Some(Arc::new(get)),
            set: None,
            cache: true,
        }
    }

    pub fn with_setter<F>(mut self, set: F) -> Self
    where
        F: Fn(&Object, Value) + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(set));
        self
    }

    pub fn uncached(mut self) -> Self {
        self.cache = false;
        self
    }
}

impl Default for ComputedDef {
    fn default() -> Self {
        Self {
            get: None,
            set: None,
            cache: true,
        }
    }
}

/// Install `key` on `target` as a computed accessor.
///
/// Returns `None`, with a warning, if the key already exists. A missing
/// getter is replaced by one that yields `Undefined`; a missing setter by one
/// that warns on assignment.
pub fn define_computed(target: &Object, key: &str, def: ComputedDef) -> Option<Computed> {
    if target.contains_key(key) {
        warn(&format!("The computed property \"{key}\" is already defined on the instance."));
        return None;
    }

    let getter = def.get.unwrap_or_else(|| {
        warn(&format!("Getter is missing for computed property \"{key}\"."));
        Arc::new(|_: &Object| -> Result<Value> { Ok(Value::Undefined) })
    });
    let computed = Computed::from_fn(target, getter.clone());

    let get: Getter = if def.cache {
        let computed = computed.clone();
        Arc::new(move |_: &Object| computed.get())
    } else {
        let context = format!("computed getter \"{key}\"");
        Arc::new(move |obj: &Object| match getter(obj) {
            Ok(value) => value,
            Err(err) => {
                handle_error(&err, &context);
                Value::Undefined
            }
        })
    };

    let set: Setter = def.set.unwrap_or_else(|| {
        let key = key.to_string();
        Arc::new(move |_: &Object, _: Value| {
            warn(&format!("Computed property \"{key}\" was assigned to but it has no setter."));
        })
    });

    target.define_property(key, Property::accessor(Some(get), Some(set)));
    Some(computed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::observe;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn data(value: serde_json::Value) -> Object {
        let value = Value::from(value);
        observe(&value, false);
        value.as_object().cloned().unwrap()
    }

    fn number(value: &Value) -> f64 {
        value.as_f64().unwrap_or(0.0)
    }

    #[test]
    fn computed_is_lazy_and_cached() {
        let vm = data(json!({ "a": 1 }));
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let doubled = Computed::new(&vm, move |vm| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Value::from(number(&vm.get("a")) * 2.0))
        });

        // Not computed yet
        assert!(doubled.is_dirty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // First access triggers computation
        assert_eq!(doubled.get(), Value::from(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Second access should use cache
        assert_eq!(doubled.get(), Value::from(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn upstream_change_marks_dirty_without_running() {
        let vm = data(json!({ "a": 1 }));
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let doubled = Computed::new(&vm, move |vm| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Value::from(number(&vm.get("a")) * 2.0))
        });
        doubled.get();

        vm.set("a", 5);
        assert!(doubled.is_dirty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(doubled.get(), Value::from(10));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn outer_watcher_inherits_computed_dependencies() {
        let vm = data(json!({ "first": "Ada", "last": "Lovelace" }));
        let full = Computed::new(&vm, |vm| {
            Ok(Value::from(format!(
                "{} {}",
                vm.get("first").to_display_string(),
                vm.get("last").to_display_string()
            )))
        });

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let reader = full.clone();
        let render = Watcher::new(
            &vm,
            Expression::getter(move |_| Ok(reader.get())),
            move |new, _| seen_clone.lock().push(new.to_display_string()),
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );

        let first_dep = vm.dependency("first").unwrap();
        assert!(render.dep_ids().contains(&first_dep));
        assert!(first_dep.subscribers().contains(&render.id()));

        vm.set("last", "Byron");
        assert_eq!(seen.lock().as_slice(), ["Ada Byron".to_string()]);
    }

    #[test]
    fn nested_evaluation_restores_outer_context() {
        let vm = data(json!({ "a": 1, "b": 2 }));
        let inner = Computed::new(&vm, |vm| Ok(vm.get("a")));

        let reader = inner.clone();
        let outer = Watcher::without_callback(
            &vm,
            Expression::getter(move |vm| {
                let a = reader.get();
                // Still tracked by the outer watcher after the inner one popped
                let b = vm.get("b");
                Ok(Value::from(number(&a) + number(&b)))
            }),
            WatcherOptions::default(),
        );

        assert_eq!(outer.value(), Value::from(3));
        let b_dep = vm.dependency("b").unwrap();
        assert!(outer.dep_ids().contains(&b_dep));
        assert!(!inner.watcher().dep_ids().contains(&b_dep));
    }

    #[test]
    fn define_computed_installs_accessor() {
        let vm = data(json!({ "a": 2 }));
        let computed = define_computed(
            &vm,
            "squared",
            ComputedDef::getter(|vm| {
                let a = number(&vm.get("a"));
                Ok(Value::from(a * a))
            })
            .with_setter(|vm, value| vm.set("a", number(&value).sqrt())),
        )
        .unwrap();

        assert_eq!(vm.get("squared"), Value::from(4));
        vm.set("squared", 9);
        assert_eq!(vm.get("a"), Value::from(3));
        assert_eq!(computed.get(), Value::from(9));
    }

    #[test]
    fn define_computed_warns_on_missing_parts() {
        let vm = data(json!({ "a": 1 }));
        let warnings = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let warnings_clone = warnings.clone();
        crate::error::set_warn_handler(move |msg| warnings_clone.borrow_mut().push(msg.to_string()));

        let missing = define_computed(&vm, "nothing", ComputedDef::default()).unwrap();
        assert!(missing.get().is_undefined());

        vm.set("nothing", 1);
        assert!(define_computed(&vm, "a", ComputedDef::getter(|_| Ok(Value::Null))).is_none());
        crate::error::clear_handlers();

        let warnings = warnings.borrow();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("Getter is missing"));
        assert!(warnings[1].contains("has no setter"));
        assert!(warnings[2].contains("already defined"));
    }

    #[test]
    fn uncached_computed_calls_getter_every_time() {
        let vm = data(json!({ "a": 1 }));
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        define_computed(
            &vm,
            "plain",
            ComputedDef::getter(move |vm| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(vm.get("a"))
            })
            .uncached(),
        );

        vm.get("plain");
        vm.get("plain");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
