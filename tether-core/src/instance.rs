//! Instances
//!
//! An [`Instance`] ties the primitives together the way a component does:
//!
//! - a root data object, observed as root data,
//! - a root-instance object (`vm`) that proxies every public data key,
//! - computed properties installed on the `vm`,
//! - watchers bound to the `vm`, torn down together by [`Instance::destroy`].
//!
//! Keys starting with `$` or `_` are reserved and stay reachable only through
//! [`Instance::data`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{handle_error, warn, Result};
use crate::reactive::{
    define_computed, observe, untracked, Computed, ComputedDef, Expression, Watcher, WatcherOptions,
};
use crate::value::{Object, Property, Value};

/// Produces the root data of an instance. Receives the instance object.
pub type DataFactory = Arc<dyn Fn(&Object) -> Result<Value> + Send + Sync>;

/// Where an instance gets its root data from.
#[derive(Clone, Default)]
pub enum DataSource {
    #[default]
    None,
    Object(Object),
    Factory(DataFactory),
}

/// Options for [`Instance::new`].
#[derive(Clone, Default)]
pub struct InstanceOptions {
    pub data: DataSource,
    pub computed: IndexMap<String, ComputedDef>,
}

impl InstanceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(mut self, data: impl Into<Object>) -> Self {
        self.data = DataSource::Object(data.into());
        self
    }

    pub fn data_fn<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Object) -> Result<Value> + Send + Sync + 'static,
    {
        self.data = DataSource::Factory(Arc::new(factory));
        self
    }

    pub fn computed(mut self, key: impl Into<String>, def: ComputedDef) -> Self {
        self.computed.insert(key.into(), def);
        self
    }
}

/// Options for [`Instance::watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub deep: bool,
    pub sync: bool,
    /// Invoke the callback once on creation with the initial value.
    pub immediate: bool,
}

pub struct Instance {
    vm: Object,
    data: Object,
    computed: IndexMap<String, Computed>,
    watchers: Mutex<Vec<Watcher>>,
    destroyed: AtomicBool,
}

impl Instance {
    pub fn new(options: InstanceOptions) -> Self {
        let vm = Object::root_instance();
        let data = resolve_data(&vm, options.data);

        for key in data.keys() {
            if is_reserved(&key) {
                continue;
            }
            vm.define_property(&key, proxy(&data, &key));
        }
        observe(&Value::Object(data.clone()), true);

        let mut computed = IndexMap::new();
        for (key, def) in options.computed {
            if let Some(c) = define_computed(&vm, &key, def) {
                computed.insert(key, c);
            }
        }

        tracing::debug!(
            keys = data.len(),
            computed = computed.len(),
            "instance initialized"
        );

        Self {
            vm,
            data,
            computed,
            watchers: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// The root-instance object carrying the data proxies and computed
    /// properties.
    pub fn vm(&self) -> &Object {
        &self.vm
    }

    /// The observed root data.
    pub fn data(&self) -> &Object {
        &self.data
    }

    pub fn get(&self, key: &str) -> Value {
        self.vm.get(key)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.vm.set(key, value);
    }

    pub fn computed(&self, key: &str) -> Option<&Computed> {
        self.computed.get(key)
    }

    /// Watch an expression on this instance.
    ///
    /// The returned watcher is also owned by the instance, so dropping it
    /// does not stop it; call [`Watcher::teardown`] or [`Instance::destroy`].
    pub fn watch<F>(
        &self,
        expression: impl Into<Expression>,
        callback: F,
        options: WatchOptions,
    ) -> Watcher
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let watcher = {
            let callback = callback.clone();
            Watcher::new(
                &self.vm,
                expression,
                move |new, old| callback(new, old),
                WatcherOptions {
                    lazy: false,
                    deep: options.deep,
                    sync: options.sync,
                },
            )
        };

        if options.immediate {
            callback(&watcher.value(), &Value::Undefined);
        }

        self.watchers.lock().push(watcher.clone());
        watcher
    }

    /// Tear down every watcher created by this instance, computed ones
    /// included. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let watchers = std::mem::take(&mut *self.watchers.lock());
        for watcher in &watchers {
            watcher.teardown();
        }
        for computed in self.computed.values() {
            computed.watcher().teardown();
        }
        if let Some(observer) = self.data.observer() {
            observer.release_root();
        }
        tracing::debug!(watchers = watchers.len(), "instance destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("data", &self.data)
            .field("computed", &self.computed.keys().collect::<Vec<_>>())
            .field("watchers", &self.watchers.lock().len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

fn is_reserved(key: &str) -> bool {
    key.starts_with('$') || key.starts_with('_')
}

fn resolve_data(vm: &Object, source: DataSource) -> Object {
    let value = match source {
        DataSource::None => return Object::new(),
        DataSource::Object(obj) => return obj,
        DataSource::Factory(factory) => untracked(|| factory(vm)),
    };

    match value {
        Ok(Value::Object(obj)) => obj,
        Ok(_) => {
            warn("data functions should return an object");
            Object::new()
        }
        Err(err) => {
            handle_error(&err, "data()");
            Object::new()
        }
    }
}

fn proxy(data: &Object, key: &str) -> Property {
    let source = data.clone();
    let read_key = key.to_string();
    let target = data.clone();
    let write_key = key.to_string();
    Property::accessor(
        Some(Arc::new(move |_: &Object| source.get(&read_key))),
        Some(Arc::new(move |_: &Object, value: Value| target.set(&write_key, value))),
    )
}
