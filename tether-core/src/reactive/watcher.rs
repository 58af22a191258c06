//! Watcher
//!
//! A watcher is a computation that re-runs when the data it read changes.
//! Render functions, computed getters, and explicit watch callbacks are all
//! watchers.
//!
//! # How Watchers Work
//!
//! 1. Evaluation pushes the watcher onto the [`ReactiveContext`] stack and
//!    runs its getter. Every reactive read calls [`Watcher::add_dep`].
//!
//! 2. After the getter returns, the dependency set is reconciled: new
//!    dependencies were subscribed during the run, and dependencies from the
//!    previous run that were not read this time are unsubscribed. The graph
//!    never keeps stale edges.
//!
//! 3. When a dependency notifies, [`Watcher::update`] either marks a lazy
//!    watcher dirty, runs a sync watcher immediately, or queues the watcher
//!    on the scheduler.
//!
//! # Lifecycle
//!
//! ```text
//! eager:  created -> clean -> dirty (notified) -> re-evaluating -> clean
//! lazy:   created -> dirty -> evaluated on demand -> dirty (notified) -> ...
//! ```
//!
//! Dropping the last handle (or calling [`Watcher::teardown`]) removes the
//! watcher from every dependency it subscribed to.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::context::ReactiveContext;
use crate::config;
use crate::error::{handle_error, warn, ReactiveError, Result};
use crate::graph::{scheduler, DepId, Runtime, WatcherId};
use crate::value::{Object, Value, WeakObject};

/// Getter closure. Receives the watcher's target object.
pub type ComputeFn = Arc<dyn Fn(&Object) -> Result<Value> + Send + Sync>;

/// Change callback, invoked with `(new_value, old_value)`.
pub type Callback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// What a watcher evaluates.
#[derive(Clone)]
pub enum Expression {
    /// A dotted path such as `b.c`, read from the target.
    Path(String),
    /// An arbitrary getter.
    Getter(ComputeFn),
}

impl Expression {
    pub fn getter<F>(f: F) -> Self
    where
        F: Fn(&Object) -> Result<Value> + Send + Sync + 'static,
    {
        Expression::Getter(Arc::new(f))
    }
}

impl From<&str> for Expression {
    fn from(path: &str) -> Self {
        Expression::Path(path.to_string())
    }
}

impl From<String> for Expression {
    fn from(path: String) -> Self {
        Expression::Path(path)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Path(path) => write!(f, "Path({path:?})"),
            Expression::Getter(_) => f.write_str("Getter"),
        }
    }
}

/// Watcher behavior flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherOptions {
    /// Do not evaluate until asked; notifications only mark the watcher dirty.
    pub lazy: bool,
    /// Track every nested key of the value, not just the ones the getter read.
    pub deep: bool,
    /// Re-run synchronously on notification instead of queueing.
    pub sync: bool,
}

/// Split a dotted path into segments.
///
/// Returns `None` if the path contains anything but word characters, `$`
/// and dots.
pub fn parse_path(path: &str) -> Option<Vec<String>> {
    let valid = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid {
        return None;
    }
    Some(path.split('.').map(str::to_string).collect())
}

fn path_getter(path: &str) -> ComputeFn {
    match parse_path(path) {
        Some(segments) => {
            let path = path.to_string();
            Arc::new(move |target: &Object| -> Result<Value> {
                let mut value = Value::Object(target.clone());
                for segment in &segments {
                    if !value.is_container() {
                        tracing::debug!(path = %path, segment = %segment, "path segment missing");
                        return Ok(Value::Undefined);
                    }
                    value = value.get(segment);
                }
                Ok(value)
            })
        }
        None => {
            let err = ReactiveError::InvalidPath(path.to_string());
            warn(&format!(
                "Failed watching path: {err}. Watcher only accepts simple dot-delimited paths. \
                 For full control, use a getter instead."
            ));
            Arc::new(|_: &Object| -> Result<Value> { Ok(Value::Undefined) })
        }
    }
}

struct WatcherState {
    value: Value,
    dirty: bool,
    active: bool,
    /// Dependencies subscribed after the last completed evaluation.
    deps: IndexSet<DepId>,
    /// Dependencies read during the current evaluation.
    new_deps: IndexSet<DepId>,
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    target: WeakObject,
    expression: String,
    getter: ComputeFn,
    callback: Option<Callback>,
    options: WatcherOptions,
    state: Mutex<WatcherState>,
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        let deps = std::mem::take(&mut self.state.get_mut().deps);
        for dep in deps {
            dep.remove_subscriber(self.id);
        }
        Runtime::unregister_watcher(self.id);
        scheduler::dequeue(self.id);
    }
}

/// A tracked computation.
///
/// Cloning yields another handle to the same watcher.
#[derive(Clone)]
pub struct Watcher(Arc<WatcherInner>);

impl Watcher {
    /// Create a watcher that calls `callback(new, old)` whenever the value of
    /// `expression` changes.
    ///
    /// Unless `options.lazy` is set, the expression is evaluated right away
    /// to collect the initial dependencies.
    pub fn new<F>(
        target: &Object,
        expression: impl Into<Expression>,
        callback: F,
        options: WatcherOptions,
    ) -> Self
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        Self::build(target, expression.into(), Some(Arc::new(callback)), options)
    }

    /// Create a watcher without a change callback, such as a render watcher
    /// or the watcher behind a computed property.
    pub fn without_callback(
        target: &Object,
        expression: impl Into<Expression>,
        options: WatcherOptions,
    ) -> Self {
        Self::build(target, expression.into(), None, options)
    }

    fn build(
        target: &Object,
        expression: Expression,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Self {
        let (getter, text) = match expression {
            Expression::Path(path) => (path_getter(&path), path),
            Expression::Getter(getter) => (getter, "<getter>".to_string()),
        };

        let watcher = Watcher(Arc::new(WatcherInner {
            id: WatcherId::next(),
            target: target.downgrade(),
            expression: text,
            getter,
            callback,
            options,
            state: Mutex::new(WatcherState {
                value: Value::Undefined,
                dirty: options.lazy,
                active: true,
                deps: IndexSet::new(),
                new_deps: IndexSet::new(),
            }),
        }));
        Runtime::register_watcher(&watcher);

        if !options.lazy {
            let value = watcher.get();
            watcher.0.state.lock().value = value;
        }
        watcher
    }

    /// Get the watcher's unique ID.
    pub fn id(&self) -> WatcherId {
        self.0.id
    }

    /// The path this watcher reads, or `<getter>`.
    pub fn expression(&self) -> &str {
        &self.0.expression
    }

    pub fn options(&self) -> WatcherOptions {
        self.0.options
    }

    /// The cached value from the last evaluation.
    pub fn value(&self) -> Value {
        self.0.state.lock().value.clone()
    }

    /// Whether a lazy watcher needs to re-evaluate before its value is used.
    pub fn is_dirty(&self) -> bool {
        self.0.state.lock().dirty
    }

    pub fn is_lazy(&self) -> bool {
        self.0.options.lazy
    }

    /// False once the watcher has been torn down.
    pub fn is_active(&self) -> bool {
        self.0.state.lock().active
    }

    /// Dependencies the watcher is subscribed to.
    pub fn dep_ids(&self) -> Vec<DepId> {
        self.0.state.lock().deps.iter().copied().collect()
    }

    /// Run the getter with dependency collection and return its value.
    ///
    /// Errors are reported through [`handle_error`] and the previous value is
    /// returned instead.
    pub fn get(&self) -> Value {
        let Some(target) = self.0.target.upgrade() else {
            return self.value();
        };

        let value = {
            let _ctx = ReactiveContext::enter(self);
            match (self.0.getter)(&target) {
                Ok(value) => {
                    if self.0.options.deep {
                        traverse(&value);
                    }
                    value
                }
                Err(err) => {
                    handle_error(&err, &format!("getter for watcher \"{}\"", self.0.expression));
                    self.value()
                }
            }
        };

        self.cleanup_deps();
        value
    }

    /// Record a dependency read during the current evaluation.
    ///
    /// Subscribes to it only if it was neither read earlier in this run nor
    /// subscribed by a previous run, so the same key read twice subscribes
    /// once.
    pub fn add_dep(&self, dep: DepId) {
        let subscribe = {
            let mut state = self.0.state.lock();
            state.new_deps.insert(dep) && !state.deps.contains(&dep)
        };
        if subscribe {
            dep.add_subscriber(self.0.id);
        }
    }

    /// Make the dependencies of this run the current set, unsubscribing from
    /// the ones that were not read.
    fn cleanup_deps(&self) {
        let stale: Vec<DepId> = {
            let mut state = self.0.state.lock();
            let new_deps = std::mem::take(&mut state.new_deps);
            let stale = state
                .deps
                .iter()
                .filter(|dep| !new_deps.contains(*dep))
                .copied()
                .collect();
            state.deps = new_deps;
            stale
        };

        for dep in stale {
            dep.remove_subscriber(self.0.id);
        }
    }

    /// Called by a dependency when it changes.
    pub fn update(&self) {
        if self.0.options.lazy {
            self.0.state.lock().dirty = true;
        } else if self.0.options.sync || config::get().sync {
            self.run();
        } else {
            scheduler::queue_watcher(self);
        }
    }

    /// Re-evaluate and invoke the callback if the value changed.
    ///
    /// Containers always count as changed since they may have been mutated in
    /// place.
    pub fn run(&self) {
        if !self.is_active() {
            return;
        }

        let value = self.get();
        let old_value = {
            let mut state = self.0.state.lock();
            let changed =
                !value.strict_eq(&state.value) || value.is_container() || self.0.options.deep;
            if !changed {
                return;
            }
            std::mem::replace(&mut state.value, value.clone())
        };

        if let Some(callback) = &self.0.callback {
            callback(&value, &old_value);
        }
    }

    /// Evaluate a lazy watcher and clear its dirty flag.
    pub fn evaluate(&self) {
        let value = self.get();
        let mut state = self.0.state.lock();
        state.value = value;
        state.dirty = false;
    }

    /// Subscribe the active watcher to every dependency of this one.
    pub fn depend(&self) {
        for dep in self.dep_ids() {
            dep.depend();
        }
    }

    /// Unsubscribe from everything and stop reacting.
    pub fn teardown(&self) {
        let deps = {
            let mut state = self.0.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            std::mem::take(&mut state.deps)
        };

        for dep in deps {
            dep.remove_subscriber(self.0.id);
        }
        scheduler::dequeue(self.0.id);
        tracing::debug!(watcher = %self.0.id, "torn down");
    }

    pub fn ptr_eq(&self, other: &Watcher) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakWatcher {
        WeakWatcher(Arc::downgrade(&self.0))
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("Watcher")
            .field("id", &self.0.id)
            .field("expression", &self.0.expression)
            .field("dirty", &state.dirty)
            .field("active", &state.active)
            .field("dependency_count", &state.deps.len())
            .finish()
    }
}

/// Non-owning handle held by the runtime registry.
pub(crate) struct WeakWatcher(Weak<WatcherInner>);

impl WeakWatcher {
    pub(crate) fn upgrade(&self) -> Option<Watcher> {
        self.0.upgrade().map(Watcher)
    }
}

/// Read every nested key of `value` so the active watcher depends on all of
/// them. Each observed container is visited once.
fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<DepId>) {
    let observer = match value {
        Value::Object(obj) => obj.observer(),
        Value::Array(arr) => arr.observer(),
        _ => return,
    };
    if let Some(observer) = observer {
        if !seen.insert(observer.dep().id()) {
            return;
        }
    }

    match value {
        Value::Object(obj) => {
            for key in obj.keys() {
                traverse_inner(&obj.get(&key), seen);
            }
        }
        Value::Array(arr) => {
            for item in arr.to_vec() {
                traverse_inner(&item, seen);
            }
        }
        _ => {}
    }
}
