//! Dependency
//!
//! A dependency is the subscriber list behind one reactive slot (an object
//! key) or one collection-level channel (an observer). Watchers that read the
//! slot while evaluating subscribe to it; writing the slot notifies them.
//!
//! The list itself is an unconditional append list. Keeping a watcher from
//! subscribing twice is the watcher's job (see [`Watcher::add_dep`]), so
//! calling [`DepId::add_subscriber`] directly can produce duplicates.
//!
//! [`Watcher::add_dep`]: crate::reactive::Watcher::add_dep

use super::id::{DepId, WatcherId};
use super::runtime::Runtime;
use crate::reactive::ReactiveContext;

impl DepId {
    /// Append a subscriber.
    pub fn add_subscriber(self, watcher: WatcherId) {
        Runtime::add_subscriber(self, watcher);
    }

    /// Remove the first occurrence of a subscriber. No-op if absent.
    pub fn remove_subscriber(self, watcher: WatcherId) {
        Runtime::remove_subscriber(self, watcher);
    }

    /// Register the active watcher, if any, as a subscriber.
    pub fn depend(self) {
        if let Some(watcher) = ReactiveContext::current() {
            watcher.add_dep(self);
        }
    }

    /// Call `update()` on every subscriber, in subscription order.
    ///
    /// Iterates over a snapshot, so subscribers may come and go while
    /// the notification is running.
    pub fn notify(self) {
        let subscribers = Runtime::subscribers(self);
        tracing::trace!(dep = %self, count = subscribers.len(), "notify");

        for id in subscribers {
            if let Some(watcher) = Runtime::watcher(id) {
                watcher.update();
            }
        }
    }

    /// Current subscribers, in subscription order.
    pub fn subscribers(self) -> Vec<WatcherId> {
        Runtime::subscribers(self)
    }
}

/// Owning handle for a dependency.
///
/// The dependency lives exactly as long as this handle. Watchers that still
/// list its ID simply find nothing to remove when they clean up.
#[derive(Debug)]
pub struct Dep {
    id: DepId,
}

impl Dep {
    /// Create and register a new dependency.
    pub fn new() -> Self {
        let id = DepId::next();
        Runtime::register_dep(id);
        Self { id }
    }

    /// Get the dependency's unique ID.
    pub fn id(&self) -> DepId {
        self.id
    }

    /// See [`DepId::add_subscriber`].
    pub fn add_subscriber(&self, watcher: WatcherId) {
        self.id.add_subscriber(watcher);
    }

    /// See [`DepId::remove_subscriber`].
    pub fn remove_subscriber(&self, watcher: WatcherId) {
        self.id.remove_subscriber(watcher);
    }

    /// See [`DepId::depend`].
    pub fn depend(&self) {
        self.id.depend();
    }

    /// See [`DepId::notify`].
    pub fn notify(&self) {
        self.id.notify();
    }

    /// See [`DepId::subscribers`].
    pub fn subscribers(&self) -> Vec<WatcherId> {
        self.id.subscribers()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dep {
    fn drop(&mut self) {
        Runtime::unregister_dep(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Expression, Watcher, WatcherOptions};
    use crate::value::{Object, Value};

    fn lazy_watcher(target: &Object) -> Watcher {
        Watcher::without_callback(
            target,
            Expression::getter(|_| Ok(Value::Undefined)),
            WatcherOptions {
                lazy: true,
                ..Default::default()
            },
        )
    }

    #[test]
    fn dep_is_unregistered_on_drop() {
        let dep = Dep::new();
        let id = dep.id();
        assert!(Runtime::has_dep(id));

        drop(dep);
        assert!(!Runtime::has_dep(id));
    }

    #[test]
    fn add_and_remove_subscriber() {
        let dep = Dep::new();
        let a = WatcherId::next();
        let b = WatcherId::next();

        dep.add_subscriber(a);
        dep.add_subscriber(b);
        assert_eq!(dep.subscribers(), vec![a, b]);

        dep.remove_subscriber(a);
        assert_eq!(dep.subscribers(), vec![b]);

        // Removing an absent subscriber is a no-op
        dep.remove_subscriber(a);
        assert_eq!(dep.subscribers(), vec![b]);
    }

    #[test]
    fn dep_does_not_collapse_duplicates() {
        let dep = Dep::new();
        let a = WatcherId::next();

        dep.add_subscriber(a);
        dep.add_subscriber(a);
        assert_eq!(dep.subscribers(), vec![a, a]);

        dep.remove_subscriber(a);
        assert_eq!(dep.subscribers(), vec![a]);
    }

    #[test]
    fn watcher_subscribes_once_per_dependency() {
        let value = Value::from(serde_json::json!({ "a": 1 }));
        crate::reactive::observe(&value, false);
        let vm = value.as_object().cloned().unwrap();

        let watcher = Watcher::without_callback(
            &vm,
            Expression::getter(|vm| {
                vm.get("a");
                Ok(vm.get("a"))
            }),
            WatcherOptions::default(),
        );
        watcher.get();

        let dep = vm.dependency("a").unwrap();
        assert_eq!(dep.subscribers(), vec![watcher.id()]);
    }

    #[test]
    fn notify_marks_lazy_subscribers_dirty() {
        let target = Object::new();
        let watcher = lazy_watcher(&target);
        watcher.evaluate();
        assert!(!watcher.is_dirty());

        let dep = Dep::new();
        dep.add_subscriber(watcher.id());
        dep.notify();

        assert!(watcher.is_dirty());
    }

    #[test]
    fn notify_skips_dropped_watchers() {
        let target = Object::new();
        let watcher = lazy_watcher(&target);
        let dep = Dep::new();
        dep.add_subscriber(watcher.id());

        drop(watcher);
        // Nothing left to update; must not panic
        dep.notify();
    }

    #[test]
    fn depend_without_active_watcher_does_nothing() {
        let dep = Dep::new();
        dep.depend();
        assert!(dep.subscribers().is_empty());
    }
}
