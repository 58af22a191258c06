//! Reactive Runtime
//!
//! The runtime owns the two registries that make up the subscription graph:
//!
//! 1. Watchers, keyed by [`WatcherId`]. Entries are weak so the registry
//!    never keeps a watcher alive; a watcher removes its own entry when it is
//!    dropped.
//!
//! 2. Subscriber lists, keyed by [`DepId`]. A dependency registers an empty
//!    list when created and removes it when dropped.
//!
//! # Locking
//!
//! Both maps are `DashMap`s. Callers never hold an entry guard while running
//! user code: subscriber lists are copied out before notification and
//! watchers are upgraded to strong handles before use.

use std::sync::OnceLock;

use dashmap::DashMap;
use smallvec::SmallVec;

use super::id::{DepId, WatcherId};
use crate::reactive::{ReactiveContext, Watcher, WeakWatcher};

/// Subscriber list for one dependency. Most slots have a handful of readers.
pub(crate) type SubscriberList = SmallVec<[WatcherId; 4]>;

/// The global reactive runtime.
///
/// This is a singleton that resolves graph identifiers to live objects.
pub struct Runtime;

static WATCHERS: OnceLock<DashMap<WatcherId, WeakWatcher>> = OnceLock::new();
static SUBSCRIBERS: OnceLock<DashMap<DepId, SubscriberList>> = OnceLock::new();

fn watchers() -> &'static DashMap<WatcherId, WeakWatcher> {
    WATCHERS.get_or_init(DashMap::new)
}

fn subscribers() -> &'static DashMap<DepId, SubscriberList> {
    SUBSCRIBERS.get_or_init(DashMap::new)
}

impl Runtime {
    /// Register a watcher so dependencies can resolve its ID.
    pub(crate) fn register_watcher(watcher: &Watcher) {
        watchers().insert(watcher.id(), watcher.downgrade());
    }

    /// Forget a watcher. Called when its last handle is dropped.
    pub(crate) fn unregister_watcher(id: WatcherId) {
        watchers().remove(&id);
    }

    /// Resolve a watcher ID to a live watcher.
    ///
    /// Returns `None` once the watcher has been dropped.
    pub fn watcher(id: WatcherId) -> Option<Watcher> {
        watchers().get(&id).and_then(|entry| entry.value().upgrade())
    }

    /// Create the subscriber list for a new dependency.
    pub(crate) fn register_dep(id: DepId) {
        subscribers().insert(id, SubscriberList::new());
    }

    /// Drop the subscriber list of a dependency.
    pub(crate) fn unregister_dep(id: DepId) {
        subscribers().remove(&id);
    }

    /// Append a subscriber. Does not check for duplicates.
    pub(crate) fn add_subscriber(dep: DepId, watcher: WatcherId) {
        if let Some(mut list) = subscribers().get_mut(&dep) {
            list.push(watcher);
            tracing::trace!(%dep, %watcher, "subscribed");
        }
    }

    /// Remove the first occurrence of a subscriber, if present.
    pub(crate) fn remove_subscriber(dep: DepId, watcher: WatcherId) {
        if let Some(mut list) = subscribers().get_mut(&dep) {
            if let Some(index) = list.iter().position(|id| *id == watcher) {
                list.remove(index);
                tracing::trace!(%dep, %watcher, "unsubscribed");
            }
        }
    }

    /// Snapshot of the subscribers of a dependency, in subscription order.
    pub fn subscribers(dep: DepId) -> Vec<WatcherId> {
        subscribers()
            .get(&dep)
            .map(|list| list.to_vec())
            .unwrap_or_default()
    }

    /// Whether the dependency is still registered.
    pub fn has_dep(dep: DepId) -> bool {
        subscribers().contains_key(&dep)
    }

    /// The watcher currently being evaluated on this thread, if any.
    pub fn current_watcher() -> Option<Watcher> {
        ReactiveContext::current()
    }

    /// Check if reads on this thread are currently tracked.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_registers_and_unregisters_deps() {
        let dep = DepId::next();
        assert!(!Runtime::has_dep(dep));

        Runtime::register_dep(dep);
        assert!(Runtime::has_dep(dep));

        Runtime::unregister_dep(dep);
        assert!(!Runtime::has_dep(dep));
    }

    #[test]
    fn runtime_appends_without_dedup() {
        let dep = DepId::next();
        let watcher = WatcherId::next();
        Runtime::register_dep(dep);

        Runtime::add_subscriber(dep, watcher);
        Runtime::add_subscriber(dep, watcher);
        assert_eq!(Runtime::subscribers(dep), vec![watcher, watcher]);

        // Only the first match goes
        Runtime::remove_subscriber(dep, watcher);
        assert_eq!(Runtime::subscribers(dep), vec![watcher]);

        Runtime::unregister_dep(dep);
    }

    #[test]
    fn runtime_ignores_unknown_deps() {
        let dep = DepId::next();
        let watcher = WatcherId::next();

        Runtime::add_subscriber(dep, watcher);
        Runtime::remove_subscriber(dep, watcher);

        assert!(Runtime::subscribers(dep).is_empty());
        assert!(Runtime::watcher(watcher).is_none());
    }
}
