//! Observer
//!
//! An observer turns one plain object or array into a reactive one:
//!
//! - For an object, every own key is replaced by a reactive slot (see
//!   [`define_reactive`]). Values are observed eagerly, so the whole graph is
//!   reactive once `observe` returns. This makes the initial wrap cost
//!   proportional to the graph size and keeps reads cheap.
//!
//! - For an array, every element is observed, and [`Array::mutate`] reports
//!   each mutation back here so inserted elements get observed and
//!   subscribers are notified.
//!
//! The observer owns a collection-level dependency. It is notified when the
//! container changes shape: an array mutation, or a key added or removed
//! through [`set`]/[`del`].
//!
//! An observer holds its value weakly. The value holds the observer through
//! its hidden marker, which also makes observation idempotent.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::context::{untracked, ReactiveContext};
use crate::error::warn;
use crate::graph::{Dep, DepId};
use crate::value::{
    Array, Getter, Key, Object, Property, PropertyKind, Setter, Value, WeakArray, WeakObject,
};

enum WeakContainer {
    Object(WeakObject),
    Array(WeakArray),
}

struct ObserverInner {
    value: WeakContainer,
    dep: Dep,
    /// Number of instances using this value as their root data.
    vm_count: AtomicUsize,
}

/// The reactive wrapper attached to an observed object or array.
#[derive(Clone)]
pub struct Observer(Arc<ObserverInner>);

impl Observer {
    fn for_object(obj: &Object) -> Observer {
        let observer = obj.attach_observer(Observer::new(WeakContainer::Object(obj.downgrade())));
        tracing::debug!(dep = %observer.dep().id(), keys = obj.len(), "observing object");
        for key in obj.keys() {
            let value = untracked(|| obj.get(&key));
            define_reactive(obj, &key, value);
        }
        observer
    }

    fn for_array(arr: &Array) -> Observer {
        let observer = arr.attach_observer(Observer::new(WeakContainer::Array(arr.downgrade())));
        tracing::debug!(dep = %observer.dep().id(), len = arr.len(), "observing array");
        observe_items(&arr.to_vec());
        observer
    }

    fn new(value: WeakContainer) -> Observer {
        Observer(Arc::new(ObserverInner {
            value,
            dep: Dep::new(),
            vm_count: AtomicUsize::new(0),
        }))
    }

    /// The collection-level dependency.
    pub fn dep(&self) -> &Dep {
        &self.0.dep
    }

    /// The observed value, or `Undefined` if it has been dropped.
    pub fn value(&self) -> Value {
        match &self.0.value {
            WeakContainer::Object(obj) => obj.upgrade().map(Value::Object),
            WeakContainer::Array(arr) => arr.upgrade().map(Value::Array),
        }
        .unwrap_or_default()
    }

    /// How many instances use the observed value as their root data.
    pub fn vm_count(&self) -> usize {
        self.0.vm_count.load(Ordering::SeqCst)
    }

    /// Release one root-data reference taken by `observe(value, true)`.
    pub(crate) fn release_root(&self) {
        let _ = self
            .0
            .vm_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.0.dep.id())
            .field("vm_count", &self.vm_count())
            .finish()
    }
}

fn observe_items(items: &[Value]) {
    for item in items {
        observe(item, false);
    }
}

/// Attach an observer to `value`, or return the one already attached.
///
/// Returns `None` for primitives, for values that are not extensible (frozen
/// ones included), and for root instances. With `as_root`, the observer's
/// root-data count is incremented.
pub fn observe(value: &Value, as_root: bool) -> Option<Observer> {
    let observer = match value {
        Value::Object(obj) => match obj.observer() {
            Some(existing) => Some(existing),
            None if obj.is_extensible() && !obj.is_root_instance() => {
                Some(Observer::for_object(obj))
            }
            None => None,
        },
        Value::Array(arr) => match arr.observer() {
            Some(existing) => Some(existing),
            None if arr.is_extensible() => Some(Observer::for_array(arr)),
            None => None,
        },
        _ => return None,
    };

    if as_root {
        if let Some(observer) = &observer {
            observer.0.vm_count.fetch_add(1, Ordering::SeqCst);
        }
    }
    observer
}

struct SlotState {
    value: Value,
    child: Option<Observer>,
}

/// The reactive state behind one object key.
pub(crate) struct ReactiveSlot {
    dep: Dep,
    getter: Option<Getter>,
    setter: Option<Setter>,
    state: Mutex<SlotState>,
}

impl ReactiveSlot {
    pub(crate) fn dep_id(&self) -> DepId {
        self.dep.id()
    }

    pub(crate) fn get(&self, owner: &Object) -> Value {
        let value = match &self.getter {
            Some(getter) => getter(owner),
            None => self.state.lock().value.clone(),
        };

        if ReactiveContext::is_active() {
            self.dep.depend();
            let child = self.state.lock().child.clone();
            if let Some(child) = child {
                child.dep().depend();
            }
        }
        value
    }

    pub(crate) fn set(&self, owner: &Object, new_value: Value) {
        let old_value = match &self.getter {
            Some(getter) => getter(owner),
            None => self.state.lock().value.clone(),
        };
        if new_value.same_value(&old_value) {
            return;
        }

        match &self.setter {
            Some(setter) => setter(owner, new_value.clone()),
            None => self.state.lock().value = new_value.clone(),
        }

        let child = observe(&new_value, false);
        self.state.lock().child = child;
        self.dep.notify();
    }
}

/// Make `key` on `obj` reactive, with `value` as its initial value.
///
/// Non-configurable keys are left alone. An existing accessor pair keeps
/// doing the actual reads and writes; the slot adds tracking on top.
pub fn define_reactive(obj: &Object, key: &str, value: Value) {
    let (getter, setter) = match obj.property(key) {
        Some(prop) if !prop.is_configurable() => return,
        Some(Property {
            kind: PropertyKind::Accessor { get, set },
            ..
        }) => (get, set),
        _ => (None, None),
    };

    let child = observe(&value, false);
    let slot = ReactiveSlot {
        dep: Dep::new(),
        getter,
        setter,
        state: Mutex::new(SlotState { value, child }),
    };
    obj.define_property(key, Property::reactive(Arc::new(slot)));
}

/// Called by [`Array::mutate`] after an observed array changed.
pub(crate) fn array_mutated(observer: &Observer, inserted: &[Value]) {
    observe_items(inserted);
    observer.dep().notify();
}

/// Largest index-addressable length of an array.
const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// Set a key on a reactive target, adding it reactively if it is new.
///
/// Returns `value`. Adding keys to a root instance or to root data is refused
/// with a warning: such keys must be declared up front.
pub fn set(target: &Value, key: impl Into<Key>, value: Value) -> Value {
    let key = key.into();
    match target {
        Value::Array(arr) => match key.as_index() {
            Some(index) => {
                if index >= MAX_ARRAY_LENGTH {
                    warn(&format!("Invalid array index {index}: exceeds the maximum array length"));
                    return value;
                }
                let len = arr.len();
                if index >= len {
                    // One splice, so the array notifies once
                    let mut items = vec![Value::Undefined; index - len];
                    items.push(value.clone());
                    arr.splice(len, 0, items);
                } else {
                    arr.splice(index, 1, vec![value.clone()]);
                }
            }
            None => warn(&format!("Cannot set non-index key \"{key}\" on an array")),
        },
        Value::Object(obj) => {
            let name = key.to_name();
            if obj.contains_key(&name) {
                obj.set(&name, value.clone());
                return value;
            }

            let observer = obj.observer();
            if obj.is_root_instance() || observer.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                warn(
                    "Avoid adding reactive properties to a root instance or its root data at \
                     runtime - declare it upfront in the data option.",
                );
                return value;
            }

            match observer {
                Some(observer) => {
                    define_reactive(obj, &name, value.clone());
                    observer.dep().notify();
                }
                None => obj.set(&name, value.clone()),
            }
        }
        _ => warn(&format!(
            "Cannot set reactive property \"{key}\" on undefined, null, or primitive value"
        )),
    }
    value
}

/// Delete a key from a reactive target, notifying if it was observed.
///
/// Missing keys are ignored silently. Deleting from a root instance or root
/// data is refused with a warning.
pub fn del(target: &Value, key: impl Into<Key>) {
    let key = key.into();
    match target {
        Value::Array(arr) => {
            if let Some(index) = key.as_index() {
                if index < arr.len() {
                    arr.splice(index, 1, Vec::new());
                }
            }
        }
        Value::Object(obj) => {
            let observer = obj.observer();
            if obj.is_root_instance() || observer.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                warn(
                    "Avoid deleting properties on a root instance or its root data - just set it \
                     to null.",
                );
                return;
            }

            let name = key.to_name();
            if !obj.contains_key(&name) {
                return;
            }
            if obj.delete(&name) {
                if let Some(observer) = observer {
                    observer.dep().notify();
                }
            }
        }
        _ => warn(&format!(
            "Cannot delete reactive property \"{key}\" on undefined, null, or primitive value"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Expression, Watcher, WatcherOptions};
    use crate::value::Mutation;
    use serde_json::json;

    #[test]
    fn create_on_non_observables() {
        // skip primitive value
        assert!(observe(&Value::from(1), false).is_none());
        assert!(observe(&Value::from("a"), false).is_none());

        // avoid root instances
        assert!(observe(&Value::Object(Object::root_instance()), false).is_none());

        // avoid frozen objects
        let frozen = Object::new();
        frozen.freeze();
        assert!(observe(&Value::Object(frozen), false).is_none());

        let sealed = Array::new();
        sealed.prevent_extensions();
        assert!(observe(&Value::Array(sealed), false).is_none());
    }

    #[test]
    fn create_on_object() {
        let value = Value::from(json!({ "a": {}, "b": {} }));
        let obj = value.as_object().unwrap();

        let ob1 = observe(&value, false).unwrap();
        assert!(ob1.value().as_object().unwrap().ptr_eq(obj));
        assert!(obj.observer().unwrap().ptr_eq(&ob1));

        // should've walked children
        assert!(obj.get("a").as_object().unwrap().observer().is_some());
        assert!(obj.get("b").as_object().unwrap().observer().is_some());

        // should return existing ob on already observed objects
        let ob2 = observe(&value, false).unwrap();
        assert!(ob2.ptr_eq(&ob1));
    }

    #[test]
    fn create_on_array() {
        let value = Value::from(json!([{ "a": 1 }, { "b": 2 }]));
        let arr = value.as_array().unwrap();

        let ob = observe(&value, false).unwrap();
        assert!(arr.observer().unwrap().ptr_eq(&ob));
        for item in arr.to_vec() {
            assert!(item.as_object().unwrap().observer().is_some());
        }
    }

    #[test]
    fn marker_is_not_a_key() {
        let value = Value::from(json!({ "a": 1 }));
        observe(&value, false);
        assert_eq!(value.as_object().unwrap().keys(), vec!["a"]);
    }

    #[test]
    fn as_root_counts_attachments() {
        let value = Value::from(json!({}));
        observe(&value, true);
        let ob = observe(&value, true).unwrap();
        assert_eq!(ob.vm_count(), 2);
    }

    #[test]
    fn keys_become_reactive_slots() {
        let value = Value::from(json!({ "a": 1 }));
        observe(&value, false);
        let obj = value.as_object().unwrap();

        assert!(obj.property("a").unwrap().is_reactive());
        assert!(obj.dependency("a").is_some());
        assert_eq!(obj.get("a"), Value::from(1));
    }

    #[test]
    fn non_configurable_keys_are_skipped() {
        let obj = Object::new();
        obj.define_property("fixed", Property::data(1).non_configurable());
        obj.set("free", 2);

        observe(&Value::Object(obj.clone()), false);
        assert!(!obj.property("fixed").unwrap().is_reactive());
        assert!(obj.property("free").unwrap().is_reactive());
    }

    #[test]
    fn existing_accessors_keep_working() {
        let backing = Object::new();
        backing.set("raw", 1);

        let obj = Object::new();
        let read = backing.clone();
        let write = backing.clone();
        obj.define_property(
            "proxied",
            Property::accessor(
                Some(Arc::new(move |_: &Object| read.get("raw"))),
                Some(Arc::new(move |_: &Object, v: Value| write.set("raw", v))),
            ),
        );

        observe(&Value::Object(obj.clone()), false);
        assert!(obj.property("proxied").unwrap().is_reactive());

        obj.set("proxied", 5);
        assert_eq!(backing.get("raw"), Value::from(5));
        assert_eq!(obj.get("proxied"), Value::from(5));
    }

    #[test]
    fn replacing_a_value_observes_the_new_one() {
        let value = Value::from(json!({ "b": { "c": 1 } }));
        observe(&value, false);
        let obj = value.as_object().unwrap();

        let fresh = Value::from(json!({ "c": 2 }));
        obj.set("b", fresh.clone());
        assert!(fresh.as_object().unwrap().observer().is_some());
    }

    #[test]
    fn set_adds_reactive_keys_to_observed_objects() {
        let value = Value::from(json!({}));
        observe(&value, false);
        let obj = value.as_object().unwrap();

        let returned = set(&value, "a", Value::from(1));
        assert_eq!(returned, Value::from(1));
        assert!(obj.property("a").unwrap().is_reactive());

        // existing keys are plain assignments
        set(&value, "a", Value::from(2));
        assert_eq!(obj.get("a"), Value::from(2));
    }

    #[test]
    fn set_on_unobserved_object_is_plain() {
        let value = Value::Object(Object::new());
        set(&value, "a", Value::from(1));
        let obj = value.as_object().unwrap();
        assert_eq!(obj.get("a"), Value::from(1));
        assert!(!obj.property("a").unwrap().is_reactive());
    }

    #[test]
    fn set_refuses_root_data() {
        let value = Value::from(json!({ "a": 1 }));
        observe(&value, true);

        let returned = set(&value, "b", Value::from(2));
        assert_eq!(returned, Value::from(2));
        assert!(!value.as_object().unwrap().contains_key("b"));

        del(&value, "a");
        assert!(value.as_object().unwrap().contains_key("a"));
    }

    #[test]
    fn set_and_del_on_arrays_use_splice() {
        let value = Value::from(json!([1, 2]));
        observe(&value, false);
        let arr = value.as_array().unwrap();

        set(&value, 1usize, Value::from(5));
        assert_eq!(arr.get(1), Value::from(5));

        set(&value, 3usize, Value::from(7));
        assert_eq!(arr.len(), 4);
        assert!(arr.get(2).is_undefined());

        del(&value, 0usize);
        assert_eq!(arr.get(0), Value::from(5));
        assert_eq!(arr.len(), 3);
    }

    fn counting_list_watcher(vm: &Object) -> (Watcher, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let watcher = Watcher::new(
            vm,
            "list",
            move |_, _| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );
        (watcher, count)
    }

    fn list_of(vm: &Object) -> Value {
        untracked(|| vm.get("list"))
    }

    #[test]
    fn set_past_the_end_notifies_once() {
        let vm = Value::from(json!({ "list": [1] }));
        observe(&vm, false);
        let vm = vm.as_object().cloned().unwrap();
        let (_watcher, count) = counting_list_watcher(&vm);

        let list = list_of(&vm);
        set(&list, 3usize, Value::from(9));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let arr = list.as_array().unwrap();
        assert_eq!(arr.len(), 4);
        assert!(arr.get(1).is_undefined());
        assert!(arr.get(2).is_undefined());
        assert_eq!(arr.get(3), Value::from(9));
    }

    #[test]
    fn set_refuses_indices_beyond_max_length() {
        let value = Value::from(json!([1]));
        observe(&value, false);

        let warnings = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let warnings_clone = warnings.clone();
        crate::error::set_warn_handler(move |msg| warnings_clone.borrow_mut().push(msg.to_string()));
        set(&value, usize::MAX >> 4, Value::from(2));
        crate::error::clear_handlers();

        assert_eq!(value.as_array().unwrap().len(), 1);
        assert_eq!(warnings.borrow().len(), 1);
    }

    #[test]
    fn every_array_mutation_notifies_once() {
        let vm = Value::from(json!({ "list": [3, 1, 2] }));
        observe(&vm, false);
        let vm = vm.as_object().cloned().unwrap();
        let (_watcher, count) = counting_list_watcher(&vm);
        let list = list_of(&vm);
        let arr = list.as_array().cloned().unwrap();

        let mutations = vec![
            Mutation::Push(vec![Value::from(4)]),
            Mutation::Pop,
            Mutation::Shift,
            Mutation::Unshift(vec![Value::from(0)]),
            Mutation::Splice {
                start: 1,
                delete_count: 1,
                items: vec![Value::from(7)],
            },
            Mutation::Sort(None),
            Mutation::Reverse,
        ];

        for (expected, mutation) in mutations.into_iter().enumerate() {
            let name = mutation.name();
            arr.mutate(mutation);
            assert_eq!(count.load(Ordering::SeqCst), expected + 1, "{name}");
        }
    }

    #[test]
    fn inserted_objects_are_observed() {
        let value = Value::from(json!([]));
        observe(&value, false);
        let arr = value.as_array().unwrap();

        arr.unshift(Value::from(json!({ "a": 1 })));
        arr.splice(1, 0, vec![Value::from(json!({ "b": 2 })), Value::from(json!([]))]);

        for item in arr.to_vec() {
            let observed = match &item {
                Value::Object(obj) => obj.observer().is_some(),
                Value::Array(inner) => inner.observer().is_some(),
                _ => false,
            };
            assert!(observed, "{item:?}");
        }
    }

    #[test]
    fn subscribers_see_post_mutation_state() {
        let vm = Value::from(json!({ "list": [1, 2] }));
        observe(&vm, false);
        let vm = vm.as_object().cloned().unwrap();

        let lengths = Arc::new(Mutex::new(Vec::new()));
        let lengths_clone = lengths.clone();
        let _watcher = Watcher::new(
            &vm,
            Expression::getter(|vm| Ok(vm.get("list").get("length"))),
            move |new, _| lengths_clone.lock().push(new.clone()),
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );

        let list = list_of(&vm);
        let arr = list.as_array().unwrap();
        arr.push(3);
        arr.pop();
        arr.pop();

        assert_eq!(
            lengths.lock().as_slice(),
            [Value::from(3), Value::from(2), Value::from(1)]
        );
    }

    #[test]
    fn del_removes_keys_and_ignores_missing_ones() {
        let value = Value::from(json!({ "a": 1 }));
        observe(&value, false);

        del(&value, "missing");
        del(&value, "a");
        assert!(value.as_object().unwrap().is_empty());
    }

    #[test]
    fn primitive_targets_are_skipped() {
        assert_eq!(set(&Value::Null, "a", Value::from(1)), Value::from(1));
        del(&Value::from(3), "a");
    }
}
