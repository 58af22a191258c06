//! Objects
//!
//! An [`Object`] is an ordered map from key to [`Property`]. A property is one
//! of:
//!
//! - a plain data value,
//! - an accessor pair (getter/setter closures),
//! - a reactive slot, installed by the observer. Reads through a reactive
//!   slot are tracked and writes notify.
//!
//! The observer marker lives beside the properties, not among them, so it
//! never shows up in [`Object::keys`].
//!
//! # Locking
//!
//! The property map sits behind a `RwLock`. Accessors and reactive slots are
//! cloned out of the map before they run, so a getter may freely read or
//! write the object it belongs to.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::Value;
use crate::graph::DepId;
use crate::reactive::{Observer, ReactiveSlot};

/// Accessor read closure. Receives the object the property lives on.
pub type Getter = Arc<dyn Fn(&Object) -> Value + Send + Sync>;

/// Accessor write closure. Receives the object the property lives on.
pub type Setter = Arc<dyn Fn(&Object, Value) + Send + Sync>;

#[derive(Clone)]
pub(crate) enum PropertyKind {
    Data(Value),
    Accessor {
        get: Option<Getter>,
        set: Option<Setter>,
    },
    Reactive(Arc<ReactiveSlot>),
}

/// A property definition.
#[derive(Clone)]
pub struct Property {
    pub(crate) kind: PropertyKind,
    configurable: bool,
}

impl Property {
    /// A plain, configurable data property.
    pub fn data(value: impl Into<Value>) -> Self {
        Self {
            kind: PropertyKind::Data(value.into()),
            configurable: true,
        }
    }

    /// A configurable accessor property.
    pub fn accessor(get: Option<Getter>, set: Option<Setter>) -> Self {
        Self {
            kind: PropertyKind::Accessor { get, set },
            configurable: true,
        }
    }

    /// A read-only accessor property.
    pub fn getter<F>(get: F) -> Self
    where
        F: Fn(&Object) -> Value + Send + Sync + 'static,
    {
        Self::accessor(Some(Arc::new(get)), None)
    }

    pub(crate) fn reactive(slot: Arc<ReactiveSlot>) -> Self {
        Self {
            kind: PropertyKind::Reactive(slot),
            configurable: true,
        }
    }

    /// Mark the property as non-configurable. Such properties cannot be
    /// redefined, deleted, or made reactive.
    pub fn non_configurable(mut self) -> Self {
        self.configurable = false;
        self
    }

    pub fn is_configurable(&self) -> bool {
        self.configurable
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self.kind, PropertyKind::Accessor { .. })
    }

    pub fn is_reactive(&self) -> bool {
        matches!(self.kind, PropertyKind::Reactive(_))
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            PropertyKind::Data(_) => "data",
            PropertyKind::Accessor { .. } => "accessor",
            PropertyKind::Reactive(_) => "reactive",
        };
        f.debug_struct("Property")
            .field("kind", &kind)
            .field("configurable", &self.configurable)
            .finish()
    }
}

pub(crate) struct ObjectData {
    props: RwLock<IndexMap<String, Property>>,
    observer: OnceLock<Observer>,
    extensible: AtomicBool,
    frozen: AtomicBool,
    root_instance: bool,
}

/// A shared, identity-compared object.
#[derive(Clone)]
pub struct Object(Arc<ObjectData>);

impl Object {
    /// Create an empty object.
    pub fn new() -> Self {
        Self::with_root_flag(false)
    }

    /// Create an empty root instance object.
    ///
    /// Root instances host the proxies of an [`Instance`]. They are never
    /// observed themselves, and dynamic `set`/`del` on them is refused.
    ///
    /// [`Instance`]: crate::instance::Instance
    pub fn root_instance() -> Self {
        Self::with_root_flag(true)
    }

    fn with_root_flag(root_instance: bool) -> Self {
        Self(Arc::new(ObjectData {
            props: RwLock::new(IndexMap::new()),
            observer: OnceLock::new(),
            extensible: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
            root_instance,
        }))
    }

    /// Read a property. Missing keys yield `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        let kind = match self.0.props.read().get(key) {
            Some(prop) => prop.kind.clone(),
            None => return Value::Undefined,
        };

        match kind {
            PropertyKind::Data(value) => value,
            PropertyKind::Accessor { get, .. } => get.map(|get| get(self)).unwrap_or_default(),
            PropertyKind::Reactive(slot) => slot.get(self),
        }
    }

    /// Write a property.
    ///
    /// A missing key becomes a plain (non-reactive) data property, unless the
    /// object is not extensible. Use [`crate::reactive::set`] to add a
    /// reactive key to an observed object.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let kind = self.0.props.read().get(key).map(|prop| prop.kind.clone());

        match kind {
            Some(PropertyKind::Data(_)) => {
                if self.is_frozen() {
                    return;
                }
                if let Some(prop) = self.0.props.write().get_mut(key) {
                    prop.kind = PropertyKind::Data(value);
                }
            }
            Some(PropertyKind::Accessor { set, .. }) => {
                if let Some(set) = set {
                    set(self, value);
                }
            }
            Some(PropertyKind::Reactive(slot)) => slot.set(self, value),
            None => {
                if self.is_extensible() {
                    self.0
                        .props
                        .write()
                        .insert(key.to_string(), Property::data(value));
                }
            }
        }
    }

    /// Define or redefine a property.
    ///
    /// Returns `false` when the existing property is non-configurable or the
    /// key is new and the object is not extensible.
    pub fn define_property(&self, key: &str, property: Property) -> bool {
        let mut props = self.0.props.write();
        match props.get_mut(key) {
            Some(existing) if !existing.configurable => false,
            Some(existing) => {
                *existing = property;
                true
            }
            None if !self.is_extensible() => false,
            None => {
                props.insert(key.to_string(), property);
                true
            }
        }
    }

    /// A copy of the property definition for `key`.
    pub fn property(&self, key: &str) -> Option<Property> {
        self.0.props.read().get(key).cloned()
    }

    /// Remove a property. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> bool {
        let mut props = self.0.props.write();
        match props.get(key) {
            Some(prop) if prop.configurable => {
                props.shift_remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.props.read().contains_key(key)
    }

    /// Own keys, in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0.props.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.props.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.props.read().is_empty()
    }

    /// The dependency behind a reactive key, if the key is reactive.
    pub fn dependency(&self, key: &str) -> Option<DepId> {
        match &self.0.props.read().get(key)?.kind {
            PropertyKind::Reactive(slot) => Some(slot.dep_id()),
            _ => None,
        }
    }

    /// Prevent new keys from being added.
    pub fn prevent_extensions(&self) {
        self.0.extensible.store(false, Ordering::SeqCst);
    }

    /// Freeze the object: no new keys, no writes, no reconfiguration.
    pub fn freeze(&self) {
        self.prevent_extensions();
        self.0.frozen.store(true, Ordering::SeqCst);
        for prop in self.0.props.write().values_mut() {
            prop.configurable = false;
        }
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.load(Ordering::SeqCst)
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.load(Ordering::SeqCst)
    }

    pub fn is_root_instance(&self) -> bool {
        self.0.root_instance
    }

    /// The observer attached to this object, if it has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.0.observer.get().cloned()
    }

    /// Attach the observer marker. Returns the marker already present if
    /// another observer won.
    pub(crate) fn attach_observer(&self, observer: Observer) -> Observer {
        self.0.observer.get_or_init(|| observer).clone()
    }

    /// Whether two handles point at the same object.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Arc::downgrade(&self.0))
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for Object
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let object = Object::new();
        {
            let mut props = object.0.props.write();
            for (key, value) in iter {
                props.insert(key.into(), Property::data(value));
            }
        }
        object
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("keys", &self.keys())
            .field("observed", &self.0.observer.get().is_some())
            .finish()
    }
}

/// Non-owning handle to an [`Object`].
#[derive(Clone)]
pub struct WeakObject(Weak<ObjectData>);

impl WeakObject {
    pub fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(Object)
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakObject")
    }
}
