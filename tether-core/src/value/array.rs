//! Arrays
//!
//! Every mutating operation on an [`Array`] goes through [`Array::mutate`].
//! That single entry point applies the change natively and then, if the array
//! carries an observer, hands the inserted elements to the reactive layer so
//! they are observed and the array's subscribers are notified.
//!
//! Index reads are not tracked. Code that wants to react to an array's
//! contents reads the array through a reactive property, which subscribes it
//! to the array's collection-level dependency.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;

use super::Value;
use crate::reactive::{array_mutated, Observer};

/// Sort comparator.
pub type Comparator = Arc<dyn Fn(&Value, &Value) -> CmpOrdering + Send + Sync>;

/// A mutating array operation.
#[derive(Clone)]
pub enum Mutation {
    Push(Vec<Value>),
    Pop,
    Shift,
    Unshift(Vec<Value>),
    Splice {
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    },
    Sort(Option<Comparator>),
    Reverse,
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Push(_) => "push",
            Mutation::Pop => "pop",
            Mutation::Shift => "shift",
            Mutation::Unshift(_) => "unshift",
            Mutation::Splice { .. } => "splice",
            Mutation::Sort(_) => "sort",
            Mutation::Reverse => "reverse",
        }
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) struct ArrayData {
    items: RwLock<Vec<Value>>,
    observer: OnceLock<Observer>,
    extensible: AtomicBool,
    frozen: AtomicBool,
}

/// A shared, identity-compared array.
#[derive(Clone)]
pub struct Array(Arc<ArrayData>);

impl Array {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(ArrayData {
            items: RwLock::new(items),
            observer: OnceLock::new(),
            extensible: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
        }))
    }

    /// Read an element. Out-of-range indices yield `Undefined`.
    pub fn get(&self, index: usize) -> Value {
        self.0.items.read().get(index).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.items.read().is_empty()
    }

    /// A copy of the elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.read().clone()
    }

    pub fn push(&self, value: impl Into<Value>) -> Value {
        self.mutate(Mutation::Push(vec![value.into()]))
    }

    pub fn pop(&self) -> Value {
        self.mutate(Mutation::Pop)
    }

    pub fn shift(&self) -> Value {
        self.mutate(Mutation::Shift)
    }

    pub fn unshift(&self, value: impl Into<Value>) -> Value {
        self.mutate(Mutation::Unshift(vec![value.into()]))
    }

    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Value {
        self.mutate(Mutation::Splice {
            start,
            delete_count,
            items,
        })
    }

    pub fn sort(&self) -> Value {
        self.mutate(Mutation::Sort(None))
    }

    pub fn sort_by<F>(&self, compare: F) -> Value
    where
        F: Fn(&Value, &Value) -> CmpOrdering + Send + Sync + 'static,
    {
        self.mutate(Mutation::Sort(Some(Arc::new(compare))))
    }

    pub fn reverse(&self) -> Value {
        self.mutate(Mutation::Reverse)
    }

    /// Apply a mutation and return what the native operation returns:
    ///
    /// - `push`/`unshift`: the new length
    /// - `pop`/`shift`: the removed element, or `Undefined`
    /// - `splice`: a new array of the removed elements
    /// - `sort`/`reverse`: the array itself
    ///
    /// Frozen arrays are left untouched and yield `Undefined`.
    pub fn mutate(&self, mutation: Mutation) -> Value {
        if self.is_frozen() {
            return Value::Undefined;
        }

        let name = mutation.name();
        let (result, inserted) = self.apply(mutation);

        if let Some(observer) = self.observer() {
            tracing::trace!(method = name, inserted = inserted.len(), "array mutated");
            array_mutated(&observer, &inserted);
        }
        result
    }

    fn apply(&self, mutation: Mutation) -> (Value, Vec<Value>) {
        match mutation {
            Mutation::Push(values) => {
                let mut items = self.0.items.write();
                items.extend(values.iter().cloned());
                (Value::from(items.len()), values)
            }
            Mutation::Pop => {
                let removed = self.0.items.write().pop();
                (removed.unwrap_or_default(), Vec::new())
            }
            Mutation::Shift => {
                let mut items = self.0.items.write();
                let removed = if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                };
                (removed, Vec::new())
            }
            Mutation::Unshift(values) => {
                let mut items = self.0.items.write();
                items.splice(0..0, values.iter().cloned());
                (Value::from(items.len()), values)
            }
            Mutation::Splice {
                start,
                delete_count,
                items: values,
            } => {
                let mut items = self.0.items.write();
                let start = start.min(items.len());
                let end = start.saturating_add(delete_count).min(items.len());
                let removed: Vec<Value> = items.splice(start..end, values.iter().cloned()).collect();
                (Value::Array(Array::from_vec(removed)), values)
            }
            Mutation::Sort(compare) => {
                // Sort a copy outside the lock; the comparator may read the array.
                let mut items = self.to_vec();
                match compare {
                    Some(compare) => items.sort_by(|a, b| compare(a, b)),
                    None => items.sort_by(default_order),
                }
                *self.0.items.write() = items;
                (Value::Array(self.clone()), Vec::new())
            }
            Mutation::Reverse => {
                self.0.items.write().reverse();
                (Value::Array(self.clone()), Vec::new())
            }
        }
    }

    pub fn prevent_extensions(&self) {
        self.0.extensible.store(false, Ordering::SeqCst);
    }

    pub fn freeze(&self) {
        self.prevent_extensions();
        self.0.frozen.store(true, Ordering::SeqCst);
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.load(Ordering::SeqCst)
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.load(Ordering::SeqCst)
    }

    /// The observer attached to this array, if it has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.0.observer.get().cloned()
    }

    pub(crate) fn attach_observer(&self, observer: Observer) -> Observer {
        self.0.observer.get_or_init(|| observer).clone()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakArray {
        WeakArray(Arc::downgrade(&self.0))
    }
}

/// Default ordering: by string form, with `Undefined` last.
fn default_order(a: &Value, b: &Value) -> CmpOrdering {
    match (a.is_undefined(), b.is_undefined()) {
        (true, true) => CmpOrdering::Equal,
        (true, false) => CmpOrdering::Greater,
        (false, true) => CmpOrdering::Less,
        (false, false) => a.to_display_string().cmp(&b.to_display_string()),
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Into<Value>> FromIterator<V> for Array {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("len", &self.len())
            .field("observed", &self.0.observer.get().is_some())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakArray(Weak<ArrayData>);

impl WeakArray {
    pub(crate) fn upgrade(&self) -> Option<Array> {
        self.0.upgrade().map(Array)
    }
}
