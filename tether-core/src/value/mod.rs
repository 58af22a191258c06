//! Dynamic Values
//!
//! The reactive core works on plain, dynamically typed data: the kind of tree
//! you would get from decoding JSON, except that objects and arrays are
//! shared handles with identity.
//!
//! - Primitives (`Undefined`, `Null`, `Bool`, `Number`, `String`) compare by
//!   value.
//! - Containers ([`Object`], [`Array`]) compare by identity. Two handles are
//!   equal only if they point at the same container.
//!
//! Equality follows strict-equality rules, so `NaN` is never equal to itself.
//! Writes use [`Value::same_value`] to detect "nothing changed", which treats
//! two NaNs as the same value.

mod array;
mod object;

use std::fmt;
use std::sync::Arc;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

pub use array::{Array, Comparator, Mutation};
pub use object::{Getter, Object, Property, Setter, WeakObject};

pub(crate) use array::WeakArray;
pub(crate) use object::PropertyKind;

use crate::reactive::untracked;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Object(Object),
    Array(Array),
}

impl Value {
    /// Whether the value is an object or an array.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness, as used by conditional getters.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Array(_) => true,
        }
    }

    /// Strict equality: primitives by value, containers by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Strict equality, except that NaN is the same value as NaN.
    pub fn same_value(&self, other: &Value) -> bool {
        self.strict_eq(other) || (self.is_nan() && other.is_nan())
    }

    /// Look up one property segment.
    ///
    /// Objects read through their properties (tracked if reactive), arrays
    /// accept an index or `length`. Anything else yields `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(obj) => obj.get(key),
            Value::Array(arr) => match key {
                "length" => Value::from(arr.len()),
                _ => key
                    .parse::<usize>()
                    .map(|index| arr.get(index))
                    .unwrap_or_default(),
            },
            _ => Value::Undefined,
        }
    }

    /// String form used for default array sorting.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Array(arr) => arr
                .to_vec()
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Deep copy into a JSON value, reading accessors untracked.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        n.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({})", format_number(*n)),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Object(obj) => obj.fmt(f),
            Value::Array(arr) => arr.fmt(f),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl From<Array> for Value {
    fn from(value: Array) -> Self {
        Value::Array(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Object(obj) => {
                let entries: Vec<(String, Value)> = untracked(|| {
                    obj.keys()
                        .into_iter()
                        .map(|key| {
                            let value = obj.get(&key);
                            (key, value)
                        })
                        .collect()
                });
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in &entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Array(arr) => {
                let items = arr.to_vec();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in &items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// A property key: a name, or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Name(String),
    Index(usize),
}

impl Key {
    /// The key as an array index, if it is one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(index) => Some(*index),
            Key::Name(name) => name.parse().ok(),
        }
    }

    /// The key as a property name.
    pub fn to_name(&self) -> String {
        match self {
            Key::Name(name) => name.clone(),
            Key::Index(index) => index.to_string(),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Name(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Name(value)
    }
}

impl From<usize> for Key {
    fn from(value: usize) -> Self {
        Key::Index(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Index(index) => write!(f, "{index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitives_compare_by_value() {
        assert_eq!(Value::from(1), Value::from(1.0));
        assert_eq!(Value::from("a"), Value::from("a".to_string()));
        assert_ne!(Value::Null, Value::Undefined);
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = Object::new();
        let b = Object::new();
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }

    #[test]
    fn nan_handling() {
        let nan = Value::from(f64::NAN);
        assert_ne!(nan, nan.clone());
        assert!(nan.same_value(&Value::from(f64::NAN)));
        assert!(!nan.same_value(&Value::from(1)));
    }

    #[test]
    fn json_round_trip_preserves_shape() {
        let source = json!({ "a": 1.0, "b": { "c": [true, null, "x"] } });
        let value = Value::from(source.clone());

        let b = value.get("b");
        assert!(b.as_object().is_some());
        assert_eq!(b.get("c").get("length"), Value::from(3));
        assert_eq!(b.get("c").get("2"), Value::from("x"));
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn lookup_on_primitives_is_undefined() {
        assert!(Value::from(1).get("a").is_undefined());
        assert!(Value::Undefined.get("a").is_undefined());
    }

    #[test]
    fn display_strings() {
        assert_eq!(Value::from(3).to_display_string(), "3");
        assert_eq!(Value::from(2.5).to_display_string(), "2.5");
        assert_eq!(Value::from(f64::NAN).to_display_string(), "NaN");
        let arr: Array = vec![Value::from(1), Value::Null, Value::from("b")]
            .into_iter()
            .collect();
        assert_eq!(Value::from(arr).to_display_string(), "1,,b");
    }

    #[test]
    fn keys_convert_to_indices() {
        assert_eq!(Key::from("3").as_index(), Some(3));
        assert_eq!(Key::from(4).as_index(), Some(4));
        assert_eq!(Key::from("a").as_index(), None);
        assert_eq!(Key::from(2).to_name(), "2");
    }
}
