//! The `Value` enum: what variable bindings actually hold.
//!
//! A `Value` is either a primitive, a list, or a reference-counted
//! handle to a user object implementing [`Symbol`]. Equality follows
//! host semantics: numbers compare across integer/float, objects
//! compare by identity unless their type overrides it. Ordering is
//! defined for numbers and texts only; comparing across kinds is an
//! access error rather than a silent `false`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::symbol::{AccessError, Symbol, TypeInfo};

/// A host value flowing through the engine.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value; also the default aggregator fallback.
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    /// A user object reachable through the reflection bridge.
    Object(Arc<dyn Symbol>),
}

impl Value {
    /// The type descriptor for this value. Objects report their own
    /// [`TypeInfo`]; primitives report the builtin descriptors.
    pub fn type_info(&self) -> &'static TypeInfo {
        match self {
            Value::Null => &crate::symbol::NULL,
            Value::Boolean(_) => &crate::symbol::BOOLEAN,
            Value::Integer(_) => &crate::symbol::INTEGER,
            Value::Float(_) => &crate::symbol::FLOAT,
            Value::Text(_) => &crate::symbol::TEXT,
            Value::List(_) => &crate::symbol::LIST,
            Value::Object(symbol) => symbol.type_info(),
        }
    }

    /// Host `is_a` check: walks the object's type chain, or matches the
    /// builtin descriptor for primitives.
    pub fn is_a(&self, ty: &TypeInfo) -> bool {
        self.type_info().is(ty)
    }

    /// Numeric view used by comparisons and aggregation folds.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Read an attribute through the reflection bridge.
    pub fn attr(&self, name: &str) -> Result<Value, AccessError> {
        match self {
            Value::Object(symbol) => symbol.attr(name),
            other => Err(AccessError::MissingAttribute {
                type_name: other.type_info().name,
                attribute: name.to_string(),
            }),
        }
    }

    /// Index with a key. Lists and texts support integer keys natively;
    /// objects delegate to their bridge implementation.
    pub fn index(&self, key: &Value) -> Result<Value, AccessError> {
        match (self, key) {
            (Value::List(items), Value::Integer(i)) => items
                .get(usize::try_from(*i).ok().ok_or_else(|| bad_index(self, key))?)
                .cloned()
                .ok_or_else(|| bad_index(self, key)),
            (Value::Text(text), Value::Integer(i)) => text
                .chars()
                .nth(usize::try_from(*i).ok().ok_or_else(|| bad_index(self, key))?)
                .map(|c| Value::Text(c.to_string()))
                .ok_or_else(|| bad_index(self, key)),
            (Value::Object(symbol), key) => symbol.index(key),
            _ => Err(bad_index(self, key)),
        }
    }

    /// Invoke a callable value with positional arguments.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, AccessError> {
        match self {
            Value::Object(symbol) => symbol.invoke(args),
            other => Err(AccessError::NotCallable {
                type_name: other.type_info().name,
            }),
        }
    }

    /// The elements of an iterable value, for flattening.
    pub fn elements(&self) -> Result<&[Value], AccessError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(AccessError::NotIterable {
                type_name: other.type_info().name,
            }),
        }
    }

    /// Number of elements in a collection value.
    pub fn len(&self) -> Result<usize, AccessError> {
        match self {
            Value::List(items) => Ok(items.len()),
            Value::Text(text) => Ok(text.chars().count()),
            other => Err(AccessError::NotIterable {
                type_name: other.type_info().name,
            }),
        }
    }

    /// Host ordering: numbers order across integer/float, texts
    /// lexicographically, booleans false-before-true. `None` for any
    /// other pairing.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (self.as_number()?, other.as_number()?);
                a.partial_cmp(&b)
            }
        }
    }
}

fn bad_index(value: &Value, key: &Value) -> AccessError {
    AccessError::BadIndex {
        type_name: value.type_info().name,
        key: format!("{key}"),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.eq_symbol(b.as_ref()),
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Object(symbol) => write!(f, "{}", symbol.display()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Text(s) => serializer.serialize_str(s),
            Value::List(items) => items.serialize(serializer),
            Value::Object(symbol) => {
                let mut state = serializer.serialize_struct("Object", 2)?;
                state.serialize_field("type", symbol.type_info().name)?;
                state.serialize_field("display", &symbol.display())?;
                state.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Arc<dyn Symbol>> for Value {
    fn from(symbol: Arc<dyn Symbol>) -> Self {
        Value::Object(symbol)
    }
}

impl<S: Symbol + 'static> From<&Arc<S>> for Value {
    fn from(symbol: &Arc<S>) -> Self {
        Value::Object(symbol.clone())
    }
}

/// A hashable projection of a [`Value`], used as the key for grouping
/// and distinct-deduplication. Floats with an integral value collapse
/// onto the matching integer key so that host-equal numbers land in the
/// same bucket; other floats key on their bit pattern. Objects key on
/// identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Null,
    Boolean(bool),
    Integer(i64),
    FloatBits(u64),
    Text(String),
    List(Vec<GroupKey>),
    Object(usize),
}

impl From<&Value> for GroupKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => GroupKey::Null,
            Value::Boolean(b) => GroupKey::Boolean(*b),
            Value::Integer(n) => GroupKey::Integer(*n),
            Value::Float(x) if x.fract() == 0.0 && x.is_finite() => {
                GroupKey::Integer(*x as i64)
            }
            Value::Float(x) => GroupKey::FloatBits(x.to_bits()),
            Value::Text(s) => GroupKey::Text(s.clone()),
            Value::List(items) => GroupKey::List(items.iter().map(GroupKey::from).collect()),
            Value::Object(symbol) => GroupKey::Object(symbol.identity()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol;

    #[test]
    fn numeric_equality_crosses_kinds() {
        assert_eq!(Value::Integer(1), Value::Float(1.0));
        assert_ne!(Value::Integer(1), Value::Float(1.5));
        assert_ne!(Value::Integer(1), Value::Text("1".into()));
    }

    #[test]
    fn ordering_is_host_wide_for_numbers() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Text("b".into()).compare(&Value::Text("a".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Text("a".into()).compare(&Value::Integer(1)), None);
    }

    #[test]
    fn list_indexing() {
        let list = Value::List(vec![Value::Integer(10), Value::Integer(20)]);
        assert_eq!(list.index(&Value::Integer(1)).unwrap(), Value::Integer(20));
        assert!(list.index(&Value::Integer(2)).is_err());
        assert!(list.index(&Value::Text("x".into())).is_err());
    }

    #[test]
    fn group_key_collapses_integral_floats() {
        assert_eq!(
            GroupKey::from(&Value::Float(2.0)),
            GroupKey::from(&Value::Integer(2))
        );
        assert_ne!(
            GroupKey::from(&Value::Float(2.5)),
            GroupKey::from(&Value::Integer(2))
        );
    }

    #[test]
    fn primitives_answer_is_a() {
        assert!(Value::Integer(3).is_a(&symbol::INTEGER));
        assert!(!Value::Integer(3).is_a(&symbol::TEXT));
    }
}
