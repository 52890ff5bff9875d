//! The reflection bridge: how the engine reads arbitrary user objects.
//!
//! Domain types implement [`Symbol`] to expose attribute, index and
//! call navigation plus a [`TypeInfo`] descriptor. All bridge methods
//! must be pure; the engine may call them any number of times in any
//! order.

use thiserror::Error;

use crate::value::Value;

/// Static type descriptor with single inheritance.
///
/// Descriptors are expected to be `'static` values, one per domain
/// type, linked through `parent` to form the subtyping chain that
/// `is_a` checks walk.
#[derive(Debug)]
pub struct TypeInfo {
    pub name: &'static str,
    pub parent: Option<&'static TypeInfo>,
}

impl TypeInfo {
    pub const fn new(name: &'static str, parent: Option<&'static TypeInfo>) -> Self {
        TypeInfo { name, parent }
    }

    /// True if `self` is `ancestor` or transitively derives from it.
    pub fn is(&self, ancestor: &TypeInfo) -> bool {
        let mut current = Some(self);
        while let Some(info) = current {
            if std::ptr::eq(info, ancestor) || info.name == ancestor.name {
                return true;
            }
            current = info.parent;
        }
        false
    }
}

/// Builtin descriptors for the primitive value kinds.
pub static NULL: TypeInfo = TypeInfo::new("null", None);
pub static BOOLEAN: TypeInfo = TypeInfo::new("boolean", None);
pub static INTEGER: TypeInfo = TypeInfo::new("integer", None);
pub static FLOAT: TypeInfo = TypeInfo::new("float", None);
pub static TEXT: TypeInfo = TypeInfo::new("text", None);
pub static LIST: TypeInfo = TypeInfo::new("list", None);

/// A host object the engine can navigate.
///
/// Implementations must hand out attribute values by cloning the
/// `Arc`s they hold, not by re-wrapping fresh allocations; object
/// identity (and with it binding compatibility) relies on the same
/// instance producing the same pointer every time.
pub trait Symbol: std::fmt::Debug + Send + Sync {
    /// The type descriptor for this instance.
    fn type_info(&self) -> &'static TypeInfo;

    /// Read a named attribute.
    fn attr(&self, name: &str) -> Result<Value, AccessError>;

    /// Index with a key. Defaults to unsupported.
    fn index(&self, key: &Value) -> Result<Value, AccessError> {
        Err(AccessError::BadIndex {
            type_name: self.type_info().name,
            key: format!("{key}"),
        })
    }

    /// Invoke this object as a callable. Defaults to unsupported.
    fn invoke(&self, _args: &[Value]) -> Result<Value, AccessError> {
        Err(AccessError::NotCallable {
            type_name: self.type_info().name,
        })
    }

    /// Stable identity token; the default is the instance address.
    fn identity(&self) -> usize {
        self as *const Self as *const () as usize
    }

    /// Host equality; defaults to identity.
    fn eq_symbol(&self, other: &dyn Symbol) -> bool {
        self.identity() == other.identity()
    }

    /// Short human-readable form used in diagnostics and logs.
    fn display(&self) -> String {
        format!("{}@{:x}", self.type_info().name, self.identity())
    }
}

/// Failures raised by the reflection bridge while navigating a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessError {
    #[error("type {type_name} has no attribute {attribute:?}")]
    MissingAttribute {
        type_name: &'static str,
        attribute: String,
    },

    #[error("cannot index {type_name} with {key}")]
    BadIndex {
        type_name: &'static str,
        key: String,
    },

    #[error("{type_name} is not callable")]
    NotCallable { type_name: &'static str },

    #[error("invoking {type_name} failed: {message}")]
    CallFailed {
        type_name: &'static str,
        message: String,
    },

    #[error("value of type {type_name} is not iterable")]
    NotIterable { type_name: &'static str },

    #[error("cannot order {left} against {right}")]
    Incomparable { left: String, right: String },
}
