//! The in-flight currency of evaluation: bindings and operation
//! results.
//!
//! A [`Binding`] maps variable identities to host values. A node's
//! step receives a binding and emits zero or more
//! [`OperationResult`]s, each extending the input binding and carrying
//! a truth flag. A false result still carries its binding so logical
//! composition can observe the context that failed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use eql_symbols::Value;

/// Stable opaque identity assigned at variable creation. Identity is
/// what bindings key on: not the variable's name, not its value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct VariableId(u64);

static NEXT_VARIABLE: AtomicU64 = AtomicU64::new(1);

impl VariableId {
    pub(crate) fn fresh() -> Self {
        VariableId(NEXT_VARIABLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// A finite mapping from variable identity to a concrete host value.
#[derive(Clone, Default, PartialEq)]
pub struct Binding {
    entries: BTreeMap<VariableId, Value>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: VariableId) -> Option<&Value> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: VariableId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.entries.keys().copied()
    }

    pub(crate) fn insert(&mut self, id: VariableId, value: Value) {
        self.entries.insert(id, value);
    }

    /// A copy of this binding extended with one more entry.
    pub fn with(&self, id: VariableId, value: Value) -> Self {
        let mut next = self.clone();
        next.insert(id, value);
        next
    }

    /// Merge two bindings. On shared identities the values must be
    /// host-equal; otherwise the bindings are incompatible and the
    /// merge is dropped.
    pub fn merge(&self, other: &Binding) -> Option<Binding> {
        let mut merged = self.clone();
        for (id, value) in &other.entries {
            match merged.entries.get(id) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    merged.entries.insert(*id, value.clone());
                }
            }
        }
        Some(merged)
    }

    /// True when `other` contains every entry of `self` with a
    /// host-equal value.
    pub fn is_subset_of(&self, other: &Binding) -> bool {
        self.entries
            .iter()
            .all(|(id, value)| other.get(*id) == Some(value))
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

/// A `(binding, truth)` emission flowing between expression nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationResult {
    pub binding: Binding,
    pub truth: bool,
}

impl OperationResult {
    pub fn truthy(binding: Binding) -> Self {
        OperationResult {
            binding,
            truth: true,
        }
    }

    pub fn falsy(binding: Binding) -> Self {
        OperationResult {
            binding,
            truth: false,
        }
    }
}
