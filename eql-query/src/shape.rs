//! Result shaping: ordering, distinct, limit.
//!
//! Sorting and distinct buffer the stream; limit is O(1) and closes
//! the upstream after the nth element. Multiple ordered_by clauses
//! form a lexicographic ordering in attachment order, breaking ties
//! stably on the prior stream order.

use std::cmp::Ordering;

use indexmap::IndexSet;

use eql_symbols::{GroupKey, Value};

use crate::binding::Binding;
use crate::error::EqlError;
use crate::eval::resolve_value;
use crate::graph::{ExprGraph, NodeId};

#[derive(Clone, Copy)]
pub(crate) struct OrderSpec {
    pub node: NodeId,
    pub descending: bool,
}

/// A projected result row: the binding it came from plus the selected
/// value (a single value, or a list for multi-select queries).
pub(crate) struct Row {
    pub binding: Binding,
    pub value: Value,
}

/// Stable lexicographic sort by the ordering expressions' values under
/// each row's binding. Incomparable pairs rank as equal, falling back
/// to the prior order.
pub(crate) fn sort(
    graph: &ExprGraph,
    rows: &mut Vec<Row>,
    orders: &[OrderSpec],
) -> Result<(), EqlError> {
    let mut keys: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        keys.push(
            orders
                .iter()
                .map(|order| resolve_value(graph, order.node, &row.binding))
                .collect::<Result<Vec<_>, _>>()?,
        );
    }
    let mut indices: Vec<usize> = (0..rows.len()).collect();
    indices.sort_by(|&a, &b| {
        for (spec, (ka, kb)) in orders.iter().zip(keys[a].iter().zip(keys[b].iter())) {
            let ordering = ka.compare(kb).unwrap_or(Ordering::Equal);
            let ordering = if spec.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    let mut reordered = Vec::with_capacity(rows.len());
    for index in indices {
        reordered.push(Row {
            binding: std::mem::take(&mut rows[index].binding),
            value: std::mem::replace(&mut rows[index].value, Value::Null),
        });
    }
    *rows = reordered;
    Ok(())
}

/// Drop rows whose selected value tuple was already seen, keeping the
/// first occurrence.
pub(crate) fn distinct(rows: Vec<Row>) -> Vec<Row> {
    let mut seen: IndexSet<GroupKey> = IndexSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(GroupKey::from(&row.value)))
        .collect()
}
