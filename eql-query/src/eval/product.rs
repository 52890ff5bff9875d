//! The generalised cartesian-product combinator.
//!
//! Shared by AND, the query root, comparators and quantified
//! conditions: given ordered children and a source binding, produce
//! every compatible merge of one true emission per child. A false
//! emission short-circuits its branch: it flows through with its
//! binding so downstream logic can observe the failing context, but
//! deeper children are never evaluated under it.
//!
//! Before evaluation the children are reordered deterministically:
//! children introducing no new variables (pure truth tests) first,
//! then ascending by the number of variables their subtree can
//! introduce, ties broken by attachment order. Compatibility needs no
//! separate merge step here: every child extends the binding it was
//! given, and already-bound variables pass through their nodes
//! unchanged, so conflicting assignments never arise.

use std::sync::Arc;

use async_stream::try_stream;
use tracing::trace;

use crate::binding::{Binding, OperationResult};
use crate::eval::{evaluate, Ctx};
use crate::graph::{ExprGraph, NodeId};
use crate::stream::{self, Emissions};

/// Evaluate the product of `children` under `input`.
pub(crate) fn product(cx: &Ctx, children: &[NodeId], input: Binding) -> Emissions {
    if children.is_empty() {
        return stream::once(OperationResult::truthy(input));
    }
    let order = reorder(&cx.graph, children);
    trace!(?order, "cartesian product order");
    drive(cx.clone(), Arc::new(order), 0, input)
}

/// Stable, deterministic, binding-aware child ordering.
///
/// A child is *ready* once every variable it consumes without
/// providing (negation and quantified conditions do this) is either
/// already available or not provided by any still-unplaced sibling.
/// Among ready children the maximally-constraining one goes first:
/// fewest introduced variables, ties broken by attachment order.
/// Mutually dependent children fall back to the same key, which
/// places the narrowest provider first.
pub(crate) fn reorder(graph: &ExprGraph, children: &[NodeId]) -> Vec<NodeId> {
    let mut remaining: Vec<(usize, NodeId)> = children.iter().copied().enumerate().collect();
    let mut available: std::collections::BTreeSet<crate::binding::VariableId> =
        std::collections::BTreeSet::new();
    let mut ordered = Vec::with_capacity(children.len());

    while !remaining.is_empty() {
        let ready = |pos: usize| {
            let (_, node) = remaining[pos];
            graph
                .mentions(node)
                .iter()
                .filter(|var| !graph.provides(node).contains(var))
                .all(|var| {
                    available.contains(var)
                        || !remaining
                            .iter()
                            .enumerate()
                            .any(|(other, (_, sibling))| {
                                other != pos && graph.provides(*sibling).contains(var)
                            })
                })
        };
        let key = |pos: usize| {
            let (index, node) = remaining[pos];
            (graph.provides(node).len(), index)
        };
        let next = (0..remaining.len())
            .filter(|pos| ready(*pos))
            .min_by_key(|pos| key(*pos))
            .unwrap_or_else(|| {
                (0..remaining.len())
                    .min_by_key(|pos| key(*pos))
                    .expect("non-empty remaining")
            });
        let (_, node) = remaining.remove(next);
        available.extend(graph.provides(node).iter().copied());
        ordered.push(node);
    }
    ordered
}

fn drive(cx: Ctx, order: Arc<Vec<NodeId>>, depth: usize, acc: Binding) -> Emissions {
    if depth == order.len() {
        return stream::once(OperationResult::truthy(acc));
    }
    let node = order[depth];
    Box::pin(try_stream! {
        for await item in evaluate(&cx, node, acc.clone()) {
            let emission = item?;
            if !emission.truth {
                // Short-circuit this branch: the failing context flows
                // through, children past this one are not evaluated.
                yield OperationResult::falsy(emission.binding);
                continue;
            }
            for await deeper in drive(cx.clone(), order.clone(), depth + 1, emission.binding) {
                yield deeper?;
            }
        }
    })
}
