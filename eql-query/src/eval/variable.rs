//! Variable and mapped-variable resolution.
//!
//! A variable node enumerates its domain, binding its identity to each
//! candidate that passes the implicit type check. Mapped variables
//! pull from their source's stream and navigate one step further
//! through the reflection bridge. Every step here first checks the
//! incoming binding: a variable that is already bound passes through
//! unchanged, which is what unifies shared variables across
//! constraints and makes child order irrelevant for correctness.

use async_stream::try_stream;

use eql_symbols::Value;

use crate::binding::{Binding, OperationResult};
use crate::error::EqlError;
use crate::eval::{evaluate, resolve_value, Ctx};
use crate::expr::Domain;
use crate::graph::{NodeId, NodeKind};
use crate::stream::{self, Emissions};

pub(crate) fn step(cx: &Ctx, node: NodeId, input: Binding) -> Emissions {
    let graph = cx.graph.clone();
    let var = graph.value_var(node).expect("variable nodes produce values");
    if input.contains(var) {
        return stream::once(OperationResult::truthy(input));
    }
    match graph.kind(node) {
        NodeKind::Variable { ty, domain, .. } => {
            let cx = cx.clone();
            let ty = *ty;
            let domain = domain.clone();
            Box::pin(try_stream! {
                // The domain is read inside the generator so that
                // implicit domains snapshot at first pull, not at
                // stream construction.
                let candidates: Vec<Value> = match &domain {
                    Domain::Explicit(values) => values.clone(),
                    Domain::Registry(registry) => {
                        cx.snapshot(node, || registry.instances_of(ty)).as_ref().clone()
                    }
                    Domain::Deduced => cx.deduced_of(ty),
                };
                for candidate in candidates {
                    // Implicit type check: foreign candidates are
                    // suppressed, not failed.
                    if candidate.is_a(ty) {
                        yield OperationResult::truthy(input.with(var, candidate));
                    }
                }
            })
        }
        NodeKind::Attribute { name, .. } => {
            let source = graph.children(node)[0];
            let name = name.clone();
            let cx = cx.clone();
            Box::pin(try_stream! {
                for await item in evaluate(&cx, source, input) {
                    let emission = item?;
                    if !emission.truth {
                        yield emission;
                        continue;
                    }
                    let value = resolve_value(&cx.graph, source, &emission.binding)?;
                    let mapped = value.attr(&name).map_err(EqlError::resolution)?;
                    yield OperationResult::truthy(emission.binding.with(var, mapped));
                }
            })
        }
        NodeKind::Index { key, .. } => {
            let source = graph.children(node)[0];
            let key = key.clone();
            let cx = cx.clone();
            Box::pin(try_stream! {
                for await item in evaluate(&cx, source, input) {
                    let emission = item?;
                    if !emission.truth {
                        yield emission;
                        continue;
                    }
                    let value = resolve_value(&cx.graph, source, &emission.binding)?;
                    let mapped = value.index(&key).map_err(EqlError::resolution)?;
                    yield OperationResult::truthy(emission.binding.with(var, mapped));
                }
            })
        }
        NodeKind::Call { .. } => {
            let children = graph.children(node).to_vec();
            let cx = cx.clone();
            Box::pin(try_stream! {
                for await item in crate::eval::product::product(&cx, &children, input) {
                    let emission = item?;
                    if !emission.truth {
                        yield emission;
                        continue;
                    }
                    let callee = resolve_value(&cx.graph, children[0], &emission.binding)?;
                    let args = children[1..]
                        .iter()
                        .map(|arg| resolve_value(&cx.graph, *arg, &emission.binding))
                        .collect::<Result<Vec<_>, _>>()?;
                    let mapped = callee.invoke(&args).map_err(EqlError::resolution)?;
                    yield OperationResult::truthy(emission.binding.with(var, mapped));
                }
            })
        }
        NodeKind::Flat { .. } => {
            let source = graph.children(node)[0];
            let cx = cx.clone();
            Box::pin(try_stream! {
                for await item in evaluate(&cx, source, input) {
                    let emission = item?;
                    if !emission.truth {
                        yield emission;
                        continue;
                    }
                    let value = resolve_value(&cx.graph, source, &emission.binding)?;
                    let elements = value.elements().map_err(EqlError::resolution)?.to_vec();
                    for element in elements {
                        yield OperationResult::truthy(emission.binding.with(var, element));
                    }
                }
            })
        }
        other => unreachable!("not a variable node: {:?}", std::mem::discriminant(other)),
    }
}
