//! User callables lifted into the DAG: predicates, symbolic functions,
//! type tests and inference constructors.
//!
//! Arguments are value-producing sub-DAGs; the product combinator
//! resolves them from the current binding before the callable runs.
//! A failing callable surfaces as a user-callable error unless the
//! node is absorbing, in which case it becomes a false emission.

use std::collections::BTreeMap;

use async_stream::try_stream;

use eql_symbols::{TypeInfo, Value};

use crate::binding::{Binding, OperationResult};
use crate::error::EqlError;
use crate::eval::{product::product, resolve_value, Ctx};
use crate::graph::{NodeId, NodeKind};
use crate::stream::{self, Emissions};

pub(crate) fn predicate(cx: &Ctx, node: NodeId, input: Binding) -> Emissions {
    let cx = cx.clone();
    let children = cx.graph.children(node).to_vec();
    let (name, callable, absorbing) = match cx.graph.kind(node) {
        NodeKind::Predicate {
            name,
            callable,
            absorbing,
        } => (name.clone(), callable.clone(), *absorbing),
        _ => unreachable!("predicate step on a non-predicate node"),
    };
    Box::pin(try_stream! {
        for await item in product(&cx, &children, input) {
            let emission = item?;
            if !emission.truth {
                yield emission;
                continue;
            }
            let args = children
                .iter()
                .map(|arg| resolve_value(&cx.graph, *arg, &emission.binding))
                .collect::<Result<Vec<_>, _>>()?;
            match callable(&args) {
                Ok(truth) => yield OperationResult { binding: emission.binding, truth },
                Err(_) if absorbing => yield OperationResult::falsy(emission.binding),
                Err(message) => Err(EqlError::user(name.clone(), message))?,
            }
        }
    })
}

pub(crate) fn function(cx: &Ctx, node: NodeId, input: Binding) -> Emissions {
    let cx = cx.clone();
    let var = cx.graph.value_var(node).expect("functions produce values");
    if input.contains(var) {
        return stream::once(OperationResult::truthy(input));
    }
    let children = cx.graph.children(node).to_vec();
    let (name, callable) = match cx.graph.kind(node) {
        NodeKind::Function { name, callable, .. } => (name.clone(), callable.clone()),
        _ => unreachable!("function step on a non-function node"),
    };
    Box::pin(try_stream! {
        for await item in product(&cx, &children, input) {
            let emission = item?;
            if !emission.truth {
                yield emission;
                continue;
            }
            let args = children
                .iter()
                .map(|arg| resolve_value(&cx.graph, *arg, &emission.binding))
                .collect::<Result<Vec<_>, _>>()?;
            let value = callable(&args).map_err(|message| EqlError::user(name.clone(), message))?;
            yield OperationResult::truthy(emission.binding.with(var, value));
        }
    })
}

pub(crate) fn has_type(
    cx: &Ctx,
    node: NodeId,
    ty: &'static TypeInfo,
    input: Binding,
) -> Emissions {
    let cx = cx.clone();
    let child = cx.graph.children(node)[0];
    Box::pin(try_stream! {
        for await item in product(&cx, &[child], input) {
            let emission = item?;
            if !emission.truth {
                yield emission;
                continue;
            }
            let value = resolve_value(&cx.graph, child, &emission.binding)?;
            yield OperationResult { truth: value.is_a(ty), binding: emission.binding };
        }
    })
}

/// Materialise an inferred instance: resolve the keyword arguments
/// from the binding and run the deferred constructor, once per firing
/// binding.
pub(crate) fn inference(cx: &Ctx, node: NodeId, input: Binding) -> Emissions {
    let cx = cx.clone();
    let var = cx.graph.value_var(node).expect("inferences produce values");
    if input.contains(var) {
        return stream::once(OperationResult::truthy(input));
    }
    let children = cx.graph.children(node).to_vec();
    let (ty, ctor, names) = match cx.graph.kind(node) {
        NodeKind::Inference { ty, ctor, kwargs, .. } => (*ty, ctor.clone(), kwargs.clone()),
        _ => unreachable!("inference step on a non-inference node"),
    };
    Box::pin(try_stream! {
        for await item in product(&cx, &children, input) {
            let emission = item?;
            if !emission.truth {
                yield emission;
                continue;
            }
            let mut kwargs = BTreeMap::new();
            for (name, child) in names.iter().zip(&children) {
                kwargs.insert(name.clone(), resolve_value(&cx.graph, *child, &emission.binding)?);
            }
            let value: Value = ctor(&kwargs).map_err(|message| EqlError::user(ty.name, message))?;
            yield OperationResult::truthy(emission.binding.with(var, value));
        }
    })
}
