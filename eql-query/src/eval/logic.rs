//! Boolean composition: OR, NOT, and the quantified conditions.
//!
//! AND is the cartesian product and lives in `product`. OR evaluates
//! its left arm first and touches the right arm only when the left
//! produced no true emission. NOT inverts the existence of a true
//! emission and never leaks its child's variables into the outer
//! scope. Both absorb resolution and user-callable failures per the
//! propagation policy: an error surfaces only if every branch it
//! could have been absorbed by fails.

use async_stream::try_stream;

use crate::binding::{Binding, OperationResult};
use crate::error::EqlError;
use crate::eval::{evaluate, product::product, Ctx};
use crate::graph::NodeId;
use crate::stream::{Emissions, StreamExt};

pub(crate) fn or(cx: &Ctx, left: NodeId, right: NodeId, input: Binding) -> Emissions {
    let cx = cx.clone();
    Box::pin(try_stream! {
        let mut any_true = false;
        let mut held: Option<EqlError> = None;
        for arm in [left, right] {
            let mut emissions = evaluate(&cx, arm, input.clone());
            while let Some(item) = emissions.next().await {
                match item {
                    Ok(emission) if emission.truth => {
                        any_true = true;
                        yield emission;
                    }
                    Ok(_) => {}
                    Err(err) if err.is_absorbable() => {
                        // The arm failed; remember the first failure in
                        // case the other arm fails too.
                        held.get_or_insert(err);
                        break;
                    }
                    Err(err) => Err(err)?,
                }
            }
            if any_true {
                // Short-circuit: the right arm is never evaluated once
                // the left produced a true emission.
                break;
            }
        }
        if !any_true {
            if let Some(err) = held {
                Err(err)?;
            }
            yield OperationResult::falsy(input);
        }
    })
}

pub(crate) fn not(cx: &Ctx, child: NodeId, input: Binding) -> Emissions {
    let cx = cx.clone();
    Box::pin(try_stream! {
        let truth = !holds(&cx, child, input.clone()).await?;
        yield OperationResult { binding: input, truth };
    })
}

/// Universal condition over its quantified variables: children are
/// `[v1..vq, condition]`.
pub(crate) fn for_all(cx: &Ctx, node: NodeId, quantified: usize, input: Binding) -> Emissions {
    let cx = cx.clone();
    let children = cx.graph.children(node).to_vec();
    Box::pin(try_stream! {
        let (variables, condition) = (&children[..quantified], children[quantified]);
        let mut truth = true;
        let mut assignments = product(&cx, variables, input.clone());
        while let Some(item) = assignments.next().await {
            let emission = item?;
            if !emission.truth {
                continue;
            }
            if !holds(&cx, condition, emission.binding).await? {
                truth = false;
                break;
            }
        }
        yield OperationResult { binding: input, truth };
    })
}

/// Existential condition; with no quantified variables it simply tests
/// whether the condition has a true emission under the input binding.
pub(crate) fn exists(cx: &Ctx, node: NodeId, quantified: usize, input: Binding) -> Emissions {
    let cx = cx.clone();
    let children = cx.graph.children(node).to_vec();
    Box::pin(try_stream! {
        let (variables, condition) = (&children[..quantified], children[quantified]);
        let mut truth = false;
        let mut assignments = product(&cx, variables, input.clone());
        while let Some(item) = assignments.next().await {
            let emission = item?;
            if !emission.truth {
                continue;
            }
            if holds(&cx, condition, emission.binding).await? {
                truth = true;
                break;
            }
        }
        yield OperationResult { binding: input, truth };
    })
}

/// Whether `node` produces at least one true emission under `binding`.
/// Absorbable failures count as "no true emission"; an erroring child
/// stream is treated as exhausted.
pub(crate) async fn holds(cx: &Ctx, node: NodeId, binding: Binding) -> Result<bool, EqlError> {
    let mut emissions = evaluate(cx, node, binding);
    while let Some(item) = emissions.next().await {
        match item {
            Ok(emission) if emission.truth => return Ok(true),
            Ok(_) => {}
            Err(err) if err.is_absorbable() => return Ok(false),
            Err(err) => return Err(err),
        }
    }
    Ok(false)
}
