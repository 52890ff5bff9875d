//! Comparators and membership tests.
//!
//! A comparator's children are two value-producing sub-DAGs. The
//! product combinator extends the binding with both operand values
//! (enumerating whichever side is symbolic), then the operator decides
//! the truth of each merged binding. Equality defers to host
//! equality; ordering uses the host-wide numeric order and errors on
//! incomparable kinds.

use std::cmp::Ordering;

use async_stream::try_stream;

use eql_symbols::{AccessError, Value};

use crate::binding::{Binding, OperationResult};
use crate::error::EqlError;
use crate::eval::{product::product, resolve_value, Ctx};
use crate::expr::CompareOp;
use crate::graph::NodeId;
use crate::stream::Emissions;

pub(crate) fn step(cx: &Ctx, node: NodeId, op: CompareOp, input: Binding) -> Emissions {
    let cx = cx.clone();
    let children = cx.graph.children(node).to_vec();
    Box::pin(try_stream! {
        let (left, right) = (children[0], children[1]);
        for await item in product(&cx, &children, input) {
            let emission = item?;
            if !emission.truth {
                yield emission;
                continue;
            }
            let a = resolve_value(&cx.graph, left, &emission.binding)?;
            let b = resolve_value(&cx.graph, right, &emission.binding)?;
            let truth = apply(op, &a, &b)?;
            yield OperationResult { binding: emission.binding, truth };
        }
    })
}

fn apply(op: CompareOp, a: &Value, b: &Value) -> Result<bool, EqlError> {
    match op {
        CompareOp::Eq => Ok(a == b),
        CompareOp::Ne => Ok(a != b),
        CompareOp::Lt => ordered(a, b).map(|ord| ord == Ordering::Less),
        CompareOp::Le => ordered(a, b).map(|ord| ord != Ordering::Greater),
        CompareOp::Gt => ordered(a, b).map(|ord| ord == Ordering::Greater),
        CompareOp::Ge => ordered(a, b).map(|ord| ord != Ordering::Less),
        CompareOp::In => Ok(b
            .elements()
            .map_err(EqlError::resolution)?
            .iter()
            .any(|element| element == a)),
        CompareOp::Contains => Ok(a
            .elements()
            .map_err(EqlError::resolution)?
            .iter()
            .any(|element| element == b)),
    }
}

fn ordered(a: &Value, b: &Value) -> Result<Ordering, EqlError> {
    a.compare(b).ok_or_else(|| {
        EqlError::resolution(AccessError::Incomparable {
            left: format!("{a}"),
            right: format!("{b}"),
        })
    })
}
