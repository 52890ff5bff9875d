//! The streaming evaluator.
//!
//! [`evaluate`] is the public driver: it wraps a node's [`step`] with
//! error-path bookkeeping. `step` holds the per-kind algorithm and is
//! the only place that knows node payloads. Everything is a lazy
//! stream; nothing runs until the root quantifier pulls.

pub(crate) mod compare;
pub(crate) mod logic;
pub(crate) mod predicate;
pub(crate) mod product;
pub(crate) mod variable;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_stream::try_stream;

use eql_symbols::{TypeInfo, Value};

use crate::binding::Binding;
use crate::error::EqlError;
use crate::graph::{ExprGraph, NodeId, NodeKind};
use crate::stream::{self, Emissions};

/// Shared state for one evaluation run of a built query.
///
/// Holds the registry snapshots pinned at first pull (one per
/// implicit-domain variable, for the duration of this run) and the
/// store of instances inferred by rule conclusions so far.
pub(crate) struct EvalContext {
    pub graph: Arc<ExprGraph>,
    snapshots: Mutex<HashMap<NodeId, Arc<Vec<Value>>>>,
    deduced: Mutex<Vec<(&'static TypeInfo, Value)>>,
}

pub(crate) type Ctx = Arc<EvalContext>;

impl EvalContext {
    pub fn new(graph: Arc<ExprGraph>) -> Ctx {
        Arc::new(EvalContext {
            graph,
            snapshots: Mutex::new(HashMap::new()),
            deduced: Mutex::new(Vec::new()),
        })
    }

    /// The pinned domain snapshot for an implicit-domain variable
    /// node, taken on first use within this run.
    pub fn snapshot(&self, node: NodeId, take: impl FnOnce() -> Vec<Value>) -> Arc<Vec<Value>> {
        let mut snapshots = self.snapshots.lock().expect("snapshot cache poisoned");
        snapshots.entry(node).or_insert_with(|| Arc::new(take())).clone()
    }

    /// Instances concluded so far whose type derives from `ty`. Read
    /// at pull time, not cached: later rules see earlier conclusions.
    pub fn deduced_of(&self, ty: &TypeInfo) -> Vec<Value> {
        let deduced = self.deduced.lock().expect("deduced store poisoned");
        deduced
            .iter()
            .filter(|(info, _)| info.is(ty))
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn record_deduced(&self, ty: &'static TypeInfo, value: Value) {
        let mut deduced = self.deduced.lock().expect("deduced store poisoned");
        deduced.push((ty, value));
    }
}

/// Evaluate `node` under `input`: the node's step with parent-side
/// bookkeeping applied. Errors pick up the node identity on the way
/// out, building the root-to-failure expression path.
pub(crate) fn evaluate(cx: &Ctx, node: NodeId, input: Binding) -> Emissions {
    let inner = step(cx, node, input);
    Box::pin(try_stream! {
        for await item in inner {
            let emission = item.map_err(|e| e.trace(node))?;
            yield emission;
        }
    })
}

/// The per-node algorithm.
fn step(cx: &Ctx, node: NodeId, input: Binding) -> Emissions {
    let graph = cx.graph.clone();
    match graph.kind(node) {
        NodeKind::Variable { .. }
        | NodeKind::Attribute { .. }
        | NodeKind::Index { .. }
        | NodeKind::Call { .. }
        | NodeKind::Flat { .. } => variable::step(cx, node, input),
        NodeKind::Literal { .. } => stream::once(crate::binding::OperationResult::truthy(input)),
        NodeKind::And => {
            let children = graph.children(node).to_vec();
            product::product(cx, &children, input)
        }
        NodeKind::Or => {
            let children = graph.children(node);
            logic::or(cx, children[0], children[1], input)
        }
        NodeKind::Not => logic::not(cx, graph.children(node)[0], input),
        NodeKind::Compare { op } => compare::step(cx, node, *op, input),
        NodeKind::HasType { ty } => predicate::has_type(cx, node, *ty, input),
        NodeKind::Predicate { .. } => predicate::predicate(cx, node, input),
        NodeKind::Function { .. } => predicate::function(cx, node, input),
        NodeKind::Inference { .. } => predicate::inference(cx, node, input),
        NodeKind::ForAll { quantified } => logic::for_all(cx, node, *quantified, input),
        NodeKind::Exists { quantified } => logic::exists(cx, node, *quantified, input),
        NodeKind::Aggregate { var, .. } => {
            // Aggregates are folded by the query pipeline; by the time
            // a condition references one its value is already bound.
            if input.contains(*var) {
                stream::once(crate::binding::OperationResult::truthy(input))
            } else {
                stream::fail(EqlError::invalid(
                    "aggregation evaluated outside an aggregation context",
                ))
            }
        }
    }
}

/// Read the value a selectable node stands for under `binding`.
/// Literals carry their value; everything else was bound by its own
/// step before this is called.
pub(crate) fn resolve_value(
    graph: &ExprGraph,
    node: NodeId,
    binding: &Binding,
) -> Result<Value, EqlError> {
    if let NodeKind::Literal { value } = graph.kind(node) {
        return Ok(value.clone());
    }
    let var = graph
        .value_var(node)
        .ok_or_else(|| EqlError::invalid(format!("node {node} does not produce a value")))?;
    binding
        .get(var)
        .cloned()
        .ok_or_else(|| EqlError::invalid(format!("selectable {node} is not bound")))
}
