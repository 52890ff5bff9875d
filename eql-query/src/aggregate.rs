//! Aggregation folds.
//!
//! Aggregators are unary over a value-producing source. They are
//! folded per group by the query pipeline: the source's value is read
//! from each contributor binding, optionally deduplicated and
//! key-transformed, then reduced. min/max return the contributing
//! element that achieves the extremum, not the (possibly
//! key-transformed) extremum itself.

use std::sync::Arc;

use indexmap::IndexMap;

use eql_symbols::{GroupKey, Value};

use crate::binding::{Binding, VariableId};
use crate::error::EqlError;
use crate::eval::resolve_value;
use crate::expr::{AggregateOp, KeyFn};
use crate::graph::{ExprGraph, NodeId, NodeKind};

/// A lowered aggregator, extracted from the DAG for the pipeline.
#[derive(Clone)]
pub(crate) struct AggregateSpec {
    pub node: NodeId,
    pub var: VariableId,
    pub source: NodeId,
    pub op: AggregateOp,
    pub key: Option<Arc<KeyFn>>,
    pub default: Option<Value>,
    pub distinct: bool,
}

impl AggregateSpec {
    pub fn from_node(graph: &ExprGraph, node: NodeId) -> Self {
        match graph.kind(node) {
            NodeKind::Aggregate {
                var,
                op,
                key,
                default,
                distinct,
            } => AggregateSpec {
                node,
                var: *var,
                source: graph.children(node)[0],
                op: *op,
                key: key.clone(),
                default: default.clone(),
                distinct: *distinct,
            },
            _ => unreachable!("aggregate spec on a non-aggregate node"),
        }
    }

    /// The source values contributed by a group, in contributor order.
    pub fn contributions(
        &self,
        graph: &ExprGraph,
        contributors: &[Binding],
    ) -> Result<Vec<Value>, EqlError> {
        contributors
            .iter()
            .map(|binding| resolve_value(graph, self.source, binding))
            .collect()
    }

    /// Fold the contributed values into the aggregated result.
    pub fn fold(&self, values: &[Value]) -> Result<Value, EqlError> {
        let values = if self.distinct {
            dedup(values)
        } else {
            values.to_vec()
        };
        if values.is_empty() {
            return Ok(match self.op {
                AggregateOp::Count => self.default.clone().unwrap_or(Value::Integer(0)),
                _ => self.default.clone().unwrap_or(Value::Null),
            });
        }
        match self.op {
            AggregateOp::Count => Ok(Value::Integer(values.len() as i64)),
            AggregateOp::Sum => self.numeric_sum(&values),
            AggregateOp::Average => {
                let total = match self.numeric_sum(&values)? {
                    Value::Integer(n) => n as f64,
                    Value::Float(x) => x,
                    _ => unreachable!("sum folds to a number"),
                };
                Ok(Value::Float(total / values.len() as f64))
            }
            AggregateOp::Min => self.extremum(&values, std::cmp::Ordering::Less),
            AggregateOp::Max => self.extremum(&values, std::cmp::Ordering::Greater),
            AggregateOp::Mode => self.mode(&values),
        }
    }

    fn keyed(&self, value: &Value) -> Result<Value, EqlError> {
        match &self.key {
            Some(key) => key(value).map_err(|message| EqlError::user(self.op.to_string(), message)),
            None => Ok(value.clone()),
        }
    }

    fn numeric_sum(&self, values: &[Value]) -> Result<Value, EqlError> {
        let mut integral = 0i64;
        let mut fractional = 0f64;
        let mut all_integers = true;
        for value in values {
            let keyed = self.keyed(value)?;
            match keyed {
                Value::Integer(n) => integral += n,
                Value::Float(x) => {
                    all_integers = false;
                    fractional += x;
                }
                other => {
                    return Err(EqlError::user(
                        self.op.to_string(),
                        format!("non-numeric value {other} in fold"),
                    ))
                }
            }
        }
        if all_integers {
            Ok(Value::Integer(integral))
        } else {
            Ok(Value::Float(integral as f64 + fractional))
        }
    }

    fn extremum(&self, values: &[Value], wanted: std::cmp::Ordering) -> Result<Value, EqlError> {
        let mut best = values[0].clone();
        let mut best_key = self.keyed(&best)?;
        for value in &values[1..] {
            let key = self.keyed(value)?;
            let ordering = key.compare(&best_key).ok_or_else(|| {
                EqlError::user(
                    self.op.to_string(),
                    format!("cannot order {key} against {best_key}"),
                )
            })?;
            if ordering == wanted {
                best = value.clone();
                best_key = key;
            }
        }
        Ok(best)
    }

    fn mode(&self, values: &[Value]) -> Result<Value, EqlError> {
        let mut counts: IndexMap<GroupKey, (Value, usize)> = IndexMap::new();
        for value in values {
            let key = GroupKey::from(&self.keyed(value)?);
            counts
                .entry(key)
                .and_modify(|(_, count)| *count += 1)
                .or_insert_with(|| (value.clone(), 1));
        }
        // Ties resolve to the earliest contributor, so a plain max
        // scan (which keeps the last) will not do.
        let mut best: Option<(&Value, usize)> = None;
        for (value, count) in counts.values() {
            if best.map_or(true, |(_, seen)| *count > seen) {
                best = Some((value, *count));
            }
        }
        let (value, _) = best.expect("non-empty fold");
        Ok(value.clone())
    }
}

fn dedup(values: &[Value]) -> Vec<Value> {
    let mut seen: IndexMap<GroupKey, Value> = IndexMap::new();
    for value in values {
        seen.entry(GroupKey::from(value)).or_insert_with(|| value.clone());
    }
    seen.into_values().collect()
}
