//! Lowering from the user-facing [`Expr`] layer into the arena DAG.
//!
//! Lowering is where expression identity is decided. Two caches
//! cooperate:
//!
//!  - a handle cache, so the same `Expr` clone lowers to the same node
//!    wherever it is referenced within one build;
//!  - a path cache for navigation, so independently-built handles that
//!    describe the same symbolic path (same source node, same
//!    operation, same key) still resolve to the same mapped-variable
//!    node and therefore the same binding slot. This is what makes
//!    cross-constraint unification work.

use std::collections::HashMap;
use std::sync::Arc;

use eql_symbols::GroupKey;

use crate::binding::VariableId;
use crate::error::EqlError;
use crate::expr::{Expr, ExprNode};
use crate::graph::{ExprGraph, NodeId, NodeKind};

#[derive(Hash, PartialEq, Eq)]
enum PathOp {
    Attr(String),
    Index(GroupKey),
    Call(Vec<NodeId>),
    Flat,
}

pub(crate) struct Lowerer {
    graph: ExprGraph,
    by_handle: HashMap<usize, NodeId>,
    by_path: HashMap<(NodeId, PathOp), NodeId>,
    declared: HashMap<VariableId, NodeId>,
}

impl Lowerer {
    pub fn new() -> Self {
        Lowerer {
            graph: ExprGraph::new(),
            by_handle: HashMap::new(),
            by_path: HashMap::new(),
            declared: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &ExprGraph {
        &self.graph
    }

    pub fn finish(self) -> ExprGraph {
        self.graph
    }

    pub fn lower(&mut self, expr: &Expr) -> Result<NodeId, EqlError> {
        let handle = Arc::as_ptr(&expr.node) as usize;
        if let Some(&node) = self.by_handle.get(&handle) {
            return Ok(node);
        }
        if let Some(id) = expr.declared_id() {
            if let Some(&node) = self.declared.get(&id) {
                self.by_handle.insert(handle, node);
                return Ok(node);
            }
        }

        let node = self.lower_uncached(expr)?;
        self.by_handle.insert(handle, node);
        if let Some(id) = expr.declared_id() {
            self.declared.insert(id, node);
        }
        Ok(node)
    }

    fn lower_uncached(&mut self, expr: &Expr) -> Result<NodeId, EqlError> {
        match expr.node.as_ref() {
            ExprNode::Variable(decl) => self.graph.add(NodeKind::Variable {
                var: decl.id,
                name: decl.name.clone(),
                ty: decl.ty,
                domain: decl.domain.clone(),
            }),
            ExprNode::Attr { source, name } => {
                let source = self.lower(source)?;
                self.mapped(source, PathOp::Attr(name.clone()), |var| NodeKind::Attribute {
                    var,
                    name: name.clone(),
                })
            }
            ExprNode::Index { source, key } => {
                let source = self.lower(source)?;
                self.mapped(source, PathOp::Index(GroupKey::from(key)), |var| {
                    NodeKind::Index {
                        var,
                        key: key.clone(),
                    }
                })
            }
            ExprNode::Flat { source } => {
                let source = self.lower(source)?;
                self.mapped(source, PathOp::Flat, |var| NodeKind::Flat { var })
            }
            ExprNode::Call { source, args } => {
                let source = self.lower(source)?;
                let arg_nodes = args
                    .iter()
                    .map(|arg| self.lower(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let key = (source, PathOp::Call(arg_nodes.clone()));
                if let Some(&node) = self.by_path.get(&key) {
                    return Ok(node);
                }
                let node = self.graph.add(NodeKind::Call {
                    var: VariableId::fresh(),
                })?;
                self.graph.attach(node, source)?;
                for arg in arg_nodes {
                    self.graph.attach(node, arg)?;
                }
                self.by_path.insert(key, node);
                Ok(node)
            }
            ExprNode::Literal(value) => self.graph.add(NodeKind::Literal {
                value: value.clone(),
            }),
            ExprNode::Compare { op, left, right } => {
                self.binary(NodeKind::Compare { op: *op }, left, right)
            }
            ExprNode::And { left, right } => self.binary(NodeKind::And, left, right),
            ExprNode::Or { left, right } => self.binary(NodeKind::Or, left, right),
            ExprNode::Not { operand } => {
                let child = self.lower(operand)?;
                let node = self.graph.add(NodeKind::Not)?;
                self.graph.attach(node, child)?;
                Ok(node)
            }
            ExprNode::HasType { value, ty } => {
                let child = self.lower(value)?;
                let node = self.graph.add(NodeKind::HasType { ty })?;
                self.graph.attach(node, child)?;
                Ok(node)
            }
            ExprNode::Predicate(decl) => {
                let args = decl
                    .args
                    .iter()
                    .map(|arg| self.lower(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let node = self.graph.add(NodeKind::Predicate {
                    name: decl.name.clone(),
                    callable: decl.callable.clone(),
                    absorbing: decl.absorbing,
                })?;
                for arg in args {
                    self.graph.attach(node, arg)?;
                }
                Ok(node)
            }
            ExprNode::Function(decl) => {
                let args = decl
                    .args
                    .iter()
                    .map(|arg| self.lower(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let node = self.graph.add(NodeKind::Function {
                    var: decl.id,
                    name: decl.name.clone(),
                    callable: decl.callable.clone(),
                })?;
                for arg in args {
                    self.graph.attach(node, arg)?;
                }
                Ok(node)
            }
            ExprNode::Aggregate(decl) => {
                let source = self.lower(&decl.source)?;
                if !self.graph.aggregates_under(source).is_empty() {
                    return Err(EqlError::invalid(format!(
                        "aggregation {} cannot be nested inside another aggregation",
                        decl.op
                    )));
                }
                if !self.graph.is_selectable(source) {
                    return Err(EqlError::invalid(format!(
                        "aggregation {} requires a value-producing child",
                        decl.op
                    )));
                }
                let node = self.graph.add(NodeKind::Aggregate {
                    var: decl.id,
                    op: decl.op,
                    key: decl.key.clone(),
                    default: decl.default.clone(),
                    distinct: decl.distinct,
                })?;
                self.graph.attach(node, source)?;
                Ok(node)
            }
            ExprNode::Inference(decl) => {
                let kwarg_nodes = decl
                    .kwargs
                    .iter()
                    .map(|(_, value)| self.lower(value))
                    .collect::<Result<Vec<_>, _>>()?;
                let node = self.graph.add(NodeKind::Inference {
                    var: decl.id,
                    ty: decl.ty,
                    ctor: decl.ctor.clone(),
                    kwargs: decl.kwargs.iter().map(|(name, _)| name.clone()).collect(),
                })?;
                for kwarg in kwarg_nodes {
                    self.graph.attach(node, kwarg)?;
                }
                Ok(node)
            }
            ExprNode::ForAll {
                variables,
                condition,
            } => self.quantified(variables, condition, |quantified| NodeKind::ForAll {
                quantified,
            }),
            ExprNode::Exists {
                variables,
                condition,
            } => self.quantified(variables, condition, |quantified| NodeKind::Exists {
                quantified,
            }),
        }
    }

    fn binary(&mut self, kind: NodeKind, left: &Expr, right: &Expr) -> Result<NodeId, EqlError> {
        let left = self.lower(left)?;
        let right = self.lower(right)?;
        let node = self.graph.add(kind)?;
        self.graph.attach(node, left)?;
        self.graph.attach(node, right)?;
        Ok(node)
    }

    fn mapped(
        &mut self,
        source: NodeId,
        op: PathOp,
        kind: impl FnOnce(VariableId) -> NodeKind,
    ) -> Result<NodeId, EqlError> {
        let key = (source, op);
        if let Some(&node) = self.by_path.get(&key) {
            return Ok(node);
        }
        let node = self.graph.add(kind(VariableId::fresh()))?;
        self.graph.attach(node, source)?;
        self.by_path.insert(key, node);
        Ok(node)
    }

    fn quantified(
        &mut self,
        variables: &[Expr],
        condition: &Expr,
        kind: impl FnOnce(usize) -> NodeKind,
    ) -> Result<NodeId, EqlError> {
        let variable_nodes = variables
            .iter()
            .map(|v| self.lower(v))
            .collect::<Result<Vec<_>, _>>()?;
        let cond = self.lower(condition)?;
        let node = self.graph.add(kind(variable_nodes.len()))?;
        for v in variable_nodes {
            self.graph.attach(node, v)?;
        }
        self.graph.attach(node, cond)?;
        Ok(node)
    }
}
