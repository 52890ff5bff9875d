//! The lowered expression DAG.
//!
//! Nodes live in a single arena keyed by opaque [`NodeId`]; child and
//! parent links are arena indices, which breaks the shared-ownership
//! cycle between parents and children and makes freezing the whole
//! DAG a single flag flip. [`ExprGraph::attach`] is the only mutation
//! path while building; once frozen, any further structural change is
//! rejected.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use eql_symbols::{TypeInfo, Value};

use crate::binding::VariableId;
use crate::error::EqlError;
use crate::expr::{AggregateOp, CompareOp, ConstructorFn, Domain, FunctionFn, KeyFn, PredicateFn};

/// Stable identity of a DAG node within its graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: u32) -> Self {
        NodeId(index)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The per-node payload after lowering.
pub(crate) enum NodeKind {
    /// Leaf: enumerates a domain, binding `var` to each candidate that
    /// passes the implicit type check.
    Variable {
        var: VariableId,
        name: String,
        ty: &'static TypeInfo,
        domain: Domain,
    },
    /// `var := child.name`
    Attribute { var: VariableId, name: String },
    /// `var := child[key]`
    Index { var: VariableId, key: Value },
    /// `var := child(args...)`; children are `[source, args...]`.
    Call { var: VariableId },
    /// `var := each element of child`; multiplies bindings.
    Flat { var: VariableId },
    Literal { value: Value },
    And,
    Or,
    Not,
    Compare { op: CompareOp },
    HasType { ty: &'static TypeInfo },
    Predicate {
        name: String,
        callable: Arc<PredicateFn>,
        absorbing: bool,
    },
    Function {
        var: VariableId,
        name: String,
        callable: Arc<FunctionFn>,
    },
    Aggregate {
        var: VariableId,
        op: AggregateOp,
        key: Option<Arc<KeyFn>>,
        default: Option<Value>,
        distinct: bool,
    },
    /// Deferred construction of an inferred instance; children are the
    /// kwarg value expressions, names held here in order.
    Inference {
        var: VariableId,
        ty: &'static TypeInfo,
        ctor: Arc<ConstructorFn>,
        kwargs: Vec<String>,
    },
    /// Children are `[v1..vq, condition]`.
    ForAll { quantified: usize },
    Exists { quantified: usize },
}

pub(crate) struct Node {
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    pub parents: Vec<NodeId>,
}

/// Arena of lowered nodes with the two-phase lifecycle: mutable while
/// building, immutable after `freeze()`.
pub(crate) struct ExprGraph {
    nodes: Vec<Node>,
    /// Per node: the variable identities its subtree can introduce
    /// into a binding. Computed at freeze time.
    provides: Vec<BTreeSet<VariableId>>,
    /// Per node: every variable identity the subtree touches, whether
    /// or not it escapes (negation and quantified conditions consume
    /// outer variables without providing them). Computed at freeze
    /// time; drives binding-aware child reordering.
    mentions: Vec<BTreeSet<VariableId>>,
    frozen: bool,
}

impl ExprGraph {
    pub fn new() -> Self {
        ExprGraph {
            nodes: Vec::new(),
            provides: Vec::new(),
            mentions: Vec::new(),
            frozen: false,
        }
    }

    pub fn add(&mut self, kind: NodeKind) -> Result<NodeId, EqlError> {
        if self.frozen {
            return Err(EqlError::QueryStructureFrozen);
        }
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            children: Vec::new(),
            parents: Vec::new(),
        });
        Ok(id)
    }

    /// Append `child` to `parent`'s child slots and record the back
    /// reference. Rejects attachments that would close a cycle.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<(), EqlError> {
        if self.frozen {
            return Err(EqlError::QueryStructureFrozen);
        }
        if parent == child || self.reaches(child, parent) {
            return Err(EqlError::invalid(format!(
                "attaching {child} under {parent} would create a cycle"
            )));
        }
        self.nodes[parent.index()].children.push(child);
        self.nodes[child.index()].parents.push(parent);
        Ok(())
    }

    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            stack.extend(self.nodes[node.index()].children.iter().copied());
        }
        false
    }

    /// Transition the whole DAG to the frozen state and finalise the
    /// per-node variable-scope analysis. Lowering creates children
    /// before parents, so a single pass in arena order suffices.
    pub fn freeze(&mut self) {
        self.provides = Vec::with_capacity(self.nodes.len());
        self.mentions = Vec::with_capacity(self.nodes.len());
        for index in 0..self.nodes.len() {
            let node = &self.nodes[index];
            let mut scope: BTreeSet<VariableId> = match &node.kind {
                NodeKind::Not | NodeKind::ForAll { .. } | NodeKind::Exists { .. } => {
                    // These emit the incoming binding unchanged; their
                    // inner variables never escape to the outer scope.
                    BTreeSet::new()
                }
                _ => node
                    .children
                    .iter()
                    .flat_map(|child| self.provides[child.index()].iter().copied())
                    .collect(),
            };
            let mut touched: BTreeSet<VariableId> = node
                .children
                .iter()
                .flat_map(|child| self.mentions[child.index()].iter().copied())
                .collect();
            if let Some(var) = value_var_of(&node.kind) {
                scope.insert(var);
                touched.insert(var);
            }
            self.provides.push(scope);
            self.mentions.push(touched);
        }
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    #[allow(dead_code)]
    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].parents
    }

    pub fn provides(&self, id: NodeId) -> &BTreeSet<VariableId> {
        &self.provides[id.index()]
    }

    pub fn mentions(&self, id: NodeId) -> &BTreeSet<VariableId> {
        &self.mentions[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// The binding slot a value-producing node writes, if any.
    pub fn value_var(&self, id: NodeId) -> Option<VariableId> {
        value_var_of(&self.nodes[id.index()].kind)
    }

    /// Whether the node's emissions carry a meaningful truth value (as
    /// opposed to unconditionally-true value production).
    pub fn is_truth_valued(&self, id: NodeId) -> bool {
        matches!(
            self.nodes[id.index()].kind,
            NodeKind::And
                | NodeKind::Or
                | NodeKind::Not
                | NodeKind::Compare { .. }
                | NodeKind::HasType { .. }
                | NodeKind::Predicate { .. }
                | NodeKind::ForAll { .. }
                | NodeKind::Exists { .. }
        )
    }

    /// Whether the node produces a value a query may select.
    pub fn is_selectable(&self, id: NodeId) -> bool {
        matches!(
            self.nodes[id.index()].kind,
            NodeKind::Variable { .. }
                | NodeKind::Attribute { .. }
                | NodeKind::Index { .. }
                | NodeKind::Call { .. }
                | NodeKind::Flat { .. }
                | NodeKind::Literal { .. }
                | NodeKind::Function { .. }
                | NodeKind::Aggregate { .. }
                | NodeKind::Inference { .. }
        )
    }

    /// Whether the node derives its value rather than navigating to it.
    #[allow(dead_code)]
    pub fn is_derived(&self, id: NodeId) -> bool {
        matches!(
            self.nodes[id.index()].kind,
            NodeKind::Function { .. } | NodeKind::Aggregate { .. } | NodeKind::Inference { .. }
        )
    }

    /// Ids of aggregate nodes anywhere under `root`, including `root`.
    pub fn aggregates_under(&self, root: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if matches!(self.nodes[node.index()].kind, NodeKind::Aggregate { .. }) {
                found.push(node);
            }
            stack.extend(self.nodes[node.index()].children.iter().copied());
        }
        found
    }
}

fn value_var_of(kind: &NodeKind) -> Option<VariableId> {
    match kind {
        NodeKind::Variable { var, .. }
        | NodeKind::Attribute { var, .. }
        | NodeKind::Index { var, .. }
        | NodeKind::Call { var }
        | NodeKind::Flat { var }
        | NodeKind::Function { var, .. }
        | NodeKind::Aggregate { var, .. }
        | NodeKind::Inference { var, .. } => Some(*var),
        _ => None,
    }
}
