//! Error types for the query engine.
//!
//! Build-time defects surface immediately from `build()`; evaluation
//! errors flow through the emission streams as `Err` items and carry
//! the expression path from the root to the failure site. Normal
//! stream exhaustion is not an error: a drained domain simply ends the
//! stream.

use thiserror::Error;

use eql_symbols::AccessError;

use crate::graph::NodeId;

/// Errors raised while building or evaluating a query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EqlError {
    /// A clause was added or the DAG mutated after `build()`.
    #[error("query structure is frozen; clauses cannot change after build()")]
    QueryStructureFrozen,

    /// The query shape is invalid: aggregator in `where`, a cycle on
    /// attach, a dangling selectable, or similar.
    #[error("invalid query structure: {reason}")]
    QueryStructureInvalid { reason: String },

    /// An attribute/index/call/flatten failed while navigating a host
    /// object during evaluation.
    #[error("symbolic resolution failed at {path}: {access}")]
    SymbolicResolution { access: AccessError, path: ExprPath },

    /// A quantifier expected more results than the stream produced.
    #[error("no solution found: expected {expected}, found {found}")]
    NoSolutionFound { expected: usize, found: usize },

    /// A quantifier observed more results than it allows.
    #[error("more than one solution found where at most {expected} expected")]
    MoreThanOneSolutionFound { expected: usize },

    /// An embedded user predicate or symbolic function failed.
    #[error("user callable {name:?} failed at {path}: {message}")]
    UserCallable {
        name: String,
        message: String,
        path: ExprPath,
    },
}

impl EqlError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        EqlError::QueryStructureInvalid {
            reason: reason.into(),
        }
    }

    pub(crate) fn resolution(access: AccessError) -> Self {
        EqlError::SymbolicResolution {
            access,
            path: ExprPath::default(),
        }
    }

    pub(crate) fn user(name: impl Into<String>, message: impl Into<String>) -> Self {
        EqlError::UserCallable {
            name: name.into(),
            message: message.into(),
            path: ExprPath::default(),
        }
    }

    /// Record that the error passed through `node` on its way to the
    /// root. Only evaluation errors carry a path.
    pub(crate) fn trace(mut self, node: NodeId) -> Self {
        match &mut self {
            EqlError::SymbolicResolution { path, .. } | EqlError::UserCallable { path, .. } => {
                path.push(node)
            }
            _ => {}
        }
        self
    }

    /// Whether an enclosing NOT or a disjunction arm may turn this
    /// error into a false emission instead of surfacing it.
    pub(crate) fn is_absorbable(&self) -> bool {
        matches!(
            self,
            EqlError::SymbolicResolution { .. } | EqlError::UserCallable { .. }
        )
    }
}

/// The chain of node identities from the root to a failure site,
/// recorded leaf-first as the error bubbles up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExprPath(Vec<NodeId>);

impl ExprPath {
    pub(crate) fn push(&mut self, node: NodeId) {
        self.0.push(node);
    }

    /// Node identities ordered root → failure site.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().rev().copied()
    }
}

impl std::fmt::Display for ExprPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        let mut first = true;
        for node in self.nodes() {
            if !first {
                write!(f, " -> ")?;
            }
            write!(f, "{node}")?;
            first = false;
        }
        Ok(())
    }
}
