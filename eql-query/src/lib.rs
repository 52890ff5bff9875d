//! EQL Query Engine
//!
//! An in-memory entity-query engine that evaluates declarative queries
//! over arbitrary host-object graphs. Queries are described with a
//! symbolic expression layer (typed variables over domains, attribute
//! and index navigation, comparisons, boolean composition, grouping,
//! aggregation, sorting, quantification, structural matching and
//! conditional rule-tree inference) and produce a lazy stream of
//! result bindings.
//!
//! The engine is organised around three subsystems:
//!
//!  - a symbolic expression DAG with a two-phase lifecycle: clause
//!    slots are mutable while building, frozen after `build()`;
//!  - a streaming evaluator whose currency is `(binding, truth)`
//!    emissions flowed through a generalised cartesian-product
//!    combinator with short-circuit semantics and deterministic
//!    child reordering;
//!  - a rule tree layered on top, where refinement / alternative /
//!    next-rule scopes compose into a decision procedure that
//!    materialises new symbolic values.
//!
//! Host objects are reached through the reflection bridge defined in
//! the `eql-symbols` crate.

pub mod binding;
pub mod error;
pub mod expr;
pub mod pattern;
pub mod quantify;
pub mod query;
pub mod rule;
pub mod stream;

mod aggregate;
mod eval;
mod graph;
mod group;
mod lower;
mod shape;

pub use binding::{Binding, OperationResult, VariableId};
pub use error::{EqlError, ExprPath};
pub use expr::{
    absorbing_predicate, and_, average, contains, count, deduced_variable, exists, for_all,
    has_type, in_, inference, length, lit, max_, min_, mode, named_variable, not_, or_, predicate,
    sum, symbolic_function, variable, Aggregation, CompareOp, Domain, Expr, Inference,
};
pub use pattern::{match_type, MatchField, MatchPattern};
pub use quantify::{an, at_least, at_most, exactly, the, Quantified, QuantifierKind};
pub use query::{entity, set_of, Query};
pub use rule::{RuleScope, ScopeBuilder, ScopeEdge};

/// Re-export of the host-object layer for convenience.
pub use eql_symbols as symbols;

/// Commonly used names in one import.
pub mod prelude {
    pub use crate::binding::{Binding, OperationResult, VariableId};
    pub use crate::error::EqlError;
    pub use crate::expr::{
        and_, average, contains, count, deduced_variable, exists, for_all, has_type, in_,
        inference, length, lit, max_, min_, mode, not_, or_, predicate, sum, symbolic_function,
        variable, Domain, Expr,
    };
    pub use crate::pattern::match_type;
    pub use crate::quantify::{an, at_least, at_most, exactly, the};
    pub use crate::query::{entity, set_of, Query};
    pub use crate::stream::{StreamExt, TryStreamExt};
    pub use eql_symbols::{SymbolRegistry, Symbol, TypeInfo, Value};
}
