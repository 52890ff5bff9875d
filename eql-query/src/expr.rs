//! The user-facing symbolic expression layer.
//!
//! Queries are described with cheap, immutable [`Expr`] handles built
//! through explicit constructors: attribute/index/call navigation,
//! comparisons, boolean composition, type tests and lifted user
//! callables. Nothing here evaluates; `build()` lowers the handles
//! into the frozen expression DAG (see `lower`), which is where
//! identity caching and validation happen.
//!
//! The explicit builder API replaces the operator-overload capture of
//! dynamic hosts: `r.attr("battery").gt(50)` describes the same DAG
//! that `r.battery > 50` would.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use eql_symbols::{SymbolRegistry, TypeInfo, Value};

use crate::binding::VariableId;

/// A user predicate: pure, truth-valued, resolved arguments in
/// declaration order.
pub type PredicateFn = dyn Fn(&[Value]) -> Result<bool, String> + Send + Sync;

/// A user symbolic function: pure, value-producing.
pub type FunctionFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A key transform applied to values before an aggregation fold.
pub type KeyFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// A deferred constructor for inferred instances; receives the
/// evaluated keyword arguments.
pub type ConstructorFn = dyn Fn(&BTreeMap<String, Value>) -> Result<Value, String> + Send + Sync;

/// Where a variable draws its candidate values from.
#[derive(Clone)]
pub enum Domain {
    /// An explicit iterable supplied at creation.
    Explicit(Vec<Value>),
    /// The registry slice for the variable's type, snapshotted at
    /// first pull of an evaluation.
    Registry(SymbolRegistry),
    /// The set of instances inferred by rule conclusions so far.
    Deduced,
}

impl From<Vec<Value>> for Domain {
    fn from(values: Vec<Value>) -> Self {
        Domain::Explicit(values)
    }
}

impl From<&SymbolRegistry> for Domain {
    fn from(registry: &SymbolRegistry) -> Self {
        Domain::Registry(registry.clone())
    }
}

impl From<SymbolRegistry> for Domain {
    fn from(registry: SymbolRegistry) -> Self {
        Domain::Registry(registry)
    }
}

/// Comparison operators understood by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Membership: left value equals some element of the right
    /// collection.
    In,
    /// Containment: some element of the left collection equals the
    /// right value.
    Contains,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::Contains => "contains",
        };
        write!(f, "{symbol}")
    }
}

/// Aggregation operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AggregateOp {
    Count,
    Sum,
    Average,
    Min,
    Max,
    /// Most frequent value; ties resolve to the earliest contributor.
    Mode,
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateOp::Count => "count",
            AggregateOp::Sum => "sum",
            AggregateOp::Average => "average",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Mode => "mode",
        };
        write!(f, "{name}")
    }
}

/// A handle to a symbolic expression. Cloning is cheap and clones
/// share identity: the same handle used in two clauses lowers to the
/// same DAG node.
#[derive(Clone)]
pub struct Expr {
    pub(crate) node: Arc<ExprNode>,
}

impl Expr {
    pub(crate) fn new(node: ExprNode) -> Self {
        Expr {
            node: Arc::new(node),
        }
    }

    /// Attribute navigation: `self.name` on the bound host object.
    pub fn attr(&self, name: impl Into<String>) -> Expr {
        Expr::new(ExprNode::Attr {
            source: self.clone(),
            name: name.into(),
        })
    }

    /// Index navigation: `self[key]`.
    pub fn idx(&self, key: impl Into<Value>) -> Expr {
        Expr::new(ExprNode::Index {
            source: self.clone(),
            key: key.into(),
        })
    }

    /// Call navigation: invoke the bound value with symbolic
    /// arguments resolved from the current binding.
    pub fn call(&self, args: Vec<Expr>) -> Expr {
        Expr::new(ExprNode::Call {
            source: self.clone(),
            args,
        })
    }

    /// Flatten: one emission per element of the bound iterable. The
    /// only navigation that multiplies bindings.
    pub fn flat(&self) -> Expr {
        Expr::new(ExprNode::Flat {
            source: self.clone(),
        })
    }

    pub fn eq(&self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Eq, other)
    }

    pub fn ne(&self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Ne, other)
    }

    pub fn lt(&self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Lt, other)
    }

    pub fn le(&self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Le, other)
    }

    pub fn gt(&self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Gt, other)
    }

    pub fn ge(&self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Ge, other)
    }

    fn compare(&self, op: CompareOp, other: impl Into<Expr>) -> Expr {
        Expr::new(ExprNode::Compare {
            op,
            left: self.clone(),
            right: other.into(),
        })
    }

    /// The identity this expression binds, if it is a variable-like
    /// handle created by the user (plain variables, functions,
    /// aggregations, inferences). Navigation paths receive their
    /// identity during lowering.
    pub(crate) fn declared_id(&self) -> Option<VariableId> {
        match self.node.as_ref() {
            ExprNode::Variable(decl) => Some(decl.id),
            ExprNode::Function(decl) => Some(decl.id),
            ExprNode::Aggregate(decl) => Some(decl.id),
            ExprNode::Inference(decl) => Some(decl.id),
            _ => None,
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node.fmt(f)
    }
}

pub(crate) enum ExprNode {
    Variable(VariableDecl),
    Attr { source: Expr, name: String },
    Index { source: Expr, key: Value },
    Call { source: Expr, args: Vec<Expr> },
    Flat { source: Expr },
    Literal(Value),
    Compare { op: CompareOp, left: Expr, right: Expr },
    And { left: Expr, right: Expr },
    Or { left: Expr, right: Expr },
    Not { operand: Expr },
    HasType { value: Expr, ty: &'static TypeInfo },
    Predicate(PredicateDecl),
    Function(FunctionDecl),
    Aggregate(AggregateDecl),
    Inference(InferenceDecl),
    ForAll { variables: Vec<Expr>, condition: Expr },
    Exists { variables: Vec<Expr>, condition: Expr },
}

impl fmt::Debug for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprNode::Variable(decl) => write!(f, "{}:{}", decl.name, decl.ty.name),
            ExprNode::Attr { source, name } => write!(f, "{source:?}.{name}"),
            ExprNode::Index { source, key } => write!(f, "{source:?}[{key}]"),
            ExprNode::Call { source, args } => write!(f, "{source:?}({args:?})"),
            ExprNode::Flat { source } => write!(f, "flat({source:?})"),
            ExprNode::Literal(value) => write!(f, "{value}"),
            ExprNode::Compare { op, left, right } => write!(f, "({left:?} {op} {right:?})"),
            ExprNode::And { left, right } => write!(f, "({left:?} and {right:?})"),
            ExprNode::Or { left, right } => write!(f, "({left:?} or {right:?})"),
            ExprNode::Not { operand } => write!(f, "not({operand:?})"),
            ExprNode::HasType { value, ty } => write!(f, "has_type({value:?}, {})", ty.name),
            ExprNode::Predicate(decl) => write!(f, "{}(..)", decl.name),
            ExprNode::Function(decl) => write!(f, "{}(..)", decl.name),
            ExprNode::Aggregate(decl) => write!(f, "{}({:?})", decl.op, decl.source),
            ExprNode::Inference(decl) => write!(f, "infer {}(..)", decl.ty.name),
            ExprNode::ForAll { condition, .. } => write!(f, "for_all(.., {condition:?})"),
            ExprNode::Exists { condition, .. } => write!(f, "exists(.., {condition:?})"),
        }
    }
}

pub(crate) struct VariableDecl {
    pub id: VariableId,
    pub name: String,
    pub ty: &'static TypeInfo,
    pub domain: Domain,
}

pub(crate) struct PredicateDecl {
    pub name: String,
    pub args: Vec<Expr>,
    pub callable: Arc<PredicateFn>,
    /// Absorbing predicates turn their own failures into false
    /// emissions instead of surfacing them.
    pub absorbing: bool,
}

pub(crate) struct FunctionDecl {
    pub id: VariableId,
    pub name: String,
    pub args: Vec<Expr>,
    pub callable: Arc<FunctionFn>,
}

#[derive(Clone)]
pub(crate) struct AggregateDecl {
    pub id: VariableId,
    pub op: AggregateOp,
    pub source: Expr,
    pub key: Option<Arc<KeyFn>>,
    pub default: Option<Value>,
    pub distinct: bool,
}

pub(crate) struct InferenceDecl {
    pub id: VariableId,
    pub ty: &'static TypeInfo,
    pub ctor: Arc<ConstructorFn>,
    pub kwargs: Vec<(String, Expr)>,
}

/// Declare a typed variable over a domain. The domain is filtered by
/// an implicit type check: candidates that are not instances of `ty`
/// are suppressed.
pub fn variable(ty: &'static TypeInfo, domain: impl Into<Domain>) -> Expr {
    named_variable(ty.name, ty, domain)
}

/// Like [`variable`] with an explicit display name.
pub fn named_variable(
    name: impl Into<String>,
    ty: &'static TypeInfo,
    domain: impl Into<Domain>,
) -> Expr {
    Expr::new(ExprNode::Variable(VariableDecl {
        id: VariableId::fresh(),
        name: name.into(),
        ty,
        domain: domain.into(),
    }))
}

/// A variable whose domain is the set of instances inferred by rule
/// conclusions accumulated so far in the current evaluation.
pub fn deduced_variable(ty: &'static TypeInfo) -> Expr {
    Expr::new(ExprNode::Variable(VariableDecl {
        id: VariableId::fresh(),
        name: ty.name.to_string(),
        ty,
        domain: Domain::Deduced,
    }))
}

/// Lift a concrete value into the expression layer.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::new(ExprNode::Literal(value.into()))
}

/// Logical conjunction of one or more conditions, chained pairwise.
pub fn and_(conditions: impl IntoIterator<Item = Expr>) -> Expr {
    chain(conditions, |left, right| ExprNode::And { left, right })
}

/// Logical disjunction of one or more conditions, chained pairwise.
pub fn or_(conditions: impl IntoIterator<Item = Expr>) -> Expr {
    chain(conditions, |left, right| ExprNode::Or { left, right })
}

fn chain(
    conditions: impl IntoIterator<Item = Expr>,
    combine: impl Fn(Expr, Expr) -> ExprNode,
) -> Expr {
    let mut iter = conditions.into_iter();
    let first = iter
        .next()
        .expect("logical chain requires at least one condition");
    iter.fold(first, |acc, next| Expr::new(combine(acc, next)))
}

/// Logical negation.
pub fn not_(operand: impl Into<Expr>) -> Expr {
    Expr::new(ExprNode::Not {
        operand: operand.into(),
    })
}

/// Membership: the value of `item` equals some element of
/// `container`.
pub fn in_(item: impl Into<Expr>, container: impl Into<Expr>) -> Expr {
    Expr::new(ExprNode::Compare {
        op: CompareOp::In,
        left: item.into(),
        right: container.into(),
    })
}

/// Containment: dual of [`in_`].
pub fn contains(container: impl Into<Expr>, item: impl Into<Expr>) -> Expr {
    Expr::new(ExprNode::Compare {
        op: CompareOp::Contains,
        left: container.into(),
        right: item.into(),
    })
}

/// Type test: true iff the bound value is an instance of `ty`.
pub fn has_type(value: impl Into<Expr>, ty: &'static TypeInfo) -> Expr {
    Expr::new(ExprNode::HasType {
        value: value.into(),
        ty,
    })
}

/// Builtin symbolic function returning the size of a collection.
pub fn length(collection: impl Into<Expr>) -> Expr {
    symbolic_function("length", vec![collection.into()], |args| {
        args[0].len().map(|n| Value::Integer(n as i64)).map_err(|e| e.to_string())
    })
}

/// Lift a pure boolean callable into the DAG as a predicate node.
pub fn predicate(
    name: impl Into<String>,
    args: Vec<Expr>,
    callable: impl Fn(&[Value]) -> Result<bool, String> + Send + Sync + 'static,
) -> Expr {
    Expr::new(ExprNode::Predicate(PredicateDecl {
        name: name.into(),
        args,
        callable: Arc::new(callable),
        absorbing: false,
    }))
}

/// Like [`predicate`], but failures of the callable become false
/// emissions instead of surfacing.
pub fn absorbing_predicate(
    name: impl Into<String>,
    args: Vec<Expr>,
    callable: impl Fn(&[Value]) -> Result<bool, String> + Send + Sync + 'static,
) -> Expr {
    Expr::new(ExprNode::Predicate(PredicateDecl {
        name: name.into(),
        args,
        callable: Arc::new(callable),
        absorbing: true,
    }))
}

/// Lift a pure value-producing callable into the DAG.
pub fn symbolic_function(
    name: impl Into<String>,
    args: Vec<Expr>,
    callable: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
) -> Expr {
    Expr::new(ExprNode::Function(FunctionDecl {
        id: VariableId::fresh(),
        name: name.into(),
        args,
        callable: Arc::new(callable),
    }))
}

/// Universal condition: true for a binding iff `condition` holds for
/// every assignment of the quantified variables.
pub fn for_all(variables: Vec<Expr>, condition: impl Into<Expr>) -> Expr {
    Expr::new(ExprNode::ForAll {
        variables,
        condition: condition.into(),
    })
}

/// Existential condition: true for a binding iff `condition` holds for
/// at least one assignment of the quantified variables. With no
/// variables this tests whether the condition itself has a true
/// emission.
pub fn exists(variables: Vec<Expr>, condition: impl Into<Expr>) -> Expr {
    Expr::new(ExprNode::Exists {
        variables,
        condition: condition.into(),
    })
}

/// Fluent configuration for an aggregation before it is used as an
/// expression.
#[derive(Clone)]
pub struct Aggregation {
    decl: AggregateDecl,
}

impl Aggregation {
    fn new(op: AggregateOp, source: &Expr) -> Self {
        Aggregation {
            decl: AggregateDecl {
                id: VariableId::fresh(),
                op,
                source: source.clone(),
                key: None,
                default: None,
                distinct: false,
            },
        }
    }

    /// Transform each contributed value before folding (and compare by
    /// the transform for min/max).
    pub fn key(mut self, key: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static) -> Self {
        self.decl.key = Some(Arc::new(key));
        self
    }

    /// Value to produce when the group is empty.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.decl.default = Some(value.into());
        self
    }

    /// Deduplicate contributed values by host equality before folding.
    pub fn distinct(mut self) -> Self {
        self.decl.distinct = true;
        self
    }
}

impl From<Aggregation> for Expr {
    fn from(aggregation: Aggregation) -> Self {
        Expr::new(ExprNode::Aggregate(aggregation.decl))
    }
}

pub fn count(source: &Expr) -> Aggregation {
    Aggregation::new(AggregateOp::Count, source)
}

pub fn sum(source: &Expr) -> Aggregation {
    Aggregation::new(AggregateOp::Sum, source)
}

pub fn average(source: &Expr) -> Aggregation {
    Aggregation::new(AggregateOp::Average, source)
}

pub fn min_(source: &Expr) -> Aggregation {
    Aggregation::new(AggregateOp::Min, source)
}

pub fn max_(source: &Expr) -> Aggregation {
    Aggregation::new(AggregateOp::Max, source)
}

pub fn mode(source: &Expr) -> Aggregation {
    Aggregation::new(AggregateOp::Mode, source)
}

/// Deferred constructor for inferred instances: evaluated kwargs are
/// handed to `ctor` once per firing binding.
pub struct Inference {
    decl: InferenceDecl,
}

impl Inference {
    /// Add a keyword argument resolved from the current binding at
    /// construction time.
    pub fn kw(mut self, name: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.decl.kwargs.push((name.into(), value.into()));
        self
    }
}

impl From<Inference> for Expr {
    fn from(inference: Inference) -> Self {
        Expr::new(ExprNode::Inference(inference.decl))
    }
}

/// Begin an inference constructor for `ty`.
pub fn inference(
    ty: &'static TypeInfo,
    ctor: impl Fn(&BTreeMap<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
) -> Inference {
    Inference {
        decl: InferenceDecl {
            id: VariableId::fresh(),
            ty,
            ctor: Arc::new(ctor),
            kwargs: Vec::new(),
        },
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Self {
        expr.clone()
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        lit(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        lit(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        lit(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        lit(value)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        lit(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        lit(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ROBOT: TypeInfo = TypeInfo::new("robot", None);

    #[test]
    fn clones_share_declared_identity() {
        let r = variable(&ROBOT, Vec::new());
        let again = r.clone();
        assert_eq!(r.declared_id(), again.declared_id());

        let other = variable(&ROBOT, Vec::new());
        assert_ne!(r.declared_id(), other.declared_id());
    }

    #[test]
    fn aggregations_keep_identity_across_uses() {
        let r = variable(&ROBOT, Vec::new());
        let total: Expr = sum(&r.attr("battery")).into();
        let reused = total.clone();
        assert_eq!(total.declared_id(), reused.declared_id());
    }

    #[test]
    fn logical_chains_fold_pairwise() {
        let r = variable(&ROBOT, Vec::new());
        let chained = and_([
            r.attr("battery").gt(10),
            r.attr("battery").lt(90),
            r.attr("name").ne("C3PO"),
        ]);
        match chained.node.as_ref() {
            ExprNode::And { left, .. } => match left.node.as_ref() {
                ExprNode::And { .. } => {}
                other => panic!("expected nested and, got {other:?}"),
            },
            other => panic!("expected and, got {other:?}"),
        }
    }

    #[test]
    fn comparisons_accept_plain_values() {
        let r = variable(&ROBOT, Vec::new());
        let cond = r.attr("battery").gt(50);
        match cond.node.as_ref() {
            ExprNode::Compare { op, right, .. } => {
                assert_eq!(*op, CompareOp::Gt);
                match right.node.as_ref() {
                    ExprNode::Literal(Value::Integer(50)) => {}
                    other => panic!("expected literal 50, got {other:?}"),
                }
            }
            other => panic!("expected compare, got {other:?}"),
        }
    }
}
