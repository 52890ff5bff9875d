//! The query façade.
//!
//! A [`Query`] collects clauses in mutable slots while building:
//! select, where-conjunction, grouping, having, ordering, limit,
//! distinct and the rule tree. `build()` lowers every slot into the
//! arena DAG, validates the result, freezes it and caches the built
//! form; any clause mutation afterwards fails with
//! `QueryStructureFrozen`. Evaluation produces a lazy stream of
//! projected rows (or, for rule queries, of conclusion values), a
//! fresh run per call.

use std::collections::HashSet;
use std::sync::Arc;

use async_stream::try_stream;
use tracing::debug;

use eql_symbols::Value;

use crate::aggregate::AggregateSpec;
use crate::binding::Binding;
use crate::error::EqlError;
use crate::eval::{logic, product::product, resolve_value, EvalContext};
use crate::expr::Expr;
use crate::graph::{ExprGraph, NodeId, NodeKind};
use crate::lower::Lowerer;
use crate::rule::{self, LoweredScope, RuleScope, ScopeBuilder};
use crate::shape::{self, OrderSpec, Row};
use crate::stream::{RowStream, StreamExt, TryStreamExt};

/// A query over a single selected expression.
pub fn entity(selected: impl Into<Expr>) -> Query {
    Query::new(vec![selected.into()])
}

/// A query over a tuple of selected expressions.
pub fn set_of(selected: impl IntoIterator<Item = Expr>) -> Query {
    Query::new(selected.into_iter().collect())
}

/// Declarative query with the two-phase lifecycle: clause slots are
/// mutable until `build()`, frozen afterwards.
pub struct Query {
    select: Vec<Expr>,
    where_: Vec<Expr>,
    grouped: Vec<Expr>,
    having: Vec<Expr>,
    ordered: Vec<(Expr, bool)>,
    limit: Option<usize>,
    distinct: bool,
    rules: RuleScope,
    built: Option<Arc<Built>>,
}

impl Query {
    fn new(select: Vec<Expr>) -> Self {
        Query {
            select,
            where_: Vec::new(),
            grouped: Vec::new(),
            having: Vec::new(),
            ordered: Vec::new(),
            limit: None,
            distinct: false,
            rules: RuleScope::default(),
            built: None,
        }
    }

    fn mutable(&self) -> Result<(), EqlError> {
        if self.built.is_some() {
            Err(EqlError::QueryStructureFrozen)
        } else {
            Ok(())
        }
    }

    /// Conjoin filter conditions.
    pub fn where_(mut self, conditions: impl IntoIterator<Item = Expr>) -> Result<Self, EqlError> {
        self.mutable()?;
        self.where_.extend(conditions);
        Ok(self)
    }

    /// Partition results by the given key expressions.
    pub fn grouped_by(mut self, keys: impl IntoIterator<Item = Expr>) -> Result<Self, EqlError> {
        self.mutable()?;
        self.grouped.extend(keys);
        Ok(self)
    }

    /// Filter whole groups after aggregation.
    pub fn having(mut self, conditions: impl IntoIterator<Item = Expr>) -> Result<Self, EqlError> {
        self.mutable()?;
        self.having.extend(conditions);
        Ok(self)
    }

    /// Sort results by an expression; multiple clauses sort
    /// lexicographically in attachment order.
    pub fn ordered_by(mut self, expr: impl Into<Expr>, descending: bool) -> Result<Self, EqlError> {
        self.mutable()?;
        self.ordered.push((expr.into(), descending));
        Ok(self)
    }

    /// Emit at most `n` results and close the stream.
    pub fn limit(mut self, n: usize) -> Result<Self, EqlError> {
        self.mutable()?;
        self.limit = Some(n);
        Ok(self)
    }

    /// Deduplicate by the tuple of selected values.
    pub fn distinct(mut self) -> Result<Self, EqlError> {
        self.mutable()?;
        self.distinct = true;
        Ok(self)
    }

    /// Add a top-level conclusion: for every binding satisfying the
    /// query, evaluate `value` and append it to the deduced target.
    pub fn add(mut self, target: &Expr, value: impl Into<Expr>) -> Result<Self, EqlError> {
        self.mutable()?;
        ScopeBuilder::new(&mut self.rules).add(target, value);
        Ok(self)
    }

    /// Open a refinement scope: its conclusions replace the default
    /// ones whenever `condition` additionally holds.
    pub fn refinement(
        mut self,
        condition: impl Into<Expr>,
        build: impl FnOnce(&mut ScopeBuilder<'_>),
    ) -> Result<Self, EqlError> {
        self.mutable()?;
        ScopeBuilder::new(&mut self.rules).refinement(condition, build);
        Ok(self)
    }

    /// Open an alternative (else-if) scope.
    pub fn alternative(
        mut self,
        condition: impl Into<Expr>,
        build: impl FnOnce(&mut ScopeBuilder<'_>),
    ) -> Result<Self, EqlError> {
        self.mutable()?;
        ScopeBuilder::new(&mut self.rules).alternative(condition, build);
        Ok(self)
    }

    /// Open a sibling rule evaluated unconditionally after this one.
    pub fn next_rule(
        mut self,
        build: impl FnOnce(&mut ScopeBuilder<'_>),
    ) -> Result<Self, EqlError> {
        self.mutable()?;
        ScopeBuilder::new(&mut self.rules).next_rule(build);
        Ok(self)
    }

    /// Lower all clause slots into the expression DAG, validate it and
    /// freeze. Idempotent; no partial DAG survives a failed build.
    pub fn build(&mut self) -> Result<(), EqlError> {
        if self.built.is_some() {
            return Ok(());
        }
        if self.select.is_empty() {
            return Err(EqlError::invalid("query selects nothing"));
        }

        let mut lowerer = Lowerer::new();
        let mut root_children: Vec<NodeId> = Vec::new();
        let mut seen_children: HashSet<NodeId> = HashSet::new();
        let mut attach = |node: NodeId, children: &mut Vec<NodeId>| {
            if seen_children.insert(node) {
                children.push(node);
            }
        };

        let mut aggregates: Vec<AggregateSpec> = Vec::new();
        let mut seen_aggregates: HashSet<NodeId> = HashSet::new();

        for condition in &self.where_ {
            let node = lowerer.lower(condition)?;
            if !lowerer.graph().aggregates_under(node).is_empty() {
                return Err(EqlError::invalid("aggregation is not allowed in where"));
            }
            attach(node, &mut root_children);
        }

        let mut select_nodes = Vec::new();
        for expr in &self.select {
            let node = lowerer.lower(expr)?;
            if !lowerer.graph().is_selectable(node) {
                return Err(EqlError::invalid(format!(
                    "selected expression {node} does not produce a value"
                )));
            }
            for aggregate in lowerer.graph().aggregates_under(node) {
                if seen_aggregates.insert(aggregate) {
                    let spec = AggregateSpec::from_node(lowerer.graph(), aggregate);
                    attach(spec.source, &mut root_children);
                    aggregates.push(spec);
                }
            }
            if !matches!(lowerer.graph().kind(node), NodeKind::Aggregate { .. }) {
                // Aggregate folds happen in the pipeline; only their
                // sources participate in the product.
                attach(node, &mut root_children);
            }
            select_nodes.push(node);
        }

        let mut group_nodes = Vec::new();
        for key in &self.grouped {
            let node = lowerer.lower(key)?;
            if !lowerer.graph().aggregates_under(node).is_empty() {
                return Err(EqlError::invalid("aggregation is not allowed in grouped_by"));
            }
            attach(node, &mut root_children);
            group_nodes.push(node);
        }

        let mut having_nodes = Vec::new();
        for condition in &self.having {
            let node = lowerer.lower(condition)?;
            for aggregate in lowerer.graph().aggregates_under(node) {
                if seen_aggregates.insert(aggregate) {
                    let spec = AggregateSpec::from_node(lowerer.graph(), aggregate);
                    attach(spec.source, &mut root_children);
                    aggregates.push(spec);
                }
            }
            having_nodes.push(node);
        }

        let mut order_specs = Vec::new();
        for (expr, descending) in &self.ordered {
            let node = lowerer.lower(expr)?;
            for aggregate in lowerer.graph().aggregates_under(node) {
                if seen_aggregates.insert(aggregate) {
                    let spec = AggregateSpec::from_node(lowerer.graph(), aggregate);
                    attach(spec.source, &mut root_children);
                    aggregates.push(spec);
                }
            }
            if !matches!(lowerer.graph().kind(node), NodeKind::Aggregate { .. }) {
                attach(node, &mut root_children);
            }
            order_specs.push(OrderSpec {
                node,
                descending: *descending,
            });
        }

        let scope = if self.rules.is_empty() {
            None
        } else {
            Some(rule::lower_scope(&mut lowerer, &self.rules)?)
        };

        let mut graph = lowerer.finish();
        graph.freeze();
        validate_having_scope(&graph, &group_nodes, &having_nodes, &aggregates)?;
        debug!(
            nodes = graph.len(),
            children = root_children.len(),
            aggregates = aggregates.len(),
            "query built and frozen"
        );

        self.built = Some(Arc::new(Built {
            graph: Arc::new(graph),
            root_children,
            select_nodes,
            group_nodes,
            having_nodes,
            order_specs,
            aggregates,
            scope,
            limit: self.limit,
            distinct: self.distinct,
        }));
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Start a fresh evaluation run, building first if needed.
    pub fn evaluate(&mut self) -> Result<RowStream, EqlError> {
        self.build()?;
        self.rows()
    }

    /// Materialise the full result list.
    pub async fn tolist(&mut self) -> Result<Vec<Value>, EqlError> {
        self.evaluate()?.try_collect().await
    }

    /// The first result; an empty stream is an observable failure.
    pub async fn first(&mut self) -> Result<Value, EqlError> {
        match self.evaluate()?.try_next().await? {
            Some(value) => Ok(value),
            None => Err(EqlError::NoSolutionFound {
                expected: 1,
                found: 0,
            }),
        }
    }

    /// Whether any result exists, pulling at most one element.
    pub async fn exists(&mut self) -> Result<bool, EqlError> {
        Ok(self.evaluate()?.try_next().await?.is_some())
    }

    pub(crate) fn rows(&self) -> Result<RowStream, EqlError> {
        let built = self
            .built
            .clone()
            .ok_or_else(|| EqlError::invalid("query evaluated before build()"))?;
        Ok(built.rows())
    }
}

/// When grouping is present, `having` may reference only the group
/// keys and aggregations (whose own sources are folded away).
fn validate_having_scope(
    graph: &ExprGraph,
    group_nodes: &[NodeId],
    having_nodes: &[NodeId],
    aggregates: &[AggregateSpec],
) -> Result<(), EqlError> {
    if group_nodes.is_empty() || having_nodes.is_empty() {
        return Ok(());
    }
    let mut allowed: HashSet<crate::binding::VariableId> = HashSet::new();
    for key in group_nodes {
        allowed.extend(graph.provides(*key).iter().copied());
    }
    for spec in aggregates {
        allowed.insert(spec.var);
        allowed.extend(graph.provides(spec.node).iter().copied());
    }
    for having in having_nodes {
        if let Some(stray) = graph
            .provides(*having)
            .iter()
            .find(|var| !allowed.contains(var))
        {
            return Err(EqlError::invalid(format!(
                "having may only reference group keys and aggregations; {stray} is neither"
            )));
        }
    }
    Ok(())
}

struct Built {
    graph: Arc<ExprGraph>,
    root_children: Vec<NodeId>,
    select_nodes: Vec<NodeId>,
    group_nodes: Vec<NodeId>,
    having_nodes: Vec<NodeId>,
    order_specs: Vec<OrderSpec>,
    aggregates: Vec<AggregateSpec>,
    scope: Option<LoweredScope>,
    limit: Option<usize>,
    distinct: bool,
}

impl Built {
    fn project(&self, binding: &Binding) -> Result<Value, EqlError> {
        let mut values = self
            .select_nodes
            .iter()
            .map(|node| resolve_value(&self.graph, *node, binding))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(if values.len() == 1 {
            values.pop().expect("non-empty select")
        } else {
            Value::List(values)
        })
    }

    fn rows(self: Arc<Self>) -> RowStream {
        let built = self;
        Box::pin(try_stream! {
            let cx = EvalContext::new(built.graph.clone());
            let limit = built.limit.unwrap_or(usize::MAX);
            if limit == 0 {
                return;
            }
            let mut upstream = product(&cx, &built.root_children, Binding::new());

            if let Some(scope) = &built.scope {
                // Rule mode: emissions drive the rule tree; the
                // results are the concluded values in firing order.
                let mut yielded = 0usize;
                'outer: while let Some(item) = upstream.next().await {
                    let emission = item?;
                    if !emission.truth {
                        continue;
                    }
                    let outcome = rule::fire(&cx, scope, emission.binding).await?;
                    for value in outcome.conclusions {
                        yield value;
                        yielded += 1;
                        if yielded >= limit {
                            break 'outer;
                        }
                    }
                }
            } else if built.aggregates.is_empty() && built.group_nodes.is_empty() {
                if built.order_specs.is_empty() && !built.distinct {
                    // Fully lazy path: project as emissions arrive.
                    let mut yielded = 0usize;
                    while let Some(item) = upstream.next().await {
                        let emission = item?;
                        if !emission.truth {
                            continue;
                        }
                        yield built.project(&emission.binding)?;
                        yielded += 1;
                        if yielded >= limit {
                            break;
                        }
                    }
                } else {
                    // Sorting and distinct require buffering.
                    let mut rows: Vec<Row> = Vec::new();
                    while let Some(item) = upstream.next().await {
                        let emission = item?;
                        if !emission.truth {
                            continue;
                        }
                        rows.push(Row {
                            value: built.project(&emission.binding)?,
                            binding: emission.binding,
                        });
                    }
                    if built.distinct {
                        rows = shape::distinct(rows);
                    }
                    shape::sort(&built.graph, &mut rows, &built.order_specs)?;
                    for row in rows.into_iter().take(limit) {
                        yield row.value;
                    }
                }
            } else {
                // Aggregation mode: materialise the upstream, fold per
                // group, filter groups, then shape.
                let mut contributors: Vec<Binding> = Vec::new();
                while let Some(item) = upstream.next().await {
                    let emission = item?;
                    if emission.truth {
                        contributors.push(emission.binding);
                    }
                }
                let groups = crate::group::partition(&built.graph, &built.group_nodes, contributors)?;
                let mut rows: Vec<Row> = Vec::new();
                'groups: for (_, members) in groups {
                    let mut binding = members.first().cloned().unwrap_or_default();
                    for spec in &built.aggregates {
                        let values = spec.contributions(&built.graph, &members)?;
                        binding.insert(spec.var, spec.fold(&values)?);
                    }
                    for having in &built.having_nodes {
                        if !logic::holds(&cx, *having, binding.clone()).await? {
                            continue 'groups;
                        }
                    }
                    rows.push(Row {
                        value: built.project(&binding)?,
                        binding,
                    });
                }
                if built.distinct {
                    rows = shape::distinct(rows);
                }
                shape::sort(&built.graph, &mut rows, &built.order_specs)?;
                for row in rows.into_iter().take(limit) {
                    yield row.value;
                }
            }
        })
    }
}
