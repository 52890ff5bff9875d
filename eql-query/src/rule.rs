//! The rule tree: scoped conclusions with refinement, alternative and
//! next-rule edges.
//!
//! A query used as a rule admits `add` conclusions and nested scopes.
//! Scopes are built explicitly with closure-scoped builders instead of
//! context managers; the resulting tree is identical. Evaluation is
//! outer-to-inner, earlier-sibling-first, decided per outer-binding
//! emission: a refinement or alternative that fires for a binding
//! suppresses the parent scope's own conclusions for that binding,
//! and `next_rule` scopes always run afterwards.

use futures_util::future::BoxFuture;

use eql_symbols::{TypeInfo, Value};

use crate::binding::{Binding, VariableId};
use crate::error::EqlError;
use crate::eval::{evaluate, resolve_value, Ctx};
use crate::expr::{Domain, Expr, ExprNode};
use crate::graph::NodeId;
use crate::lower::Lowerer;
use crate::stream::StreamExt;

/// How a child scope hangs off its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeEdge {
    /// Conclusions apply when the child's condition holds in addition
    /// to the parent's; firing replaces the parent's conclusions.
    Refinement,
    /// Else-if: tried only when no earlier sibling fired.
    Alternative,
    /// Always evaluated after the previous rule, regardless of firing.
    Next,
}

/// Builder-side scope: a condition, its conclusions, and child scopes.
#[derive(Default)]
pub struct RuleScope {
    pub(crate) condition: Option<Expr>,
    pub(crate) conclusions: Vec<ConclusionDef>,
    pub(crate) children: Vec<(ScopeEdge, RuleScope)>,
}

impl RuleScope {
    pub(crate) fn is_empty(&self) -> bool {
        self.conclusions.is_empty() && self.children.is_empty()
    }
}

pub(crate) struct ConclusionDef {
    pub target: Expr,
    pub value: Expr,
}

/// Fluent access to a scope under construction.
pub struct ScopeBuilder<'a> {
    scope: &'a mut RuleScope,
}

impl<'a> ScopeBuilder<'a> {
    pub(crate) fn new(scope: &'a mut RuleScope) -> Self {
        ScopeBuilder { scope }
    }

    /// Conclude: for every binding firing this scope, evaluate `value`
    /// and append it to the target's deduced set.
    pub fn add(&mut self, target: &Expr, value: impl Into<Expr>) -> &mut Self {
        self.scope.conclusions.push(ConclusionDef {
            target: target.clone(),
            value: value.into(),
        });
        self
    }

    /// Open a refinement scope under this one.
    pub fn refinement(
        &mut self,
        condition: impl Into<Expr>,
        build: impl FnOnce(&mut ScopeBuilder<'_>),
    ) -> &mut Self {
        self.child(ScopeEdge::Refinement, Some(condition.into()), build)
    }

    /// Open an alternative (else-if) scope under this one.
    pub fn alternative(
        &mut self,
        condition: impl Into<Expr>,
        build: impl FnOnce(&mut ScopeBuilder<'_>),
    ) -> &mut Self {
        self.child(ScopeEdge::Alternative, Some(condition.into()), build)
    }

    /// Open a sibling scope that always runs after this rule.
    pub fn next_rule(&mut self, build: impl FnOnce(&mut ScopeBuilder<'_>)) -> &mut Self {
        self.child(ScopeEdge::Next, None, build)
    }

    fn child(
        &mut self,
        edge: ScopeEdge,
        condition: Option<Expr>,
        build: impl FnOnce(&mut ScopeBuilder<'_>),
    ) -> &mut Self {
        let mut scope = RuleScope {
            condition,
            ..RuleScope::default()
        };
        build(&mut ScopeBuilder::new(&mut scope));
        self.scope.children.push((edge, scope));
        self
    }
}

/// The lowered scope tree stored in a built query.
pub(crate) struct LoweredScope {
    pub condition: Option<NodeId>,
    pub conclusions: Vec<LoweredConclusion>,
    pub children: Vec<(ScopeEdge, LoweredScope)>,
}

pub(crate) struct LoweredConclusion {
    pub target_ty: &'static TypeInfo,
    #[allow(dead_code)]
    pub target_var: VariableId,
    pub value: NodeId,
}

pub(crate) fn lower_scope(lowerer: &mut Lowerer, scope: &RuleScope) -> Result<LoweredScope, EqlError> {
    let condition = scope
        .condition
        .as_ref()
        .map(|cond| lowerer.lower(cond))
        .transpose()?;
    let conclusions = scope
        .conclusions
        .iter()
        .map(|conclusion| {
            let (target_ty, target_var) = match conclusion.target.node.as_ref() {
                ExprNode::Variable(decl) if matches!(decl.domain, Domain::Deduced) => {
                    (decl.ty, decl.id)
                }
                _ => {
                    return Err(EqlError::invalid(
                        "conclusion target must be a deduced variable",
                    ))
                }
            };
            Ok(LoweredConclusion {
                target_ty,
                target_var,
                value: lowerer.lower(&conclusion.value)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let children = scope
        .children
        .iter()
        .map(|(edge, child)| Ok((*edge, lower_scope(lowerer, child)?)))
        .collect::<Result<Vec<_>, EqlError>>()?;
    Ok(LoweredScope {
        condition,
        conclusions,
        children,
    })
}

pub(crate) struct ScopeOutcome {
    pub fired: bool,
    pub conclusions: Vec<Value>,
}

/// Evaluate a scope for one outer binding. Returns whether it fired
/// and the conclusion values it produced, in firing order.
pub(crate) fn fire<'a>(
    cx: &'a Ctx,
    scope: &'a LoweredScope,
    input: Binding,
) -> BoxFuture<'a, Result<ScopeOutcome, EqlError>> {
    Box::pin(async move {
        let fired_bindings = match scope.condition {
            None => vec![input],
            Some(condition) => {
                let mut bindings = Vec::new();
                let mut emissions = evaluate(cx, condition, input);
                while let Some(item) = emissions.next().await {
                    let emission = item?;
                    if emission.truth {
                        bindings.push(emission.binding);
                    }
                }
                bindings
            }
        };
        if fired_bindings.is_empty() {
            return Ok(ScopeOutcome {
                fired: false,
                conclusions: Vec::new(),
            });
        }

        let mut conclusions = Vec::new();
        for binding in fired_bindings {
            let mut child_fired = false;
            let mut next_scopes = Vec::new();
            for (edge, child) in &scope.children {
                match edge {
                    ScopeEdge::Refinement => {
                        let outcome = fire(cx, child, binding.clone()).await?;
                        if outcome.fired {
                            child_fired = true;
                            conclusions.extend(outcome.conclusions);
                        }
                    }
                    ScopeEdge::Alternative => {
                        if !child_fired {
                            let outcome = fire(cx, child, binding.clone()).await?;
                            if outcome.fired {
                                child_fired = true;
                                conclusions.extend(outcome.conclusions);
                            }
                        }
                    }
                    ScopeEdge::Next => next_scopes.push(child),
                }
            }
            if !child_fired {
                for conclusion in &scope.conclusions {
                    conclusions.push(conclude(cx, conclusion, binding.clone()).await?);
                }
            }
            for child in next_scopes {
                let outcome = fire(cx, child, binding.clone()).await?;
                conclusions.extend(outcome.conclusions);
            }
        }
        Ok(ScopeOutcome {
            fired: true,
            conclusions,
        })
    })
}

/// Materialise one conclusion under a firing binding and record it in
/// the deduced store so later rules can range over it.
async fn conclude(
    cx: &Ctx,
    conclusion: &LoweredConclusion,
    binding: Binding,
) -> Result<Value, EqlError> {
    let mut emissions = evaluate(cx, conclusion.value, binding);
    while let Some(item) = emissions.next().await {
        let emission = item?;
        if !emission.truth {
            continue;
        }
        let value = resolve_value(&cx.graph, conclusion.value, &emission.binding)?;
        cx.record_deduced(conclusion.target_ty, value.clone());
        return Ok(value);
    }
    Err(EqlError::NoSolutionFound {
        expected: 1,
        found: 0,
    })
}
