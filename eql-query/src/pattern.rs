//! Structural match: a builder for `HasType ∧ attribute-equality`
//! conjunctions.
//!
//! `match_type(ty).field("k", v)` describes the shape of a wanted
//! object; applied to a target expression it expands to a type test
//! plus one equality per field. A nested pattern recurses on the
//! attribute path, constraining the attribute value in place.

use eql_symbols::TypeInfo;

use crate::expr::{and_, has_type, named_variable, variable, Domain, Expr};

/// A field constraint: either a plain value/expression or a nested
/// pattern.
pub enum MatchField {
    Value(Expr),
    Nested(MatchPattern),
}

/// A structural pattern under construction.
pub struct MatchPattern {
    ty: &'static TypeInfo,
    fields: Vec<(String, MatchField)>,
}

/// Begin a pattern for instances of `ty`.
pub fn match_type(ty: &'static TypeInfo) -> MatchPattern {
    MatchPattern {
        ty,
        fields: Vec::new(),
    }
}

impl MatchPattern {
    /// Constrain attribute `name` to equal `value`.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.fields
            .push((name.into(), MatchField::Value(value.into())));
        self
    }

    /// Constrain attribute `name` to match a nested pattern, which
    /// recurses on the attribute path.
    pub fn nested(mut self, name: impl Into<String>, pattern: MatchPattern) -> Self {
        self.fields
            .push((name.into(), MatchField::Nested(pattern)));
        self
    }

    /// Expand the pattern into a conjunction over an existing target
    /// expression.
    pub fn against(&self, target: &Expr) -> Expr {
        let mut conditions = vec![has_type(target, self.ty)];
        for (name, field) in &self.fields {
            let attribute = target.attr(name.clone());
            match field {
                MatchField::Value(value) => conditions.push(attribute.eq(value)),
                MatchField::Nested(pattern) => conditions.push(pattern.against(&attribute)),
            }
        }
        and_(conditions)
    }

    /// Bind the pattern's target to a fresh named variable over
    /// `domain`, returning the variable and the match condition.
    pub fn variable(&self, domain: impl Into<Domain>) -> (Expr, Expr) {
        let target = variable(self.ty, domain);
        let condition = self.against(&target);
        (target, condition)
    }

    /// Like [`MatchPattern::variable`] with an explicit name.
    pub fn named_variable(
        &self,
        name: impl Into<String>,
        domain: impl Into<Domain>,
    ) -> (Expr, Expr) {
        let target = named_variable(name, self.ty, domain);
        let condition = self.against(&target);
        (target, condition)
    }
}
