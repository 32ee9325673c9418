//! Derivation rules, definition side
//!
//! A [`DerivationRule`] is a named, typed, N-ary operator. The same type
//! plays two roles: a registered *prototype* (the family, defining the
//! allowed operand shapes) and an *instance* (a concrete use attached to an
//! attribute, validated against its prototype).
//!
//! State machine per instance: defined, family-checked, completeness-checked,
//! compiled. The checks live here; compilation lives in [`crate::compile`].

use std::fmt;
use std::sync::Arc;

use tabula_types::{is_identifier, Symbol, ValueKind, VarKeyKind};

use crate::class::Class;
use crate::diag::DiagnosticSink;
use crate::domain::ClassDomain;
use crate::eval::RuleBody;
use crate::value::ConstantValue;

/// Result type of a rule: a kind plus its supplement, the relation class
/// name for relation kinds or the structure name for `Structure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleType {
    pub kind: ValueKind,
    pub object_class: Option<Symbol>,
    pub structure: Option<Symbol>,
}

impl RuleType {
    pub fn simple(kind: ValueKind) -> Self {
        Self {
            kind,
            object_class: None,
            structure: None,
        }
    }

    pub fn object(kind: ValueKind, class: impl Into<Symbol>) -> Self {
        Self {
            kind,
            object_class: Some(class.into()),
            structure: None,
        }
    }

    /// Family compatibility: the prototype side constrains only the
    /// supplements it pins.
    fn accepts(&self, other: &RuleType) -> bool {
        self.kind == other.kind
            && (self.object_class.is_none() || self.object_class == other.object_class)
            && (self.structure.is_none() || self.structure == other.structure)
    }
}

/// Fixed operand count, or a variable count where the last declared operand
/// is the repeated tail template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandArity {
    Fixed,
    Variable,
}

/// Where an operand's value comes from.
#[derive(Clone)]
pub enum OperandOrigin {
    /// Prototype slot; instances must replace it before completeness.
    Unspecified,
    Constant(ConstantValue),
    /// Named attribute or attribute block of the in-scope class.
    Attribute(Symbol),
    Rule(Box<DerivationRule>),
}

impl fmt::Debug for OperandOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandOrigin::Unspecified => write!(f, "Unspecified"),
            OperandOrigin::Constant(c) => write!(f, "Constant({c})"),
            OperandOrigin::Attribute(name) => write!(f, "Attribute({name})"),
            OperandOrigin::Rule(rule) => write!(f, "Rule({})", rule.name),
        }
    }
}

/// One argument slot of a rule.
///
/// `kind: None` is only legal as the tail template of a variable-arity
/// prototype: the instantiator supplies the type. `scope_level` counts how
/// many enclosing rule invocations outward the operand is read from, 0
/// being the current record.
#[derive(Debug, Clone)]
pub struct Operand {
    pub kind: Option<ValueKind>,
    pub object_class: Option<Symbol>,
    pub structure: Option<Symbol>,
    pub scope_level: u32,
    pub origin: OperandOrigin,
}

impl Operand {
    pub fn typed(kind: ValueKind) -> Self {
        Self {
            kind: Some(kind),
            object_class: None,
            structure: None,
            scope_level: 0,
            origin: OperandOrigin::Unspecified,
        }
    }

    /// Type-deferred tail template of a variable-arity prototype.
    pub fn deferred() -> Self {
        Self {
            kind: None,
            object_class: None,
            structure: None,
            scope_level: 0,
            origin: OperandOrigin::Unspecified,
        }
    }

    pub fn attribute(kind: ValueKind, name: impl Into<Symbol>) -> Self {
        let mut op = Self::typed(kind);
        op.origin = OperandOrigin::Attribute(name.into());
        op
    }

    pub fn constant(value: ConstantValue) -> Self {
        let mut op = Self::typed(value.kind());
        op.origin = OperandOrigin::Constant(value);
        op
    }

    pub fn rule(rule: DerivationRule) -> Self {
        let mut op = Self::typed(rule.result.kind);
        op.object_class = rule.result.object_class.clone();
        op.structure = rule.result.structure.clone();
        op.origin = OperandOrigin::Rule(Box::new(rule));
        op
    }

    pub fn at_scope(mut self, level: u32) -> Self {
        self.scope_level = level;
        self
    }

    /// Family-side check of one operand against a prototype template.
    fn check_family(
        &self,
        template: &Operand,
        entity: &str,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let mut ok = true;
        if let Some(expected) = template.kind {
            if self.kind != Some(expected) {
                sink.error(
                    entity,
                    format!(
                        "operand kind {} does not match prototype kind {}",
                        self.kind.map_or("unset", |k| k.name()),
                        expected.name()
                    ),
                );
                ok = false;
            }
            if template.object_class.is_some() && self.object_class != template.object_class {
                sink.error(entity, "operand relation class does not match prototype");
                ok = false;
            }
            if template.structure.is_some() && self.structure != template.structure {
                sink.error(entity, "operand structure name does not match prototype");
                ok = false;
            }
        }
        ok
    }
}

/// A named, typed operator over schema attributes.
#[derive(Clone)]
pub struct DerivationRule {
    pub name: Symbol,
    pub label: String,
    /// Prototype-side owner-class pin; `None` leaves the family usable from
    /// any class.
    pub class_name: Option<Symbol>,
    pub result: RuleType,
    pub arity: OperandArity,
    /// Operands past the first are evaluated against the related record
    /// named by operand 0, with a scope stack reaching back out.
    pub multiple_scope: bool,
    /// Required non-`None` when the result is a block kind.
    pub var_key_kind: VarKeyKind,
    pub operands: Vec<Operand>,
    pub body: Arc<dyn RuleBody>,
}

impl fmt::Debug for DerivationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivationRule")
            .field("name", &self.name)
            .field("result", &self.result)
            .field("arity", &self.arity)
            .field("multiple_scope", &self.multiple_scope)
            .field("operands", &self.operands)
            .finish_non_exhaustive()
    }
}

impl DerivationRule {
    pub fn new(name: impl Into<Symbol>, result: RuleType, body: Arc<dyn RuleBody>) -> Self {
        Self {
            name: name.into(),
            label: String::new(),
            class_name: None,
            result,
            arity: OperandArity::Fixed,
            multiple_scope: false,
            var_key_kind: VarKeyKind::None,
            operands: Vec::new(),
            body,
        }
    }

    pub fn with_operand(mut self, operand: Operand) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn variable(mut self) -> Self {
        self.arity = OperandArity::Variable;
        self
    }

    pub fn scoped(mut self) -> Self {
        self.multiple_scope = true;
        self
    }

    fn entity(&self) -> String {
        format!("rule {}", self.name)
    }

    fn operand_entity(&self, index: usize) -> String {
        format!("rule {} operand {}", self.name, index + 1)
    }

    /// Intrinsic shape check, independent of any prototype or class.
    pub fn check_definition(&self, sink: &mut DiagnosticSink) -> bool {
        let mut ok = true;
        if !is_identifier(self.name.as_str()) {
            sink.error(self.entity(), format!("invalid rule name '{}'", self.name));
            ok = false;
        }
        if self.result.kind == ValueKind::Structure && self.result.structure.is_none() {
            sink.error(self.entity(), "structure result without a structure name");
            ok = false;
        }
        for (i, operand) in self.operands.iter().enumerate() {
            let tail = self.arity == OperandArity::Variable && i + 1 == self.operands.len();
            if operand.kind.is_none() && !tail {
                sink.error(
                    self.operand_entity(i),
                    "operand type unset outside a variable-arity tail",
                );
                ok = false;
            }
            if let OperandOrigin::Constant(value) = &operand.origin {
                if operand.kind.is_some() && operand.kind != Some(value.kind()) {
                    sink.error(
                        self.operand_entity(i),
                        format!(
                            "constant kind {} does not match operand kind {}",
                            value.kind().name(),
                            operand.kind.map_or("unset", |k| k.name())
                        ),
                    );
                    ok = false;
                }
            }
        }
        if self.multiple_scope {
            let first_is_relation = self
                .operands
                .first()
                .and_then(|op| op.kind)
                .is_some_and(|k| k.is_relation());
            if !first_is_relation {
                sink.error(
                    self.entity(),
                    "multiple-scope rule requires a relation-typed first operand",
                );
                ok = false;
            }
        }
        ok
    }

    /// Checks this instance against a registered prototype of the same
    /// family. The last operand of a variable-arity prototype constrains
    /// every operand past the fixed prefix; a type-deferred tail accepts
    /// any kind.
    pub fn check_family(&self, prototype: &DerivationRule, sink: &mut DiagnosticSink) -> bool {
        let mut ok = true;
        if self.name != prototype.name {
            sink.error(
                self.entity(),
                format!("prototype name mismatch ({})", prototype.name),
            );
            ok = false;
        }
        if prototype.class_name.is_some() && self.class_name != prototype.class_name {
            sink.error(self.entity(), "prototype pins a different owner class");
            ok = false;
        }
        if !prototype.result.accepts(&self.result) {
            sink.error(
                self.entity(),
                format!(
                    "result type {} does not match prototype result {}",
                    self.result.kind.name(),
                    prototype.result.kind.name()
                ),
            );
            ok = false;
        }
        let proto_count = prototype.operands.len();
        match prototype.arity {
            OperandArity::Fixed => {
                if self.operands.len() != proto_count {
                    sink.error(
                        self.entity(),
                        format!(
                            "{} operands where the prototype takes {}",
                            self.operands.len(),
                            proto_count
                        ),
                    );
                    return false;
                }
            }
            OperandArity::Variable => {
                if self.operands.len() + 1 < proto_count {
                    sink.error(
                        self.entity(),
                        format!(
                            "{} operands where the prototype takes at least {}",
                            self.operands.len(),
                            proto_count - 1
                        ),
                    );
                    return false;
                }
            }
        }
        for (i, operand) in self.operands.iter().enumerate() {
            let template = if i < proto_count {
                &prototype.operands[i]
            } else {
                // past the fixed prefix, the tail template repeats
                &prototype.operands[proto_count - 1]
            };
            if !operand.check_family(template, &self.operand_entity(i), sink) {
                ok = false;
            }
        }
        ok
    }

    /// Resolves every operand against the owner class, or against the class
    /// the operand's scope level reaches, and checks the resolved target's
    /// kind and supplements. `scope` holds the enclosing main-scope class
    /// names, innermost last.
    pub fn check_completeness(
        &self,
        owner: &Class,
        domain: &ClassDomain,
        scope: &mut Vec<Symbol>,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let mut ok = true;
        if self.result.kind.is_block() && self.var_key_kind == VarKeyKind::None {
            sink.error(self.entity(), "block result requires a var-key kind");
            ok = false;
        }
        let secondary = if self.multiple_scope {
            match self.secondary_class(owner, domain, sink) {
                Some(class) => Some(class),
                None => return false,
            }
        } else {
            None
        };
        for (i, operand) in self.operands.iter().enumerate() {
            let in_secondary = secondary.is_some() && i > 0;
            if in_secondary {
                scope.push(owner.name.clone());
            }
            let base = if in_secondary {
                secondary.unwrap_or(owner)
            } else {
                owner
            };
            if !self.check_operand_completeness(i, operand, base, domain, scope, sink) {
                ok = false;
            }
            if in_secondary {
                scope.pop();
            }
        }
        ok
    }

    fn check_operand_completeness(
        &self,
        index: usize,
        operand: &Operand,
        base: &Class,
        domain: &ClassDomain,
        scope: &mut Vec<Symbol>,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let entity = self.operand_entity(index);
        // a positive scope level re-roots the operand that many frames out
        let target = if operand.scope_level == 0 {
            base
        } else {
            let hops = operand.scope_level as usize;
            if hops > scope.len() {
                sink.error(
                    &entity,
                    format!(
                        "scope level {} exceeds scope depth {}",
                        operand.scope_level,
                        scope.len()
                    ),
                );
                return false;
            }
            let name = &scope[scope.len() - hops];
            match domain.get(name) {
                Some(class) => class,
                None => {
                    sink.error(&entity, format!("unknown scope class {name}"));
                    return false;
                }
            }
        };
        match &operand.origin {
            OperandOrigin::Unspecified => {
                sink.error(&entity, "operand origin unset");
                false
            }
            OperandOrigin::Constant(value) => {
                if operand.kind != Some(value.kind()) {
                    sink.error(&entity, "constant kind does not match operand kind");
                    false
                } else {
                    true
                }
            }
            OperandOrigin::Attribute(name) => {
                self.check_attribute_operand(operand, name, target, &entity, sink)
            }
            OperandOrigin::Rule(rule) => {
                let mut ok = true;
                if operand.kind != Some(rule.result.kind) {
                    sink.error(&entity, "nested rule result does not match operand kind");
                    ok = false;
                }
                if !rule.check_completeness(target, domain, scope, sink) {
                    ok = false;
                }
                ok
            }
        }
    }

    fn check_attribute_operand(
        &self,
        operand: &Operand,
        name: &Symbol,
        target: &Class,
        entity: &str,
        sink: &mut DiagnosticSink,
    ) -> bool {
        if let Some(attr) = target.attribute(name) {
            let mut ok = true;
            if operand.kind != Some(attr.kind()) {
                sink.error(
                    entity,
                    format!(
                        "attribute {} of class {} is {}, operand expects {}",
                        name,
                        target.name,
                        attr.kind().name(),
                        operand.kind.map_or("unset", |k| k.name())
                    ),
                );
                ok = false;
            }
            if operand.object_class.is_some()
                && attr.kind().is_relation()
                && operand.object_class != attr.target_class
            {
                sink.error(
                    entity,
                    format!("attribute {name} targets a different relation class"),
                );
                ok = false;
            }
            ok
        } else if let Some(block) = target.block(name) {
            let block_kind = target
                .block_member_kind(name)
                .and_then(|k| k.block_kind());
            if operand.kind != block_kind {
                sink.error(
                    entity,
                    format!("block {} of class {} does not match operand kind", name, target.name),
                );
                false
            } else if block.var_key_kind == VarKeyKind::None {
                sink.error(entity, format!("block {name} has no var-key kind"));
                false
            } else {
                true
            }
        } else {
            sink.error(
                entity,
                format!("class {} has no attribute or block {name}", target.name),
            );
            false
        }
    }

    /// Class the inner operands of a multiple-scope rule resolve against:
    /// the relation class named by operand 0.
    pub(crate) fn secondary_class<'a>(
        &self,
        owner: &Class,
        domain: &'a ClassDomain,
        sink: &mut DiagnosticSink,
    ) -> Option<&'a Class> {
        let first = match self.operands.first() {
            Some(op) => op,
            None => {
                sink.error(self.entity(), "multiple-scope rule without operands");
                return None;
            }
        };
        let class_name = match &first.origin {
            OperandOrigin::Attribute(attr_name) => owner
                .attribute(attr_name)
                .and_then(|a| a.target_class.clone())
                .or_else(|| first.object_class.clone()),
            OperandOrigin::Rule(rule) => rule.result.object_class.clone(),
            _ => first.object_class.clone(),
        };
        let class_name = match class_name {
            Some(name) => name,
            None => {
                sink.error(
                    self.operand_entity(0),
                    "secondary scope operand names no relation class",
                );
                return None;
            }
        };
        match domain.get(&class_name) {
            Some(class) => Some(class),
            None => {
                sink.error(
                    self.operand_entity(0),
                    format!("unknown secondary scope class {class_name}"),
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::NoBody;
    use tabula_types::Continuous;

    fn sum_prototype() -> DerivationRule {
        DerivationRule::new("Sum", RuleType::simple(ValueKind::Continuous), Arc::new(NoBody))
            .with_operand(Operand::typed(ValueKind::Continuous))
            .with_operand(Operand::typed(ValueKind::Continuous))
            .variable()
    }

    fn sum_instance(count: usize) -> DerivationRule {
        let mut rule =
            DerivationRule::new("Sum", RuleType::simple(ValueKind::Continuous), Arc::new(NoBody));
        rule.arity = OperandArity::Variable;
        for _ in 0..count {
            rule = rule.with_operand(Operand::constant(ConstantValue::Continuous(
                Continuous::new(1.0),
            )));
        }
        rule
    }

    #[test]
    fn test_definition_rejects_bad_name() {
        let mut rule = sum_prototype();
        rule.name = Symbol::new("2bad");
        let mut sink = DiagnosticSink::new();
        assert!(!rule.check_definition(&mut sink));
    }

    #[test]
    fn test_definition_allows_deferred_tail_only_when_variable() {
        let proto = DerivationRule::new(
            "CopyAny",
            RuleType::simple(ValueKind::Continuous),
            Arc::new(NoBody),
        )
        .with_operand(Operand::deferred());

        let mut sink = DiagnosticSink::new();
        assert!(!proto.check_definition(&mut sink));

        let proto = proto.variable();
        let mut sink = DiagnosticSink::new();
        assert!(proto.check_definition(&mut sink));
    }

    #[test]
    fn test_definition_rejects_constant_kind_mismatch() {
        let mut rule = DerivationRule::new(
            "Bad",
            RuleType::simple(ValueKind::Continuous),
            Arc::new(NoBody),
        );
        let mut op = Operand::typed(ValueKind::Continuous);
        op.origin = OperandOrigin::Constant(ConstantValue::Symbol(Symbol::new("x")));
        rule = rule.with_operand(op);
        let mut sink = DiagnosticSink::new();
        assert!(!rule.check_definition(&mut sink));
    }

    #[test]
    fn test_definition_multiple_scope_needs_relation_first() {
        let rule = DerivationRule::new(
            "TableSum",
            RuleType::simple(ValueKind::Continuous),
            Arc::new(NoBody),
        )
        .scoped()
        .with_operand(Operand::typed(ValueKind::Continuous))
        .with_operand(Operand::typed(ValueKind::Continuous));
        let mut sink = DiagnosticSink::new();
        assert!(!rule.check_definition(&mut sink));
    }

    #[test]
    fn test_family_variable_arity_counts() {
        let proto = sum_prototype();
        // proto declares 2 operands; variable arity accepts >= 1
        for count in [1usize, 2, 7] {
            let mut sink = DiagnosticSink::new();
            assert!(
                sum_instance(count).check_family(&proto, &mut sink),
                "count {count} should pass"
            );
        }
        let mut sink = DiagnosticSink::new();
        assert!(!sum_instance(0).check_family(&proto, &mut sink));
    }

    #[test]
    fn test_family_tail_template_constrains_suffix() {
        let proto = sum_prototype();
        let mut instance = sum_instance(3);
        instance.operands[2] = Operand::constant(ConstantValue::Symbol(Symbol::new("oops")));
        let mut sink = DiagnosticSink::new();
        assert!(!instance.check_family(&proto, &mut sink));
    }

    #[test]
    fn test_family_fixed_arity_exact() {
        let proto = DerivationRule::new(
            "Diff",
            RuleType::simple(ValueKind::Continuous),
            Arc::new(NoBody),
        )
        .with_operand(Operand::typed(ValueKind::Continuous))
        .with_operand(Operand::typed(ValueKind::Continuous));

        let mut sink = DiagnosticSink::new();
        assert!(!sum_instance(3).check_family(&proto, &mut sink));
    }

    #[test]
    fn test_family_name_and_result_mismatch() {
        let proto = sum_prototype();
        let mut instance = sum_instance(2);
        instance.result = RuleType::simple(ValueKind::Symbol);
        let mut sink = DiagnosticSink::new();
        assert!(!instance.check_family(&proto, &mut sink));
    }
}
