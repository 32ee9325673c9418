//! Attributes and attribute blocks
//!
//! An [`Attribute`] is one field of a [`crate::class::Class`]: a base value
//! kind, usage flags, an optional attached derivation rule and, when the
//! field belongs to a sparse group, its block name and [`VarKey`]. An
//! [`AttributeBlock`] names a contiguous run of attributes sharing one
//! var-key addressing scheme and optionally one rule producing the whole
//! sparse value set per instance.

use std::fmt;

use tabula_types::{
    is_identifier, is_valid_date_format, is_valid_time_format, is_valid_timestamp_format, Symbol,
    ValueKind, VarKeyKind,
};

use crate::diag::DiagnosticSink;
use crate::rule::DerivationRule;

/// Sparse key of one block member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarKey {
    Symbol(Symbol),
    Continuous(i64),
}

impl VarKey {
    pub fn kind(&self) -> VarKeyKind {
        match self {
            VarKey::Symbol(_) => VarKeyKind::Symbol,
            VarKey::Continuous(_) => VarKeyKind::Continuous,
        }
    }
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarKey::Symbol(s) => write!(f, "{s}"),
            VarKey::Continuous(k) => write!(f, "{k}"),
        }
    }
}

/// One field of a class.
///
/// Owned exclusively by its class; the attached rule is owned by the
/// attribute and dropped with it. Block membership (`block`, `var_key`) is
/// managed by [`crate::class::Class`], never set directly.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: Symbol,
    pub label: String,
    kind: ValueKind,
    /// Target class name, relation kinds only.
    pub target_class: Option<Symbol>,
    /// Structure type name, `Structure` kind only.
    pub structure_name: Option<Symbol>,
    /// Referenced sub-object (never freed by the holder) vs included
    /// (owned, destroyed with the parent). Relation kinds only.
    pub reference: bool,
    pub used: bool,
    pub loaded: bool,
    /// Temporal format metadata, validated against the kind.
    pub format: Option<String>,
    rule: Option<DerivationRule>,
    pub(crate) block: Option<Symbol>,
    pub(crate) var_key: Option<VarKey>,
}

impl Attribute {
    /// New used+loaded native attribute. `kind` must be a storable base
    /// kind; block variants are carried by [`AttributeBlock`], not here.
    pub fn new(name: impl Into<Symbol>, kind: ValueKind) -> Self {
        assert!(!kind.is_block(), "attribute kind must be a base kind");
        Self {
            name: name.into(),
            label: String::new(),
            kind,
            target_class: None,
            structure_name: None,
            reference: false,
            used: true,
            loaded: true,
            format: None,
            rule: None,
            block: None,
            var_key: None,
        }
    }

    pub fn relation(
        name: impl Into<Symbol>,
        kind: ValueKind,
        target_class: impl Into<Symbol>,
        reference: bool,
    ) -> Self {
        assert!(kind.is_relation(), "relation attribute needs a relation kind");
        let mut attr = Self::new(name, kind);
        attr.target_class = Some(target_class.into());
        attr.reference = reference;
        attr
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn rule(&self) -> Option<&DerivationRule> {
        self.rule.as_ref()
    }

    pub fn rule_mut(&mut self) -> Option<&mut DerivationRule> {
        self.rule.as_mut()
    }

    /// Attaches a derivation rule; the result-kind invariant is enforced by
    /// [`Attribute::check`], not here, so an authoring mistake stays a
    /// diagnostic instead of a panic.
    pub fn set_rule(&mut self, rule: DerivationRule) {
        self.rule = Some(rule);
    }

    pub fn is_derived(&self) -> bool {
        self.rule.is_some()
    }

    /// Block name, when this attribute belongs to a sparse group.
    pub fn block(&self) -> Option<&Symbol> {
        self.block.as_ref()
    }

    pub fn var_key(&self) -> Option<&VarKey> {
        self.var_key.as_ref()
    }

    /// Native relation sub-record owned by the parent instance. Tracked in
    /// the layout even when unloaded, for destruction and mutation.
    pub fn is_native_included_relation(&self) -> bool {
        self.kind.is_relation() && !self.reference && self.rule.is_none()
    }

    /// Intrinsic validation; relation-target existence is checked by the
    /// class against the domain.
    pub fn check(&self, class_name: &Symbol, sink: &mut DiagnosticSink) -> bool {
        let entity = format!("class {class_name} attribute {}", self.name);
        let mut ok = true;

        if !is_identifier(self.name.as_str()) {
            sink.error(&entity, format!("invalid attribute name '{}'", self.name));
            ok = false;
        }
        if self.kind.is_relation() && self.target_class.is_none() && self.rule.is_none() {
            sink.error(&entity, "relation attribute without a target class");
            ok = false;
        }
        if !self.kind.is_relation() && self.target_class.is_some() {
            sink.error(&entity, "target class on a non-relation attribute");
            ok = false;
        }
        if self.kind == ValueKind::Structure && self.structure_name.is_none() {
            sink.error(&entity, "structure attribute without a structure name");
            ok = false;
        }
        if let Some(format) = &self.format {
            let valid = match self.kind {
                ValueKind::Date => is_valid_date_format(format),
                ValueKind::Time => is_valid_time_format(format),
                ValueKind::Timestamp => is_valid_timestamp_format(format),
                _ => {
                    sink.error(&entity, "format metadata on a non-temporal attribute");
                    ok = false;
                    true
                }
            };
            if !valid {
                sink.error(
                    &entity,
                    format!("invalid {} format '{format}'", self.kind.name()),
                );
                ok = false;
            }
        }
        if self.rule.is_some() && self.block.is_some() {
            sink.error(
                &entity,
                "block member cannot carry a rule; attach it to the block",
            );
            ok = false;
        }
        if let Some(rule) = &self.rule {
            if rule.result.kind != self.kind {
                sink.error(
                    &entity,
                    format!(
                        "rule {} produces {}, attribute is {}",
                        rule.name,
                        rule.result.kind.name(),
                        self.kind.name()
                    ),
                );
                ok = false;
            }
        }
        ok
    }
}

/// A named, contiguous run of attributes sharing one sparse addressing
/// scheme. Dropped by the class when its last member is removed.
#[derive(Debug, Clone)]
pub struct AttributeBlock {
    pub name: Symbol,
    pub label: String,
    pub(crate) first: Symbol,
    pub(crate) last: Symbol,
    pub var_key_kind: VarKeyKind,
    pub loaded: bool,
    rule: Option<DerivationRule>,
}

impl AttributeBlock {
    pub(crate) fn new(
        name: Symbol,
        first: Symbol,
        last: Symbol,
        var_key_kind: VarKeyKind,
    ) -> Self {
        Self {
            name,
            label: String::new(),
            first,
            last,
            var_key_kind,
            loaded: true,
            rule: None,
        }
    }

    pub fn first(&self) -> &Symbol {
        &self.first
    }

    pub fn last(&self) -> &Symbol {
        &self.last
    }

    pub fn rule(&self) -> Option<&DerivationRule> {
        self.rule.as_ref()
    }

    pub fn rule_mut(&mut self) -> Option<&mut DerivationRule> {
        self.rule.as_mut()
    }

    pub fn set_rule(&mut self, rule: DerivationRule) {
        self.rule = Some(rule);
    }

    pub fn is_derived(&self) -> bool {
        self.rule.is_some()
    }

    /// Block value kind for a member base kind, when the rule produces the
    /// whole sparse set at once.
    pub fn check(&self, class_name: &Symbol, member_kind: ValueKind, sink: &mut DiagnosticSink) -> bool {
        let entity = format!("class {class_name} block {}", self.name);
        let mut ok = true;

        if !is_identifier(self.name.as_str()) {
            sink.error(&entity, format!("invalid block name '{}'", self.name));
            ok = false;
        }
        if self.var_key_kind == VarKeyKind::None {
            sink.error(&entity, "block without a var-key kind");
            ok = false;
        }
        if let Some(rule) = &self.rule {
            match member_kind.block_kind() {
                Some(block_kind) if rule.result.kind == block_kind => {}
                Some(block_kind) => {
                    sink.error(
                        &entity,
                        format!(
                            "rule {} produces {}, block holds {}",
                            rule.name,
                            rule.result.kind.name(),
                            block_kind.name()
                        ),
                    );
                    ok = false;
                }
                None => {
                    sink.error(
                        &entity,
                        format!("kind {} cannot form a block", member_kind.name()),
                    );
                    ok = false;
                }
            }
            if rule.var_key_kind != self.var_key_kind {
                sink.error(
                    &entity,
                    format!(
                        "rule {} var-key kind {:?} does not match block var-key kind {:?}",
                        rule.name, rule.var_key_kind, self.var_key_kind
                    ),
                );
                ok = false;
            }
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_key_kinds() {
        assert_eq!(VarKey::Symbol(Symbol::new("k")).kind(), VarKeyKind::Symbol);
        assert_eq!(VarKey::Continuous(7).kind(), VarKeyKind::Continuous);
    }

    #[test]
    fn test_native_included_relation() {
        let owned = Attribute::relation("orders", ValueKind::ObjectArray, "Order", false);
        assert!(owned.is_native_included_relation());
        let referenced = Attribute::relation("parent", ValueKind::Object, "Customer", true);
        assert!(!referenced.is_native_included_relation());
    }

    #[test]
    fn test_check_rejects_bad_format() {
        let class = Symbol::new("Person");
        let mut attr = Attribute::new("birth", ValueKind::Date);
        attr.format = Some("YYYY-MM-DD".into());
        let mut sink = DiagnosticSink::new();
        assert!(attr.check(&class, &mut sink));

        attr.format = Some("YYYY-YYYY".into());
        let mut sink = DiagnosticSink::new();
        assert!(!attr.check(&class, &mut sink));
        assert!(sink.has_errors());
    }

    #[test]
    fn test_check_rejects_format_on_continuous() {
        let class = Symbol::new("Person");
        let mut attr = Attribute::new("age", ValueKind::Continuous);
        attr.format = Some("YYYY-MM-DD".into());
        let mut sink = DiagnosticSink::new();
        assert!(!attr.check(&class, &mut sink));
    }

    #[test]
    fn test_check_relation_needs_target() {
        let class = Symbol::new("Customer");
        let attr = Attribute::new("orders", ValueKind::ObjectArray);
        let mut sink = DiagnosticSink::new();
        assert!(!attr.check(&class, &mut sink));
    }
}
