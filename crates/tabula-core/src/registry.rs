//! Process-wide derivation rule registry
//!
//! Rule families register a prototype once at startup; schema checks look
//! prototypes up by name and instances are cloned from them. The table is
//! written during registration and read-only afterwards; the lock only
//! guards the startup phase.

use std::sync::{OnceLock, RwLock};

use indexmap::IndexMap;
use tracing::debug;

use tabula_types::{is_identifier, Symbol};

use crate::diag::DiagnosticSink;
use crate::error::{Error, Result};
use crate::rule::DerivationRule;

fn table() -> &'static RwLock<IndexMap<Symbol, DerivationRule>> {
    static TABLE: OnceLock<RwLock<IndexMap<Symbol, DerivationRule>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(IndexMap::new()))
}

/// Registers a rule prototype. The name must be a valid identifier, the
/// prototype must pass its definition check, and no other prototype may
/// carry the same name.
pub fn register(rule: DerivationRule) -> Result<()> {
    if !is_identifier(rule.name.as_str()) {
        return Err(Error::InvalidRuleName(rule.name.as_str().to_string()));
    }
    let mut sink = DiagnosticSink::new();
    if !rule.check_definition(&mut sink) {
        return Err(Error::RuleDefinition(rule.name.clone()));
    }
    let mut table = table().write().unwrap_or_else(|e| e.into_inner());
    if table.contains_key(&rule.name) {
        return Err(Error::DuplicateRule(rule.name.clone()));
    }
    debug!(rule = %rule.name, "registered derivation rule");
    table.insert(rule.name.clone(), rule);
    Ok(())
}

/// Clone of the registered prototype, for family checks.
pub fn lookup(name: &Symbol) -> Option<DerivationRule> {
    table()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(name)
        .cloned()
}

pub fn is_registered(name: &Symbol) -> bool {
    table()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .contains_key(name)
}

/// Fresh instantiable copy of a prototype; the caller fills the operand
/// origins and attaches it to an attribute or block.
pub fn new_instance(name: &Symbol) -> Option<DerivationRule> {
    lookup(name)
}

/// Registered prototype names, in registration order.
pub fn all_names() -> Vec<Symbol> {
    table()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .keys()
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::NoBody;
    use crate::rule::{Operand, RuleType};
    use std::sync::Arc;
    use tabula_types::ValueKind;

    fn prototype(name: &str) -> DerivationRule {
        DerivationRule::new(name, RuleType::simple(ValueKind::Continuous), Arc::new(NoBody))
            .with_operand(Operand::typed(ValueKind::Continuous))
    }

    #[test]
    fn test_register_and_lookup() {
        register(prototype("RegistryProbe")).unwrap();
        let found = lookup(&Symbol::new("RegistryProbe")).expect("registered");
        assert_eq!(found.name, Symbol::new("RegistryProbe"));
        assert!(all_names().contains(&Symbol::new("RegistryProbe")));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        register(prototype("RegistryDupProbe")).unwrap();
        let err = register(prototype("RegistryDupProbe")).unwrap_err();
        assert!(matches!(err, Error::DuplicateRule(_)));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let err = register(prototype("not a name")).unwrap_err();
        assert!(matches!(err, Error::InvalidRuleName(_)));
    }

    #[test]
    fn test_definition_failure_rejected() {
        let mut rule = prototype("RegistryBadProbe");
        rule.operands[0] = Operand::deferred();
        let err = register(rule).unwrap_err();
        assert!(matches!(err, Error::RuleDefinition(_)));
    }
}
