//! Class domains
//!
//! A [`ClassDomain`] owns a set of classes that reference each other
//! through relation attributes, and drives the whole compile pipeline:
//! structural checks, layout indexing, derived-dependency cycle detection,
//! rule compilation and snapshot installation. A domain is confined to one
//! thread; nothing here is synchronized.

use indexmap::IndexMap;
use tracing::debug;

use tabula_types::Symbol;

use crate::class::{Class, ClassIndex};
use crate::compile;
use crate::diag::DiagnosticSink;
use crate::error::{Error, Result};
use crate::rule::{DerivationRule, OperandOrigin};

/// A named set of mutually referencing classes.
#[derive(Debug, Default)]
pub struct ClassDomain {
    pub name: Symbol,
    classes: IndexMap<Symbol, Class>,
}

impl ClassDomain {
    pub fn new(name: impl Into<Symbol>) -> Self {
        Self {
            name: name.into(),
            classes: IndexMap::new(),
        }
    }

    pub fn insert_class(&mut self, class: Class) -> Result<()> {
        if self.classes.contains_key(&class.name) {
            return Err(Error::DuplicateClass(class.name.clone()));
        }
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    pub fn get(&self, name: &Symbol) -> Option<&Class> {
        self.classes.get(name)
    }

    pub fn get_mut(&mut self, name: &Symbol) -> Option<&mut Class> {
        self.classes.get_mut(name)
    }

    pub fn remove_class(&mut self, name: &Symbol) -> Option<Class> {
        self.classes.shift_remove(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Position of a class in the domain, used as a DFS state slot.
    pub(crate) fn index_of(&self, name: &Symbol) -> Option<usize> {
        self.classes.get_index_of(name)
    }

    /// Structural validation of every class.
    pub fn check(&self, sink: &mut DiagnosticSink) -> bool {
        let mut ok = true;
        for class in self.classes.values() {
            if !class.check(self, sink) {
                ok = false;
            }
        }
        ok
    }

    /// Full compile pipeline. Recompiling an unchanged domain is a no-op
    /// that keeps every existing snapshot.
    pub fn compile(&mut self, sink: &mut DiagnosticSink) -> Result<()> {
        if !self.classes.is_empty() && self.classes.values().all(|c| c.is_compiled()) {
            return Ok(());
        }
        let fail = |sink: &DiagnosticSink, name: &Symbol| Error::CompileFailed {
            domain: name.clone(),
            errors: sink.error_count(),
        };
        if !self.check(sink) {
            return Err(fail(sink, &self.name));
        }
        let layouts: IndexMap<Symbol, ClassIndex> = self
            .classes
            .values()
            .map(|class| (class.name.clone(), class.build_index(self)))
            .collect();
        if !self.detect_rule_cycles(sink) {
            return Err(fail(sink, &self.name));
        }
        let mut compiled = Vec::with_capacity(self.classes.len());
        for class in self.classes.values() {
            if let Some(snapshot) = compile::compile_class(class, self, &layouts, sink) {
                compiled.push((class.name.clone(), snapshot));
            }
        }
        if sink.has_errors() {
            return Err(fail(sink, &self.name));
        }
        for (name, layout) in layouts {
            if let Some(class) = self.classes.get_mut(&name) {
                class.install_index(layout);
            }
        }
        for (name, snapshot) in compiled {
            if let Some(class) = self.classes.get_mut(&name) {
                class.install_compiled(snapshot);
            }
        }
        debug!(domain = %self.name, classes = self.classes.len(), "compiled domain");
        Ok(())
    }

    /// Grey/black DFS over the derived-dependency graph: one node per
    /// attribute or block, an edge wherever a rule operand reads another
    /// derived attribute or block, spanning classes through relation
    /// operands and nested rules. Any grey re-entry is a cycle.
    pub fn detect_rule_cycles(&self, sink: &mut DiagnosticSink) -> bool {
        let mut state: Vec<Vec<VisitState>> = self
            .classes
            .values()
            .map(|class| {
                vec![VisitState::White; class.attribute_count() + class.blocks().count()]
            })
            .collect();
        let mut ok = true;
        for class in self.classes.values() {
            let derived: Vec<Symbol> = class
                .attributes()
                .filter(|a| a.is_derived())
                .map(|a| a.name.clone())
                .chain(
                    class
                        .blocks()
                        .filter(|b| b.is_derived())
                        .map(|b| b.name.clone()),
                )
                .collect();
            for name in derived {
                if !self.visit_node(class, &name, &mut state, sink) {
                    ok = false;
                }
            }
        }
        ok
    }

    fn node_slot(&self, class: &Class, name: &Symbol) -> Option<(usize, usize)> {
        let class_slot = self.index_of(&class.name)?;
        if let Some(attr_slot) = class.attributes().position(|a| &a.name == name) {
            return Some((class_slot, attr_slot));
        }
        let block_slot = class.blocks().position(|b| &b.name == name)?;
        Some((class_slot, class.attribute_count() + block_slot))
    }

    fn visit_node(
        &self,
        class: &Class,
        name: &Symbol,
        state: &mut Vec<Vec<VisitState>>,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let (class_slot, node_slot) = match self.node_slot(class, name) {
            Some(slots) => slots,
            None => return true,
        };
        match state[class_slot][node_slot] {
            VisitState::Grey => {
                sink.error(
                    format!("class {} attribute {}", class.name, name),
                    "derived dependency cycle",
                );
                return false;
            }
            VisitState::Black => return true,
            VisitState::White => state[class_slot][node_slot] = VisitState::Grey,
        }
        let rule = class
            .attribute(name)
            .and_then(|a| a.rule())
            .or_else(|| class.block(name).and_then(|b| b.rule()));
        let mut ok = true;
        if let Some(rule) = rule {
            let mut scope = Vec::new();
            if !self.visit_rule(rule, class, &mut scope, state, sink) {
                ok = false;
            }
        }
        state[class_slot][node_slot] = VisitState::Black;
        ok
    }

    fn visit_rule(
        &self,
        rule: &DerivationRule,
        owner: &Class,
        scope: &mut Vec<Symbol>,
        state: &mut Vec<Vec<VisitState>>,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let mut scratch = DiagnosticSink::new();
        let secondary = if rule.multiple_scope {
            rule.secondary_class(owner, self, &mut scratch)
        } else {
            None
        };
        let mut ok = true;
        for (i, operand) in rule.operands.iter().enumerate() {
            let in_secondary = secondary.is_some() && i > 0;
            if in_secondary {
                scope.push(owner.name.clone());
            }
            let base = if in_secondary {
                secondary.unwrap_or(owner)
            } else {
                owner
            };
            let target = if operand.scope_level == 0 {
                Some(base)
            } else {
                let hops = operand.scope_level as usize;
                scope
                    .len()
                    .checked_sub(hops)
                    .and_then(|i| scope.get(i))
                    .and_then(|name| self.get(name))
            };
            if let Some(target) = target {
                match &operand.origin {
                    OperandOrigin::Attribute(name) => {
                        let derived = target
                            .attribute(name)
                            .map(|a| a.is_derived())
                            .or_else(|| target.block(name).map(|b| b.is_derived()));
                        if derived == Some(true) && !self.visit_node(target, name, state, sink) {
                            ok = false;
                        }
                    }
                    OperandOrigin::Rule(nested) => {
                        if !self.visit_rule(nested, target, scope, state, sink) {
                            ok = false;
                        }
                    }
                    _ => {}
                }
            }
            if in_secondary {
                scope.pop();
            }
        }
        ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    White,
    Grey,
    Black,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use tabula_types::ValueKind;

    #[test]
    fn test_insert_rejects_duplicate_class() {
        let mut domain = ClassDomain::new("test");
        domain.insert_class(Class::new("Person")).unwrap();
        let err = domain.insert_class(Class::new("Person")).unwrap_err();
        assert!(matches!(err, Error::DuplicateClass(_)));
    }

    #[test]
    fn test_compile_installs_snapshots() {
        let mut domain = ClassDomain::new("test");
        let mut class = Class::new("Person").rooted();
        class
            .insert_attribute(Attribute::new("name", ValueKind::Symbol))
            .unwrap();
        domain.insert_class(class).unwrap();

        let mut sink = DiagnosticSink::new();
        domain.compile(&mut sink).unwrap();
        let class = domain.get(&Symbol::new("Person")).unwrap();
        assert!(class.is_indexed());
        assert!(class.is_compiled());
    }

    #[test]
    fn test_compile_twice_is_idempotent() {
        let mut domain = ClassDomain::new("test");
        let mut class = Class::new("Person").rooted();
        class
            .insert_attribute(Attribute::new("name", ValueKind::Symbol))
            .unwrap();
        domain.insert_class(class).unwrap();

        let mut sink = DiagnosticSink::new();
        domain.compile(&mut sink).unwrap();
        let name = Symbol::new("Person");
        let first = domain.get(&name).unwrap().compiled().unwrap().clone();
        domain.compile(&mut sink).unwrap();
        let second = domain.get(&name).unwrap().compiled().unwrap().clone();
        assert!(std::rc::Rc::ptr_eq(&first, &second));
        assert_eq!(first.generation, second.generation);
    }

    #[test]
    fn test_edit_invalidates_compilation() {
        let mut domain = ClassDomain::new("test");
        let mut class = Class::new("Person").rooted();
        class
            .insert_attribute(Attribute::new("name", ValueKind::Symbol))
            .unwrap();
        domain.insert_class(class).unwrap();

        let mut sink = DiagnosticSink::new();
        domain.compile(&mut sink).unwrap();
        let name = Symbol::new("Person");
        domain
            .get_mut(&name)
            .unwrap()
            .insert_attribute(Attribute::new("age", ValueKind::Continuous))
            .unwrap();
        assert!(!domain.get(&name).unwrap().is_compiled());
        domain.compile(&mut sink).unwrap();
        assert!(domain.get(&name).unwrap().is_compiled());
    }
}
