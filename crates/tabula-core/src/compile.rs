//! Compiled schema and rule artifacts
//!
//! Compilation turns an authored [`Class`] into an immutable
//! [`CompiledClass`] snapshot: one [`CompiledSlot`] per dense storage slot,
//! every attached rule lowered to a [`CompiledRule`] whose operands resolve
//! to constants, load indices, nested rules or upper-scope cache slots.
//! Instances hold the snapshot by `Rc`; editing the authoring class never
//! disturbs records created against an older generation.
//!
//! Scope handling is an explicit [`ScopeContext`] threaded through the
//! calls. A multiple-scope rule pushes one frame; an operand with a
//! positive scope level compiles against the class that many frames up and
//! is registered on that frame, so evaluation can cache it once per outer
//! record before iterating the inner scope.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use tabula_types::{LoadIndex, Symbol, ValueKind, VarKeyKind};

use crate::attribute::VarKey;
use crate::class::{Class, ClassIndex};
use crate::diag::DiagnosticSink;
use crate::domain::ClassDomain;
use crate::eval::RuleBody;
use crate::rule::{DerivationRule, Operand, OperandOrigin};
use crate::value::ConstantValue;

/// Compile-time scope stack. One frame per enclosing multiple-scope rule,
/// innermost last.
pub struct ScopeContext<'a> {
    frames: Vec<ScopeFrame<'a>>,
}

struct ScopeFrame<'a> {
    class: &'a Class,
    secondary: Vec<CompiledOperand>,
}

impl<'a> ScopeContext<'a> {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn push(&mut self, class: &'a Class) {
        self.frames.push(ScopeFrame {
            class,
            secondary: Vec::new(),
        });
    }

    fn pop(&mut self) -> Vec<CompiledOperand> {
        match self.frames.pop() {
            Some(frame) => frame.secondary,
            None => Vec::new(),
        }
    }
}

impl Default for ScopeContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a compiled operand's value comes from at evaluation time.
#[derive(Clone)]
pub enum OperandSource {
    Constant(ConstantValue),
    Attribute(LoadIndex),
    Block(LoadIndex),
    Rule(Arc<CompiledRule>),
    /// Cache slot of the scope frame `hops` levels up, filled by
    /// [`CompiledRule::open_scope`].
    UpperScope { hops: u32, slot: u32 },
}

impl fmt::Debug for OperandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandSource::Constant(c) => write!(f, "Constant({c})"),
            OperandSource::Attribute(li) => write!(f, "Attribute({li})"),
            OperandSource::Block(li) => write!(f, "Block({li})"),
            OperandSource::Rule(rule) => write!(f, "Rule({})", rule.name),
            OperandSource::UpperScope { hops, slot } => {
                write!(f, "UpperScope(hops {hops}, slot {slot})")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledOperand {
    pub kind: ValueKind,
    pub source: OperandSource,
}

/// A compiled rule tree, shared by every instance of its class generation.
pub struct CompiledRule {
    pub name: Symbol,
    pub result_kind: ValueKind,
    pub multiple_scope: bool,
    pub operands: Vec<CompiledOperand>,
    /// Operands registered on this rule's scope frame, evaluated against
    /// the main-scope record when the frame opens.
    pub secondary: Vec<CompiledOperand>,
    pub body: Arc<dyn RuleBody>,
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("name", &self.name)
            .field("result_kind", &self.result_kind)
            .field("multiple_scope", &self.multiple_scope)
            .field("operands", &self.operands)
            .field("secondary", &self.secondary)
            .finish_non_exhaustive()
    }
}

/// One dense storage slot of a compiled class.
#[derive(Debug)]
pub enum CompiledSlot {
    Attribute(CompiledAttribute),
    Block(CompiledBlock),
}

impl CompiledSlot {
    pub fn name(&self) -> &Symbol {
        match self {
            CompiledSlot::Attribute(a) => &a.name,
            CompiledSlot::Block(b) => &b.name,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            CompiledSlot::Attribute(a) => a.kind,
            CompiledSlot::Block(b) => b.kind,
        }
    }

    pub fn rule(&self) -> Option<&Arc<CompiledRule>> {
        match self {
            CompiledSlot::Attribute(a) => a.rule.as_ref(),
            CompiledSlot::Block(b) => b.rule.as_ref(),
        }
    }

    pub fn is_derived(&self) -> bool {
        self.rule().is_some()
    }
}

#[derive(Debug)]
pub struct CompiledAttribute {
    pub name: Symbol,
    pub kind: ValueKind,
    pub load_index: LoadIndex,
    pub rule: Option<Arc<CompiledRule>>,
    pub reference: bool,
    pub target_class: Option<Symbol>,
}

#[derive(Debug)]
pub struct CompiledBlock {
    pub name: Symbol,
    /// Block kind, e.g. `ContinuousBlock` for continuous members.
    pub kind: ValueKind,
    pub load_index: LoadIndex,
    pub var_key_kind: VarKeyKind,
    pub rule: Option<Arc<CompiledRule>>,
    pub attrs: Vec<CompiledBlockAttr>,
}

#[derive(Debug, Clone)]
pub struct CompiledBlockAttr {
    pub name: Symbol,
    pub var_key: VarKey,
    pub sparse: u32,
    /// Relation class of an ObjectArray member.
    pub target_class: Option<Symbol>,
}

/// Immutable snapshot of a class at one freshness generation.
#[derive(Debug)]
pub struct CompiledClass {
    pub name: Symbol,
    pub generation: u64,
    pub root: bool,
    pub key: Vec<Symbol>,
    slots: Vec<CompiledSlot>,
    by_name: IndexMap<Symbol, LoadIndex>,
    /// Trailing slots holding unloaded owned sub-records.
    pub internal_count: u32,
}

impl CompiledClass {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[CompiledSlot] {
        &self.slots
    }

    pub fn slot(&self, load_index: LoadIndex) -> &CompiledSlot {
        &self.slots[load_index.dense_index()]
    }

    /// Load index of an attribute or block by name.
    pub fn load_index(&self, name: &Symbol) -> Option<LoadIndex> {
        self.by_name.get(name).copied()
    }

    pub fn attribute_at(&self, load_index: LoadIndex) -> &CompiledAttribute {
        match self.slot(load_index) {
            CompiledSlot::Attribute(a) => a,
            CompiledSlot::Block(b) => {
                panic!("slot {} holds block {}, not an attribute", load_index, b.name)
            }
        }
    }

    pub fn block_at(&self, load_index: LoadIndex) -> &CompiledBlock {
        match self.slot(load_index) {
            CompiledSlot::Block(b) => b,
            CompiledSlot::Attribute(a) => {
                panic!("slot {} holds attribute {}, not a block", load_index, a.name)
            }
        }
    }
}

/// Compiles one class against the layouts of its whole domain. Returns
/// `None` after reporting diagnostics when any attached rule fails to
/// compile.
pub fn compile_class(
    class: &Class,
    domain: &ClassDomain,
    layouts: &IndexMap<Symbol, ClassIndex>,
    sink: &mut DiagnosticSink,
) -> Option<Rc<CompiledClass>> {
    let layout = layouts.get(&class.name)?;
    let mut slots: Vec<Option<CompiledSlot>> = Vec::new();
    slots.resize_with(layout.slot_count as usize, || None);
    let mut by_name = IndexMap::new();
    let mut ok = true;

    for attr in class.attributes() {
        let load_index = match layout.attribute_load_index(&attr.name) {
            Some(li) => li,
            None => continue,
        };
        by_name.insert(attr.name.clone(), load_index);
        if load_index.is_sparse() {
            continue;
        }
        let rule = match attr.rule() {
            Some(rule) => {
                let mut scope = ScopeContext::new();
                match compile_rule(rule, class, domain, layouts, &mut scope, sink) {
                    Some(compiled) => Some(compiled),
                    None => {
                        ok = false;
                        None
                    }
                }
            }
            None => None,
        };
        slots[load_index.dense_index()] = Some(CompiledSlot::Attribute(CompiledAttribute {
            name: attr.name.clone(),
            kind: attr.kind(),
            load_index,
            rule,
            reference: attr.reference,
            target_class: attr.target_class.clone(),
        }));
    }

    for block in class.blocks() {
        let load_index = match layout.block_load_index(&block.name) {
            Some(li) => li,
            None => continue,
        };
        by_name.insert(block.name.clone(), load_index);
        let members = class.block_members(&block.name);
        let kind = members
            .first()
            .and_then(|m| m.kind().block_kind())
            .unwrap_or(ValueKind::ContinuousBlock);
        let attrs = members
            .iter()
            .filter_map(|member| {
                let li = layout.attribute_load_index(&member.name)?;
                Some(CompiledBlockAttr {
                    name: member.name.clone(),
                    var_key: member.var_key().cloned()?,
                    sparse: li.sparse_index()?,
                    target_class: member.target_class.clone(),
                })
            })
            .collect();
        let rule = match block.rule() {
            Some(rule) => {
                let mut scope = ScopeContext::new();
                match compile_rule(rule, class, domain, layouts, &mut scope, sink) {
                    Some(compiled) => Some(compiled),
                    None => {
                        ok = false;
                        None
                    }
                }
            }
            None => None,
        };
        slots[load_index.dense_index()] = Some(CompiledSlot::Block(CompiledBlock {
            name: block.name.clone(),
            kind,
            load_index,
            var_key_kind: block.var_key_kind,
            rule,
            attrs,
        }));
    }

    if !ok {
        return None;
    }
    let slots: Option<Vec<CompiledSlot>> = slots.into_iter().collect();
    let slots = match slots {
        Some(slots) => slots,
        None => {
            sink.error(
                format!("class {}", class.name),
                "layout left an unassigned slot",
            );
            return None;
        }
    };
    trace!(class = %class.name, slots = slots.len(), "compiled class");
    Some(Rc::new(CompiledClass {
        name: class.name.clone(),
        generation: class.freshness(),
        root: class.is_root(),
        key: class.key().to_vec(),
        slots,
        by_name,
        internal_count: layout.internal_count,
    }))
}

/// Lowers one rule tree. The scope context carries the enclosing
/// multiple-scope frames; attached rules start from an empty context.
pub fn compile_rule<'a>(
    rule: &DerivationRule,
    owner: &'a Class,
    domain: &'a ClassDomain,
    layouts: &IndexMap<Symbol, ClassIndex>,
    scope: &mut ScopeContext<'a>,
    sink: &mut DiagnosticSink,
) -> Option<Arc<CompiledRule>> {
    let mut operands = Vec::with_capacity(rule.operands.len());
    let secondary;
    if rule.multiple_scope {
        let secondary_class = rule.secondary_class(owner, domain, sink)?;
        let first = rule.operands.first()?;
        operands.push(compile_operand(
            rule, 0, first, owner, domain, layouts, scope, sink,
        )?);
        scope.push(owner);
        let mut ok = true;
        for (i, operand) in rule.operands.iter().enumerate().skip(1) {
            match compile_operand(
                rule,
                i,
                operand,
                secondary_class,
                domain,
                layouts,
                scope,
                sink,
            ) {
                Some(compiled) => operands.push(compiled),
                None => ok = false,
            }
        }
        secondary = scope.pop();
        if !ok {
            return None;
        }
    } else {
        for (i, operand) in rule.operands.iter().enumerate() {
            operands.push(compile_operand(
                rule, i, operand, owner, domain, layouts, scope, sink,
            )?);
        }
        secondary = Vec::new();
    }
    Some(Arc::new(CompiledRule {
        name: rule.name.clone(),
        result_kind: rule.result.kind,
        multiple_scope: rule.multiple_scope,
        operands,
        secondary,
        body: rule.body.clone(),
    }))
}

#[allow(clippy::too_many_arguments)]
fn compile_operand<'a>(
    rule: &DerivationRule,
    index: usize,
    operand: &Operand,
    base: &'a Class,
    domain: &'a ClassDomain,
    layouts: &IndexMap<Symbol, ClassIndex>,
    scope: &mut ScopeContext<'a>,
    sink: &mut DiagnosticSink,
) -> Option<CompiledOperand> {
    let entity = format!("rule {} operand {}", rule.name, index + 1);
    let kind = match operand.kind {
        Some(kind) => kind,
        None => {
            sink.error(&entity, "operand type unset");
            return None;
        }
    };
    if operand.scope_level > 0 {
        return compile_upper_scope_operand(rule, index, operand, kind, domain, layouts, scope, sink);
    }
    let source = match &operand.origin {
        OperandOrigin::Unspecified => {
            sink.error(&entity, "operand origin unset");
            return None;
        }
        OperandOrigin::Constant(value) => OperandSource::Constant(value.clone()),
        OperandOrigin::Attribute(name) => {
            let layout = layouts.get(&base.name)?;
            let load_index = match layout.load_index(name) {
                Some(li) => li,
                None => {
                    sink.error(
                        &entity,
                        format!("attribute {name} of class {} is not loaded", base.name),
                    );
                    return None;
                }
            };
            if base.block(name).is_some() {
                OperandSource::Block(load_index)
            } else {
                OperandSource::Attribute(load_index)
            }
        }
        OperandOrigin::Rule(nested) => {
            let compiled = compile_rule(nested, base, domain, layouts, scope, sink)?;
            OperandSource::Rule(compiled)
        }
    };
    Some(CompiledOperand { kind, source })
}

/// Compiles a positive-scope-level operand against the class the level
/// reaches, registers it on that frame and leaves an upper-scope reference
/// behind. The inner compilation only sees the frames below the target, so
/// deeper levels keep their meaning.
#[allow(clippy::too_many_arguments)]
fn compile_upper_scope_operand<'a>(
    rule: &DerivationRule,
    index: usize,
    operand: &Operand,
    kind: ValueKind,
    domain: &'a ClassDomain,
    layouts: &IndexMap<Symbol, ClassIndex>,
    scope: &mut ScopeContext<'a>,
    sink: &mut DiagnosticSink,
) -> Option<CompiledOperand> {
    let entity = format!("rule {} operand {}", rule.name, index + 1);
    let hops = operand.scope_level as usize;
    if hops > scope.frames.len() {
        sink.error(
            &entity,
            format!(
                "scope level {} exceeds scope depth {}",
                operand.scope_level,
                scope.frames.len()
            ),
        );
        return None;
    }
    let split = scope.frames.len() - hops;
    let mut tail = scope.frames.split_off(split);
    let target_class = tail[0].class;

    let mut inner = operand.clone();
    inner.scope_level = 0;
    let compiled = compile_operand(
        rule,
        index,
        &inner,
        target_class,
        domain,
        layouts,
        scope,
        sink,
    );
    let result = compiled.map(|compiled| {
        let slot = tail[0].secondary.len() as u32;
        tail[0].secondary.push(compiled);
        CompiledOperand {
            kind,
            source: OperandSource::UpperScope {
                hops: operand.scope_level,
                slot,
            },
        }
    });
    scope.frames.append(&mut tail);
    result
}
