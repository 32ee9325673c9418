//! Classes and their indexed layout
//!
//! A [`Class`] is one authored record type: an ordered attribute map,
//! sparse blocks, an optional key, and a freshness counter bumped on every
//! structural edit. Indexing derives a [`ClassIndex`] (per-category
//! attribute arrays and the load-index layout); compilation, driven by
//! [`crate::domain::ClassDomain`], turns the class into an immutable
//! [`crate::compile::CompiledClass`] snapshot. Both are stale, and rebuilt,
//! whenever the freshness counter moves.

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use tabula_types::{is_identifier, LoadIndex, Symbol, ValueKind, VarKeyKind};

use crate::attribute::{Attribute, AttributeBlock, VarKey};
use crate::compile::CompiledClass;
use crate::diag::DiagnosticSink;
use crate::domain::ClassDomain;
use crate::error::{Error, Result};
use crate::registry;

/// One authored record type.
#[derive(Debug, Clone, Default)]
pub struct Class {
    pub name: Symbol,
    pub label: String,
    root: bool,
    key: Vec<Symbol>,
    attributes: IndexMap<Symbol, Attribute>,
    blocks: IndexMap<Symbol, AttributeBlock>,
    freshness: u64,
    index_freshness: u64,
    index: Option<ClassIndex>,
    compiled: Option<Rc<CompiledClass>>,
}

impl Class {
    pub fn new(name: impl Into<Symbol>) -> Self {
        Self {
            name: name.into(),
            freshness: 1,
            index_freshness: 0,
            ..Default::default()
        }
    }

    /// Marks the class a root record type, independently stored and
    /// destroyed, rather than a component owned by a parent.
    pub fn rooted(mut self) -> Self {
        self.root = true;
        self
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn key(&self) -> &[Symbol] {
        &self.key
    }

    pub fn set_key(&mut self, key: Vec<Symbol>) {
        self.key = key;
        self.bump();
    }

    pub fn freshness(&self) -> u64 {
        self.freshness
    }

    fn bump(&mut self) {
        self.freshness += 1;
    }

    pub fn attribute(&self, name: &Symbol) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attribute_mut(&mut self, name: &Symbol) -> Option<&mut Attribute> {
        // structural state may change through the returned reference
        if self.attributes.contains_key(name) {
            self.bump();
        }
        self.attributes.get_mut(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn block(&self, name: &Symbol) -> Option<&AttributeBlock> {
        self.blocks.get(name)
    }

    pub fn block_mut(&mut self, name: &Symbol) -> Option<&mut AttributeBlock> {
        // structural state may change through the returned reference
        if self.blocks.contains_key(name) {
            self.bump();
        }
        self.blocks.get_mut(name)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &AttributeBlock> {
        self.blocks.values()
    }

    /// Members of a block, in attribute order.
    pub fn block_members(&self, block: &Symbol) -> Vec<&Attribute> {
        self.attributes
            .values()
            .filter(|a| a.block() == Some(block))
            .collect()
    }

    /// Base kind shared by a block's members.
    pub fn block_member_kind(&self, block: &Symbol) -> Option<ValueKind> {
        self.attributes
            .values()
            .find(|a| a.block() == Some(block))
            .map(|a| a.kind())
    }

    fn check_name_free(&self, name: &Symbol) -> Result<()> {
        if self.attributes.contains_key(name) || self.blocks.contains_key(name) {
            return Err(Error::DuplicateName {
                class: self.name.clone(),
                name: name.clone(),
            });
        }
        Ok(())
    }

    /// Appends an attribute. The name must be unique across the combined
    /// attribute and block namespace.
    pub fn insert_attribute(&mut self, attribute: Attribute) -> Result<()> {
        self.check_name_free(&attribute.name)?;
        self.attributes.insert(attribute.name.clone(), attribute);
        self.bump();
        Ok(())
    }

    pub fn insert_attribute_before(&mut self, anchor: &Symbol, attribute: Attribute) -> Result<()> {
        self.check_name_free(&attribute.name)?;
        let index = self
            .attributes
            .get_index_of(anchor)
            .ok_or_else(|| Error::UnknownAttribute {
                class: self.name.clone(),
                name: anchor.clone(),
            })?;
        self.attributes
            .shift_insert(index, attribute.name.clone(), attribute);
        self.bump();
        Ok(())
    }

    pub fn insert_attribute_after(&mut self, anchor: &Symbol, attribute: Attribute) -> Result<()> {
        self.check_name_free(&attribute.name)?;
        let index = self
            .attributes
            .get_index_of(anchor)
            .ok_or_else(|| Error::UnknownAttribute {
                class: self.name.clone(),
                name: anchor.clone(),
            })?;
        self.attributes
            .shift_insert(index + 1, attribute.name.clone(), attribute);
        self.bump();
        Ok(())
    }

    /// Removes an attribute, detaching it from its block; a block emptied
    /// of members is dropped with it.
    pub fn remove_attribute(&mut self, name: &Symbol) -> Result<Attribute> {
        let attribute = self
            .attributes
            .shift_remove(name)
            .ok_or_else(|| Error::UnknownAttribute {
                class: self.name.clone(),
                name: name.clone(),
            })?;
        if let Some(block_name) = attribute.block().cloned() {
            let members = self.block_members(&block_name);
            match (members.first(), members.last()) {
                (Some(first), Some(last)) => {
                    let (first, last) = (first.name.clone(), last.name.clone());
                    if let Some(block) = self.blocks.get_mut(&block_name) {
                        block.first = first;
                        block.last = last;
                    }
                }
                _ => {
                    self.blocks.shift_remove(&block_name);
                }
            }
        }
        self.key.retain(|k| k != name);
        self.bump();
        Ok(attribute)
    }

    /// Groups a contiguous, previously unblocked run of attributes into a
    /// sparse block. Members get default var keys, the attribute name for
    /// symbol keys and the 1-based position for continuous keys.
    pub fn create_attribute_block(
        &mut self,
        name: impl Into<Symbol>,
        first: &Symbol,
        last: &Symbol,
        var_key_kind: VarKeyKind,
    ) -> Result<()> {
        let name = name.into();
        self.check_name_free(&name)?;
        let block_err = |message: &str| Error::BlockStructure {
            class: self.name.clone(),
            block: name.clone(),
            message: message.to_string(),
        };
        if var_key_kind == VarKeyKind::None {
            return Err(block_err("a block requires a var-key kind"));
        }
        let first_index = self
            .attributes
            .get_index_of(first)
            .ok_or_else(|| Error::UnknownAttribute {
                class: self.name.clone(),
                name: first.clone(),
            })?;
        let last_index = self
            .attributes
            .get_index_of(last)
            .ok_or_else(|| Error::UnknownAttribute {
                class: self.name.clone(),
                name: last.clone(),
            })?;
        if first_index > last_index {
            return Err(block_err("first attribute comes after last"));
        }
        for i in first_index..=last_index {
            let (_, attr) = self.attributes.get_index(i).unwrap_or_else(|| unreachable!());
            if attr.block().is_some() {
                return Err(block_err("attribute already belongs to a block"));
            }
        }
        for offset in 0..=(last_index - first_index) {
            let i = first_index + offset;
            if let Some((_, attr)) = self.attributes.get_index_mut(i) {
                attr.block = Some(name.clone());
                attr.var_key = Some(match var_key_kind {
                    VarKeyKind::Continuous => VarKey::Continuous(offset as i64 + 1),
                    _ => VarKey::Symbol(attr.name.clone()),
                });
            }
        }
        self.blocks.insert(
            name.clone(),
            AttributeBlock::new(name, first.clone(), last.clone(), var_key_kind),
        );
        self.bump();
        Ok(())
    }

    /// Overrides the sparse key of one block member.
    pub fn set_var_key(&mut self, attribute: &Symbol, var_key: VarKey) -> Result<()> {
        let attr = self
            .attributes
            .get(attribute)
            .ok_or_else(|| Error::UnknownAttribute {
                class: self.name.clone(),
                name: attribute.clone(),
            })?;
        let block_name = attr.block().cloned().ok_or_else(|| Error::BlockStructure {
            class: self.name.clone(),
            block: attribute.clone(),
            message: "attribute belongs to no block".to_string(),
        })?;
        let kind = self.blocks[&block_name].var_key_kind;
        if var_key.kind() != kind {
            return Err(Error::BlockStructure {
                class: self.name.clone(),
                block: block_name,
                message: format!("var key {var_key} does not match block key kind"),
            });
        }
        if let Some(attr) = self.attributes.get_mut(attribute) {
            attr.var_key = Some(var_key);
        }
        self.bump();
        Ok(())
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some() && self.index_freshness == self.freshness
    }

    pub fn index(&self) -> Option<&ClassIndex> {
        if self.is_indexed() {
            self.index.as_ref()
        } else {
            None
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
            .as_ref()
            .is_some_and(|c| c.generation == self.freshness)
    }

    pub fn compiled(&self) -> Option<&Rc<CompiledClass>> {
        if self.is_compiled() {
            self.compiled.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn install_index(&mut self, index: ClassIndex) {
        self.index = Some(index);
        self.index_freshness = self.freshness;
    }

    pub(crate) fn install_compiled(&mut self, compiled: Rc<CompiledClass>) {
        self.compiled = Some(compiled);
    }

    /// One pass over the attribute list deriving the per-category name
    /// arrays and the dense/sparse load-index layout. Pure; the domain
    /// installs the result while freshness is unchanged.
    ///
    /// Layout: loaded dense attributes and loaded blocks take consecutive
    /// dense slots in attribute order; loaded block members take
    /// consecutive sparse positions within their block; native included
    /// relation attributes outside the loaded set are appended as internal
    /// dense slots (still tracked for ownership and mutation).
    pub fn build_index(&self, domain: &ClassDomain) -> ClassIndex {
        let mut index = ClassIndex::default();
        let mut next_dense: u32 = 0;
        let mut block_slots: IndexMap<Symbol, u32> = IndexMap::new();
        let mut sparse_next: IndexMap<Symbol, u32> = IndexMap::new();

        for attr in self.attributes.values() {
            if attr.used {
                index.used.push(attr.name.clone());
            }
            // a member of an unloaded block has no slot either
            let block_loaded = attr
                .block()
                .is_none_or(|b| self.blocks.get(b).is_some_and(|blk| blk.loaded));
            let in_layout = attr.used && attr.loaded && block_loaded;
            if in_layout {
                index.loaded.push(attr.name.clone());
                if attr.kind().is_relation() {
                    index.loaded_relation.push(attr.name.clone());
                }
            }
            if attr.is_native_included_relation() {
                index.native_relation.push(attr.name.clone());
            }
            match attr.block() {
                Some(block_name) => {
                    if in_layout {
                        let slot = *block_slots.entry(block_name.clone()).or_insert_with(|| {
                            let slot = next_dense;
                            next_dense += 1;
                            index.loaded_blocks.push(block_name.clone());
                            index
                                .block_index
                                .insert(block_name.clone(), LoadIndex::dense(slot));
                            slot
                        });
                        let position = sparse_next.entry(block_name.clone()).or_insert(0);
                        index
                            .attribute_index
                            .insert(attr.name.clone(), LoadIndex::sparse(slot, *position));
                        *position += 1;
                    }
                }
                None => {
                    if in_layout {
                        index
                            .attribute_index
                            .insert(attr.name.clone(), LoadIndex::dense(next_dense));
                        index.loaded_dense.push(attr.name.clone());
                        next_dense += 1;
                    }
                }
            }
        }

        // internal slots keep unloaded owned sub-records reachable
        for attr in self.attributes.values() {
            if attr.is_native_included_relation()
                && !index.attribute_index.contains_key(&attr.name)
            {
                index
                    .attribute_index
                    .insert(attr.name.clone(), LoadIndex::dense(next_dense));
                next_dense += 1;
                index.internal_count += 1;
            }
        }
        index.slot_count = next_dense;
        index.is_unique = self.root || !index.native_relation.is_empty();
        index.is_key_based_storable = self.key_based_storable(domain);

        debug!(
            class = %self.name,
            slots = index.slot_count,
            internal = index.internal_count,
            "indexed class"
        );
        index
    }

    /// True when the native composition graph below this class is acyclic
    /// and key lengths never decrease with composition depth.
    fn key_based_storable(&self, domain: &ClassDomain) -> bool {
        let mut state = vec![VisitState::White; domain.len()];
        self.storable_visit(domain, &mut state)
    }

    fn storable_visit(&self, domain: &ClassDomain, state: &mut [VisitState]) -> bool {
        let slot = domain.index_of(&self.name);
        if let Some(slot) = slot {
            match state[slot] {
                VisitState::Grey => return false,
                VisitState::Black => return true,
                VisitState::White => state[slot] = VisitState::Grey,
            }
        }
        let mut ok = true;
        for attr in self.attributes.values() {
            if !attr.is_native_included_relation() {
                continue;
            }
            let target = attr
                .target_class
                .as_ref()
                .and_then(|name| domain.get(name));
            if let Some(target) = target {
                if target.key.len() < self.key.len() {
                    ok = false;
                }
                if !target.storable_visit(domain, state) {
                    ok = false;
                }
            }
        }
        if let Some(slot) = slot {
            state[slot] = VisitState::Black;
        }
        ok
    }

    /// Full structural validation; accumulates diagnostics, never panics.
    pub fn check(&self, domain: &ClassDomain, sink: &mut DiagnosticSink) -> bool {
        let entity = format!("class {}", self.name);
        let mut ok = true;

        if !is_identifier(self.name.as_str()) {
            sink.error(&entity, format!("invalid class name '{}'", self.name));
            ok = false;
        }
        for key in &self.key {
            match self.attributes.get(key) {
                Some(attr) if attr.kind() == ValueKind::Symbol => {}
                Some(attr) => {
                    sink.error(
                        &entity,
                        format!("key attribute {key} is {}, keys are Symbol", attr.kind().name()),
                    );
                    ok = false;
                }
                None => {
                    sink.error(&entity, format!("key names unknown attribute {key}"));
                    ok = false;
                }
            }
        }
        for attr in self.attributes.values() {
            if !attr.check(&self.name, sink) {
                ok = false;
            }
            if !self.check_relation_target(attr, domain, sink) {
                ok = false;
            }
        }
        for block in self.blocks.values() {
            if !self.check_block_structure(block, sink) {
                ok = false;
            }
        }
        if !self.check_native_cycle(domain, sink) {
            ok = false;
        }
        if !self.check_rules(domain, sink) {
            ok = false;
        }
        ok
    }

    fn check_relation_target(
        &self,
        attr: &Attribute,
        domain: &ClassDomain,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let target_name = match &attr.target_class {
            Some(name) => name,
            None => return true,
        };
        let entity = format!("class {} attribute {}", self.name, attr.name);
        let target = match domain.get(target_name) {
            Some(class) => class,
            None => {
                sink.error(&entity, format!("unknown target class {target_name}"));
                return false;
            }
        };
        let mut ok = true;
        if attr.reference && !target.root {
            sink.error(
                &entity,
                format!("referenced target class {target_name} must be a root class"),
            );
            ok = false;
        }
        if !attr.reference && target.root {
            sink.error(
                &entity,
                format!("included target class {target_name} must not be a root class"),
            );
            ok = false;
        }
        if attr.is_native_included_relation() && target.key.len() < self.key.len() {
            sink.error(
                &entity,
                format!(
                    "target class {target_name} key length {} below owner key length {}",
                    target.key.len(),
                    self.key.len()
                ),
            );
            ok = false;
        }
        ok
    }

    fn check_block_structure(&self, block: &AttributeBlock, sink: &mut DiagnosticSink) -> bool {
        let entity = format!("class {} block {}", self.name, block.name);
        let members = self.block_members(&block.name);
        if members.is_empty() {
            sink.error(&entity, "block has no member attributes");
            return false;
        }
        let mut ok = true;
        // contiguity in the attribute list
        let first_index = self.attributes.get_index_of(&members[0].name);
        if let Some(start) = first_index {
            for (offset, member) in members.iter().enumerate() {
                if self.attributes.get_index_of(&member.name) != Some(start + offset) {
                    sink.error(&entity, "block members are not contiguous");
                    ok = false;
                    break;
                }
            }
        }
        let member_kind = members[0].kind();
        if member_kind.block_kind().is_none() {
            sink.error(
                &entity,
                format!("kind {} cannot form a block", member_kind.name()),
            );
            ok = false;
        }
        let mut seen = Vec::with_capacity(members.len());
        for member in &members {
            if member.kind() != member_kind {
                sink.error(
                    &entity,
                    format!("member {} kind differs from the block's", member.name),
                );
                ok = false;
            }
            match member.var_key() {
                Some(var_key) if var_key.kind() == block.var_key_kind => {
                    if seen.contains(&var_key) {
                        sink.error(&entity, format!("duplicate var key {var_key}"));
                        ok = false;
                    }
                    seen.push(var_key);
                }
                Some(var_key) => {
                    sink.error(
                        &entity,
                        format!("member {} var key {var_key} has the wrong kind", member.name),
                    );
                    ok = false;
                }
                None => {
                    sink.error(&entity, format!("member {} has no var key", member.name));
                    ok = false;
                }
            }
        }
        if !block.check(&self.name, member_kind, sink) {
            ok = false;
        }
        ok
    }

    fn check_native_cycle(&self, domain: &ClassDomain, sink: &mut DiagnosticSink) -> bool {
        let mut state = vec![VisitState::White; domain.len()];
        if !self.native_cycle_visit(domain, &mut state) {
            sink.error(
                format!("class {}", self.name),
                "cyclic native composition",
            );
            return false;
        }
        true
    }

    fn native_cycle_visit(&self, domain: &ClassDomain, state: &mut [VisitState]) -> bool {
        let slot = match domain.index_of(&self.name) {
            Some(slot) => slot,
            None => return true,
        };
        match state[slot] {
            VisitState::Grey => return false,
            VisitState::Black => return true,
            VisitState::White => state[slot] = VisitState::Grey,
        }
        for attr in self.attributes.values() {
            if !attr.is_native_included_relation() {
                continue;
            }
            let target = attr
                .target_class
                .as_ref()
                .and_then(|name| domain.get(name));
            if let Some(target) = target {
                if !target.native_cycle_visit(domain, state) {
                    return false;
                }
            }
        }
        state[slot] = VisitState::Black;
        true
    }

    fn check_rules(&self, domain: &ClassDomain, sink: &mut DiagnosticSink) -> bool {
        let mut ok = true;
        for attr in self.attributes.values() {
            if let Some(rule) = attr.rule() {
                if !self.check_one_rule(rule, domain, sink) {
                    ok = false;
                }
            }
        }
        for block in self.blocks.values() {
            if let Some(rule) = block.rule() {
                if !self.check_one_rule(rule, domain, sink) {
                    ok = false;
                }
            }
        }
        ok
    }

    fn check_one_rule(
        &self,
        rule: &crate::rule::DerivationRule,
        domain: &ClassDomain,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let mut ok = rule.check_definition(sink);
        match registry::lookup(&rule.name) {
            Some(prototype) => {
                if !rule.check_family(&prototype, sink) {
                    ok = false;
                }
            }
            None => {
                sink.error(
                    format!("rule {}", rule.name),
                    "derivation rule is not registered",
                );
                ok = false;
            }
        }
        let mut scope = Vec::new();
        if !rule.check_completeness(self, domain, &mut scope, sink) {
            ok = false;
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

/// Indexed layout of a class: per-category attribute arrays and the
/// dense/sparse load-index assignment.
#[derive(Debug, Clone, Default)]
pub struct ClassIndex {
    pub used: Vec<Symbol>,
    pub loaded: Vec<Symbol>,
    pub loaded_dense: Vec<Symbol>,
    pub loaded_blocks: Vec<Symbol>,
    pub loaded_relation: Vec<Symbol>,
    /// Native included relation attributes, loaded or not.
    pub native_relation: Vec<Symbol>,
    pub is_unique: bool,
    pub is_key_based_storable: bool,
    pub slot_count: u32,
    /// Trailing dense slots holding unloaded owned sub-records.
    pub internal_count: u32,
    attribute_index: IndexMap<Symbol, LoadIndex>,
    block_index: IndexMap<Symbol, LoadIndex>,
}

impl ClassIndex {
    pub fn attribute_load_index(&self, name: &Symbol) -> Option<LoadIndex> {
        self.attribute_index.get(name).copied()
    }

    pub fn block_load_index(&self, name: &Symbol) -> Option<LoadIndex> {
        self.block_index.get(name).copied()
    }

    /// Load index of an attribute or a block.
    pub fn load_index(&self, name: &Symbol) -> Option<LoadIndex> {
        self.attribute_load_index(name)
            .or_else(|| self.block_load_index(name))
    }
}
