//! Object instances
//!
//! An [`Instance`] is one record of a compiled class: a slot vector sized
//! to the class layout, native values written directly, derived values
//! computed lazily on first read and cached until the instance is cleaned
//! or mutated. Sub-records are held through [`ObjectHandle`]s; owned ones
//! drop with their parent, referenced ones never do.
//!
//! Contract violations (wrong kind at a load index, writing a derived
//! slot, mutating into an incompatible class) panic. Missing data is a
//! value, never an error.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::trace;

use tabula_types::{Continuous, Date, LoadIndex, Symbol, Time, Timestamp};

use crate::block::{ContinuousValueBlock, ObjectArrayValueBlock, SymbolValueBlock};
use crate::compile::{CompiledClass, CompiledSlot};
use crate::eval::EvalContext;
use crate::value::{ObjectHandle, Value};

/// One storage slot: a concrete value, or a derived value not yet
/// computed.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Uncomputed,
    Value(Value),
}

/// One record of a compiled class.
pub struct Instance {
    class: RefCell<Rc<CompiledClass>>,
    creation_index: u64,
    slots: RefCell<Vec<Slot>>,
    /// Owned sub-records kept through a narrowing mutation, by attribute
    /// name.
    retained: RefCell<IndexMap<Symbol, Value>>,
    me: Weak<Instance>,
}

macro_rules! typed_slot_accessors {
    ($compute:ident, $get:ident, $set:ident, $variant:ident, $ty:ty) => {
        pub fn $compute(&self, load_index: LoadIndex) -> $ty {
            match self.compute_value_at(load_index) {
                Value::$variant(v) => v,
                other => self.kind_panic(load_index, stringify!($variant), &other),
            }
        }

        pub fn $get(&self, load_index: LoadIndex) -> $ty {
            match self.get_value_at(load_index) {
                Value::$variant(v) => v,
                other => self.kind_panic(load_index, stringify!($variant), &other),
            }
        }

        pub fn $set(&self, load_index: LoadIndex, value: $ty) {
            self.set_value_at(load_index, Value::$variant(value));
        }
    };
}

impl Instance {
    /// Creates a record against a compiled class. `creation_index` must be
    /// strictly positive and caller-unique; pseudo-random derivation rules
    /// seed from it so re-reads of the same source reproduce.
    pub fn new(class: Rc<CompiledClass>, creation_index: u64) -> Rc<Instance> {
        assert!(creation_index > 0, "creation index must be strictly positive");
        let slots = class
            .slots()
            .iter()
            .map(|slot| {
                if slot.is_derived() {
                    Slot::Uncomputed
                } else {
                    Slot::Value(Value::missing(slot.kind()))
                }
            })
            .collect();
        Rc::new_cyclic(|me| Instance {
            class: RefCell::new(class),
            creation_index,
            slots: RefCell::new(slots),
            retained: RefCell::new(IndexMap::new()),
            me: me.clone(),
        })
    }

    pub fn class(&self) -> Rc<CompiledClass> {
        self.class.borrow().clone()
    }

    pub fn creation_index(&self) -> u64 {
        self.creation_index
    }

    fn kind_panic(&self, load_index: LoadIndex, expected: &str, got: &Value) -> ! {
        panic!(
            "class {} slot {}: expected {expected}, got {}",
            self.class.borrow().name,
            load_index,
            got.kind().name()
        )
    }

    /// Cached read or lazy computation. Sparse indices force the whole
    /// block once and read the position out of it, with the kind's default
    /// for absent keys.
    pub fn compute_value_at(&self, load_index: LoadIndex) -> Value {
        match load_index.sparse_index() {
            Some(position) => match self.force_slot(load_index.block()) {
                Value::ContinuousBlock(b) => Value::Continuous(b.value_at(position)),
                Value::SymbolBlock(b) => Value::Symbol(b.value_at(position)),
                Value::ObjectArrayBlock(b) => Value::ObjectArray(b.value_at(position)),
                other => self.kind_panic(load_index, "a block", &other),
            },
            None => self.force_slot(load_index),
        }
    }

    fn force_slot(&self, load_index: LoadIndex) -> Value {
        let index = load_index.dense_index();
        {
            let slots = self.slots.borrow();
            if let Slot::Value(value) = &slots[index] {
                return value.clone();
            }
        }
        // slot borrow dropped: the rule may recurse into this instance
        let class = self.class();
        let rule = match class.slots()[index].rule() {
            Some(rule) => rule.clone(),
            None => panic!(
                "class {} slot {} is uncomputed but has no rule",
                class.name, load_index
            ),
        };
        let me = self
            .me
            .upgrade()
            .unwrap_or_else(|| panic!("instance evaluated outside its Rc"));
        trace!(class = %class.name, slot = %load_index, rule = %rule.name, "computing slot");
        let mut ctx = EvalContext::rooted(me);
        let value = rule.compute_value(&mut ctx);
        debug_assert_eq!(value.kind(), class.slots()[index].kind());
        self.slots.borrow_mut()[index] = Slot::Value(value.clone());
        value
    }

    /// Direct cached read; an uncomputed slot is a caller error.
    pub fn get_value_at(&self, load_index: LoadIndex) -> Value {
        match load_index.sparse_index() {
            Some(position) => {
                let block = self.get_value_at(load_index.block());
                match block {
                    Value::ContinuousBlock(b) => Value::Continuous(b.value_at(position)),
                    Value::SymbolBlock(b) => Value::Symbol(b.value_at(position)),
                    Value::ObjectArrayBlock(b) => Value::ObjectArray(b.value_at(position)),
                    other => self.kind_panic(load_index, "a block", &other),
                }
            }
            None => {
                let slots = self.slots.borrow();
                match &slots[load_index.dense_index()] {
                    Slot::Value(value) => value.clone(),
                    Slot::Uncomputed => panic!(
                        "class {} slot {} read before computation",
                        self.class.borrow().name,
                        load_index
                    ),
                }
            }
        }
    }

    /// Direct write, native slots only.
    pub fn set_value_at(&self, load_index: LoadIndex, value: Value) {
        assert!(load_index.is_dense(), "sparse slots are written as whole blocks");
        let class = self.class();
        let slot = class.slot(load_index);
        assert!(
            !slot.is_derived(),
            "class {} slot {} is derived, not writable",
            class.name,
            slot.name()
        );
        if value.kind() != slot.kind() {
            self.kind_panic(load_index, slot.kind().name(), &value);
        }
        self.slots.borrow_mut()[load_index.dense_index()] = Slot::Value(value);
    }

    typed_slot_accessors!(
        compute_continuous_at,
        get_continuous_at,
        set_continuous_at,
        Continuous,
        Continuous
    );
    typed_slot_accessors!(compute_symbol_at, get_symbol_at, set_symbol_at, Symbol, Symbol);
    typed_slot_accessors!(compute_date_at, get_date_at, set_date_at, Date, Date);
    typed_slot_accessors!(compute_time_at, get_time_at, set_time_at, Time, Time);
    typed_slot_accessors!(
        compute_timestamp_at,
        get_timestamp_at,
        set_timestamp_at,
        Timestamp,
        Timestamp
    );
    typed_slot_accessors!(compute_text_at, get_text_at, set_text_at, Text, String);
    typed_slot_accessors!(
        compute_object_at,
        get_object_at,
        set_object_at,
        Object,
        Option<ObjectHandle>
    );
    typed_slot_accessors!(
        compute_object_array_at,
        get_object_array_at,
        set_object_array_at,
        ObjectArray,
        Vec<ObjectHandle>
    );
    typed_slot_accessors!(
        compute_continuous_block_at,
        get_continuous_block_at,
        set_continuous_block_at,
        ContinuousBlock,
        Rc<ContinuousValueBlock>
    );
    typed_slot_accessors!(
        compute_symbol_block_at,
        get_symbol_block_at,
        set_symbol_block_at,
        SymbolBlock,
        Rc<SymbolValueBlock>
    );
    typed_slot_accessors!(
        compute_object_array_block_at,
        get_object_array_block_at,
        set_object_array_block_at,
        ObjectArrayBlock,
        Rc<ObjectArrayValueBlock>
    );

    /// Resets every derived slot to uncomputed.
    pub fn clean_derived(&self) {
        let class = self.class();
        let mut slots = self.slots.borrow_mut();
        for (slot, compiled) in slots.iter_mut().zip(class.slots()) {
            if compiled.is_derived() {
                *slot = Slot::Uncomputed;
            }
        }
    }

    /// Forces every slot, recursing into owned sub-records. On budget
    /// overrun, derived slots are cleaned back to uncomputed and `false`
    /// is returned.
    pub fn compute_all_values(&self, guard: &mut MemoryGuard) -> bool {
        let class = self.class();
        for index in 0..class.slot_count() {
            let load_index = LoadIndex::dense(index as u32);
            let value = self.compute_value_at(load_index);
            if !guard.add(value.estimated_size()) {
                self.clean_derived();
                return false;
            }
            let sub_ok = match &value {
                Value::Object(Some(handle)) if handle.is_owned() => {
                    handle.instance().compute_all_values(guard)
                }
                Value::ObjectArray(handles) => handles
                    .iter()
                    .filter(|h| h.is_owned())
                    .all(|h| h.instance().compute_all_values(guard)),
                Value::ObjectArrayBlock(block) => block
                    .iter()
                    .flat_map(|(_, handles)| handles.iter())
                    .filter(|h| h.is_owned())
                    .all(|h| h.instance().compute_all_values(guard)),
                _ => true,
            };
            if !sub_ok {
                self.clean_derived();
                return false;
            }
        }
        true
    }

    /// Owned sub-record values preserved through a narrowing mutation.
    pub fn retained_value(&self, name: &Symbol) -> Option<Value> {
        self.retained.borrow().get(name).cloned()
    }

    /// Re-points this record onto a structurally compatible narrower
    /// class: same class name, slot count no larger, kept slots
    /// prefix-compatible by name and kind. Cached values transfer
    /// verbatim; dropped owned sub-records named in `keep` move to the
    /// retained map and are freed exactly once otherwise; narrowed blocks
    /// shrink to the kept sparse prefix; owned sub-records mutate
    /// recursively through `class_map`.
    pub fn mutate(
        &self,
        new_class: &Rc<CompiledClass>,
        class_map: &IndexMap<Symbol, Rc<CompiledClass>>,
        keep: &[Symbol],
    ) {
        let old_class = self.class();
        assert_eq!(
            old_class.name, new_class.name,
            "mutation must stay within one class name"
        );
        let new_count = new_class.slot_count();
        let mut slots = self.slots.borrow_mut();
        assert!(
            new_count <= slots.len(),
            "class {}: mutation cannot widen the layout",
            new_class.name
        );
        for index in 0..new_count {
            let old_slot = &old_class.slots()[index];
            let new_slot = &new_class.slots()[index];
            assert!(
                old_slot.name() == new_slot.name() && old_slot.kind() == new_slot.kind(),
                "class {} slot {index}: {} {} is not prefix-compatible with {} {}",
                new_class.name,
                old_slot.name(),
                old_slot.kind().name(),
                new_slot.name(),
                new_slot.kind().name()
            );
        }

        let dropped: Vec<Slot> = slots.drain(new_count..).collect();
        for (offset, slot) in dropped.into_iter().enumerate() {
            let name = old_class.slots()[new_count + offset].name().clone();
            if let Slot::Value(value) = slot {
                let holds_owned = match &value {
                    Value::Object(Some(handle)) => handle.is_owned(),
                    Value::ObjectArray(handles) => handles.iter().any(|h| h.is_owned()),
                    _ => false,
                };
                if holds_owned && keep.contains(&name) {
                    self.retained.borrow_mut().insert(name, value);
                }
                // otherwise the value drops here, freeing owned
                // sub-records exactly once through their Rc
            }
        }

        for index in 0..new_count {
            match &new_class.slots()[index] {
                CompiledSlot::Block(new_block) => {
                    let old_block = match &old_class.slots()[index] {
                        CompiledSlot::Block(b) => b,
                        CompiledSlot::Attribute(_) => continue,
                    };
                    if new_block.attrs.len() < old_block.attrs.len() {
                        let limit = new_block.attrs.len() as u32;
                        if let Slot::Value(value) = &mut slots[index] {
                            *value = match &*value {
                                Value::ContinuousBlock(b) => {
                                    Value::ContinuousBlock(Rc::new(b.shrink(limit)))
                                }
                                Value::SymbolBlock(b) => {
                                    Value::SymbolBlock(Rc::new(b.shrink(limit)))
                                }
                                Value::ObjectArrayBlock(b) => {
                                    Value::ObjectArrayBlock(Rc::new(b.shrink(limit)))
                                }
                                other => other.clone(),
                            };
                        }
                    }
                    // sub-records held through the block follow the class map
                    if let Slot::Value(Value::ObjectArrayBlock(block)) = &slots[index] {
                        for (position, handles) in block.iter() {
                            let target = new_block
                                .attrs
                                .iter()
                                .find(|a| a.sparse == position)
                                .and_then(|a| a.target_class.as_ref())
                                .and_then(|name| class_map.get(name));
                            if let Some(target) = target {
                                for handle in handles.iter().filter(|h| h.is_owned()) {
                                    handle.instance().mutate(target, class_map, keep);
                                }
                            }
                        }
                    }
                }
                CompiledSlot::Attribute(attr) => {
                    if !attr.kind.is_relation() || attr.reference {
                        continue;
                    }
                    let target = attr
                        .target_class
                        .as_ref()
                        .and_then(|name| class_map.get(name));
                    let target = match target {
                        Some(target) => target,
                        None => continue,
                    };
                    if let Slot::Value(value) = &slots[index] {
                        match value {
                            Value::Object(Some(handle)) if handle.is_owned() => {
                                handle.instance().mutate(target, class_map, keep);
                            }
                            Value::ObjectArray(handles) => {
                                for handle in handles.iter().filter(|h| h.is_owned()) {
                                    handle.instance().mutate(target, class_map, keep);
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        drop(slots);
        *self.class.borrow_mut() = new_class.clone();
        trace!(class = %new_class.name, index = self.creation_index, "mutated instance");
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.borrow().name)
            .field("creation_index", &self.creation_index)
            .finish_non_exhaustive()
    }
}

/// Memory budget for [`Instance::compute_all_values`].
#[derive(Debug, Default)]
pub struct MemoryGuard {
    limit: Option<usize>,
    used: usize,
}

impl MemoryGuard {
    pub fn limited(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            used: 0,
        }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Accounts one value; `false` once the budget is exceeded.
    pub fn add(&mut self, size: usize) -> bool {
        self.used += size;
        self.limit.is_none_or(|limit| self.used <= limit)
    }

    pub fn used(&self) -> usize {
        self.used
    }
}
