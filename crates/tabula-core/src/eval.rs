//! Rule evaluation
//!
//! Evaluation is single-threaded, synchronous and recursive: reading a
//! derived slot roots an [`EvalContext`] at the instance, runs the compiled
//! rule body, and may recurse into other slots or owned sub-records.
//!
//! A multiple-scope rule brackets its inner iteration with
//! [`CompiledRule::open_scope`] and [`CompiledRule::close_scope`]. Opening
//! a scope evaluates the operands registered on the rule's frame against
//! the main-scope record, in reverse registration order, and caches them;
//! the body then swaps the frame's current record per sub-object. Operands
//! compiled to an upper-scope reference read those caches.

use std::any::Any;
use std::rc::Rc;

use tabula_types::{Continuous, Date, Symbol, Time, Timestamp, ValueKind};

use crate::block::{ContinuousValueBlock, ObjectArrayValueBlock, SymbolValueBlock};
use crate::compile::{CompiledOperand, CompiledRule, OperandSource};
use crate::object::Instance;
use crate::value::{ObjectHandle, Value};

/// One scope frame: the record operands resolve against, plus the cache of
/// upper-scope operand values registered on this frame.
pub struct EvalFrame {
    pub current: Rc<Instance>,
    pub cache: Vec<Value>,
}

/// Call-stack state of one evaluation. Never shared; a fresh context is
/// rooted per derived-slot computation.
pub struct EvalContext {
    frames: Vec<EvalFrame>,
}

impl EvalContext {
    pub fn rooted(instance: Rc<Instance>) -> Self {
        Self {
            frames: vec![EvalFrame {
                current: instance,
                cache: Vec::new(),
            }],
        }
    }

    /// Record the bottom-most scope evaluates against.
    pub fn current(&self) -> &Rc<Instance> {
        &self
            .frames
            .last()
            .unwrap_or_else(|| panic!("evaluation context has no frame"))
            .current
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Behavior of a derivation rule family.
///
/// A body implements exactly the method matching its declared result kind;
/// the defaults panic, which marks a definition bug (result kind and body
/// disagree), not a data problem. Missing or invalid inputs flow through as
/// sentinel values, never as errors.
#[allow(unused_variables)]
pub trait RuleBody: Send + Sync {
    fn compute_continuous(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Continuous {
        panic!("rule {} does not produce Continuous", rule.name)
    }

    fn compute_symbol(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Symbol {
        panic!("rule {} does not produce Symbol", rule.name)
    }

    fn compute_date(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Date {
        panic!("rule {} does not produce Date", rule.name)
    }

    fn compute_time(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Time {
        panic!("rule {} does not produce Time", rule.name)
    }

    fn compute_timestamp(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Timestamp {
        panic!("rule {} does not produce Timestamp", rule.name)
    }

    fn compute_text(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> String {
        panic!("rule {} does not produce Text", rule.name)
    }

    fn compute_object(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Option<ObjectHandle> {
        panic!("rule {} does not produce Object", rule.name)
    }

    fn compute_object_array(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Vec<ObjectHandle> {
        panic!("rule {} does not produce ObjectArray", rule.name)
    }

    fn compute_structure(&self, rule: &CompiledRule, ctx: &mut EvalContext) -> Option<Rc<dyn Any>> {
        panic!("rule {} does not produce Structure", rule.name)
    }

    fn compute_continuous_block(
        &self,
        rule: &CompiledRule,
        ctx: &mut EvalContext,
    ) -> Rc<ContinuousValueBlock> {
        panic!("rule {} does not produce ContinuousBlock", rule.name)
    }

    fn compute_symbol_block(
        &self,
        rule: &CompiledRule,
        ctx: &mut EvalContext,
    ) -> Rc<SymbolValueBlock> {
        panic!("rule {} does not produce SymbolBlock", rule.name)
    }

    fn compute_object_array_block(
        &self,
        rule: &CompiledRule,
        ctx: &mut EvalContext,
    ) -> Rc<ObjectArrayValueBlock> {
        panic!("rule {} does not produce ObjectArrayBlock", rule.name)
    }
}

/// Placeholder body for prototypes under test; every compute panics.
pub struct NoBody;

impl RuleBody for NoBody {}

impl CompiledRule {
    /// Runs the body variant matching the declared result kind and wraps
    /// the result.
    pub fn compute_value(&self, ctx: &mut EvalContext) -> Value {
        let body = self.body.clone();
        match self.result_kind {
            ValueKind::Continuous => Value::Continuous(body.compute_continuous(self, ctx)),
            ValueKind::Symbol => Value::Symbol(body.compute_symbol(self, ctx)),
            ValueKind::Date => Value::Date(body.compute_date(self, ctx)),
            ValueKind::Time => Value::Time(body.compute_time(self, ctx)),
            ValueKind::Timestamp => Value::Timestamp(body.compute_timestamp(self, ctx)),
            ValueKind::Text => Value::Text(body.compute_text(self, ctx)),
            ValueKind::Object => Value::Object(body.compute_object(self, ctx)),
            ValueKind::ObjectArray => Value::ObjectArray(body.compute_object_array(self, ctx)),
            ValueKind::Structure => Value::Structure(body.compute_structure(self, ctx)),
            ValueKind::ContinuousBlock => {
                Value::ContinuousBlock(body.compute_continuous_block(self, ctx))
            }
            ValueKind::SymbolBlock => Value::SymbolBlock(body.compute_symbol_block(self, ctx)),
            ValueKind::ObjectArrayBlock => {
                Value::ObjectArrayBlock(body.compute_object_array_block(self, ctx))
            }
        }
    }

    /// Evaluates one operand to a value.
    pub fn eval_operand(&self, index: usize, ctx: &mut EvalContext) -> Value {
        eval_source(&self.operands[index], ctx)
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    pub fn operand_continuous(&self, index: usize, ctx: &mut EvalContext) -> Continuous {
        match self.eval_operand(index, ctx) {
            Value::Continuous(v) => v,
            other => self.operand_kind_panic(index, ValueKind::Continuous, &other),
        }
    }

    pub fn operand_symbol(&self, index: usize, ctx: &mut EvalContext) -> Symbol {
        match self.eval_operand(index, ctx) {
            Value::Symbol(v) => v,
            other => self.operand_kind_panic(index, ValueKind::Symbol, &other),
        }
    }

    pub fn operand_date(&self, index: usize, ctx: &mut EvalContext) -> Date {
        match self.eval_operand(index, ctx) {
            Value::Date(v) => v,
            other => self.operand_kind_panic(index, ValueKind::Date, &other),
        }
    }

    pub fn operand_time(&self, index: usize, ctx: &mut EvalContext) -> Time {
        match self.eval_operand(index, ctx) {
            Value::Time(v) => v,
            other => self.operand_kind_panic(index, ValueKind::Time, &other),
        }
    }

    pub fn operand_timestamp(&self, index: usize, ctx: &mut EvalContext) -> Timestamp {
        match self.eval_operand(index, ctx) {
            Value::Timestamp(v) => v,
            other => self.operand_kind_panic(index, ValueKind::Timestamp, &other),
        }
    }

    pub fn operand_text(&self, index: usize, ctx: &mut EvalContext) -> String {
        match self.eval_operand(index, ctx) {
            Value::Text(v) => v,
            other => self.operand_kind_panic(index, ValueKind::Text, &other),
        }
    }

    pub fn operand_object(&self, index: usize, ctx: &mut EvalContext) -> Option<ObjectHandle> {
        match self.eval_operand(index, ctx) {
            Value::Object(v) => v,
            other => self.operand_kind_panic(index, ValueKind::Object, &other),
        }
    }

    pub fn operand_object_array(&self, index: usize, ctx: &mut EvalContext) -> Vec<ObjectHandle> {
        match self.eval_operand(index, ctx) {
            Value::ObjectArray(v) => v,
            other => self.operand_kind_panic(index, ValueKind::ObjectArray, &other),
        }
    }

    pub fn operand_continuous_block(
        &self,
        index: usize,
        ctx: &mut EvalContext,
    ) -> Rc<ContinuousValueBlock> {
        match self.eval_operand(index, ctx) {
            Value::ContinuousBlock(v) => v,
            other => self.operand_kind_panic(index, ValueKind::ContinuousBlock, &other),
        }
    }

    pub fn operand_symbol_block(
        &self,
        index: usize,
        ctx: &mut EvalContext,
    ) -> Rc<SymbolValueBlock> {
        match self.eval_operand(index, ctx) {
            Value::SymbolBlock(v) => v,
            other => self.operand_kind_panic(index, ValueKind::SymbolBlock, &other),
        }
    }

    fn operand_kind_panic(&self, index: usize, expected: ValueKind, got: &Value) -> ! {
        panic!(
            "rule {} operand {}: expected {}, got {}",
            self.name,
            index + 1,
            expected.name(),
            got.kind().name()
        )
    }

    /// Opens this rule's scope frame: evaluates the registered secondary
    /// operands against the current main-scope record, in reverse
    /// registration order, and pushes the frame carrying their cache.
    /// The frame's current record starts as the main-scope record; the
    /// body swaps it per sub-object with [`CompiledRule::set_scope_object`].
    pub fn open_scope(&self, ctx: &mut EvalContext) {
        let mut cache: Vec<Value> = self
            .secondary
            .iter()
            .map(|op| Value::missing(op.kind))
            .collect();
        for (slot, operand) in self.secondary.iter().enumerate().rev() {
            cache[slot] = eval_source(operand, ctx);
        }
        let current = ctx.current().clone();
        ctx.frames.push(EvalFrame { current, cache });
    }

    /// Points the open scope frame at one sub-record of the inner scope.
    pub fn set_scope_object(&self, ctx: &mut EvalContext, object: Rc<Instance>) {
        let frame = ctx
            .frames
            .last_mut()
            .unwrap_or_else(|| panic!("set_scope_object with no open scope"));
        frame.current = object;
    }

    /// Pops this rule's scope frame, dropping the secondary cache.
    pub fn close_scope(&self, ctx: &mut EvalContext) {
        ctx.frames.pop();
    }
}

fn eval_source(operand: &CompiledOperand, ctx: &mut EvalContext) -> Value {
    match &operand.source {
        OperandSource::Constant(value) => value.to_value(),
        OperandSource::Attribute(load_index) | OperandSource::Block(load_index) => {
            let current = ctx.current().clone();
            current.compute_value_at(*load_index)
        }
        OperandSource::Rule(rule) => rule.compute_value(ctx),
        OperandSource::UpperScope { hops, slot } => {
            let frame_index = ctx.frames.len() - *hops as usize;
            ctx.frames[frame_index].cache[*slot as usize].clone()
        }
    }
}
