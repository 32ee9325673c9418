//! Tabula engine core
//!
//! The computation core of the Tabula tabular data-modeling engine:
//!
//! - **Schema**: [`domain::ClassDomain`], [`class::Class`],
//!   [`attribute::Attribute`] and [`attribute::AttributeBlock`] describe
//!   record types; indexing and compilation turn them into immutable
//!   [`compile::CompiledClass`] snapshots with per-attribute load indices.
//! - **Derivation rules**: [`rule::DerivationRule`] trees are validated
//!   (definition, family against a registered prototype, completeness
//!   against the owner class), then compiled into [`compile::CompiledRule`]
//!   trees whose operands resolve to load indices, constants, nested rules
//!   or upper-scope slots.
//! - **Instances**: [`object::Instance`] holds one record's values with
//!   lazy, cached evaluation of derived slots; [`block`] provides the
//!   sparse value containers behind block attributes.
//!
//! Textual dictionary parsing, the full rule library and any execution
//! framework live outside this crate; they consume the registry and
//! instance APIs.

pub mod attribute;
pub mod block;
pub mod class;
pub mod compile;
pub mod diag;
pub mod domain;
pub mod error;
pub mod eval;
pub mod object;
pub mod ops;
pub mod registry;
pub mod rule;
pub mod value;

pub use attribute::{Attribute, AttributeBlock, VarKey};
pub use block::{ContinuousValueBlock, ObjectArrayValueBlock, SymbolValueBlock};
pub use class::{Class, ClassIndex};
pub use compile::{CompiledClass, CompiledRule, OperandSource, ScopeContext};
pub use diag::{Diagnostic, DiagnosticSink, Severity};
pub use domain::ClassDomain;
pub use error::{Error, Result};
pub use eval::{EvalContext, RuleBody};
pub use object::{Instance, MemoryGuard, Slot};
pub use ops::register_builtin_rules;
pub use rule::{DerivationRule, Operand, OperandArity, OperandOrigin, RuleType};
pub use value::{ConstantValue, ObjectHandle, Value};
