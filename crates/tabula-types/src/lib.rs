//! Tabula value types
//!
//! Leaf crate of the Tabula engine: value kinds and their classification,
//! scalar value types with explicit missing/invalid sentinels, interned
//! symbols, and the compiled load-index handle.
//!
//! Everything here is a plain value type with no engine state; the schema
//! model and instance store build on top of this crate.

pub mod continuous;
pub mod kind;
pub mod load_index;
pub mod prelude;
pub mod symbol;
pub mod temporal;

pub use continuous::Continuous;
pub use kind::{ValueKind, VarKeyKind};
pub use load_index::LoadIndex;
pub use symbol::{is_identifier, Symbol};
pub use temporal::{
    is_valid_date_format, is_valid_time_format, is_valid_timestamp_format, Date, Time, Timestamp,
};
