//! Convenience re-exports for downstream crates.

pub use crate::continuous::Continuous;
pub use crate::kind::{ValueKind, VarKeyKind};
pub use crate::load_index::LoadIndex;
pub use crate::symbol::{is_identifier, Symbol};
pub use crate::temporal::{Date, Time, Timestamp};
