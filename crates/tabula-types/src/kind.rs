//! Value kinds and their classification
//!
//! Every attribute, derivation-rule result and operand carries a
//! [`ValueKind`]. The engine only ever needs a handful of predicates over
//! kinds (simple vs. relation vs. block, block/base conversion), all of which
//! live here as pure functions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a stored or computed value.
///
/// Kinds split into four families:
/// - **simple**: `Continuous`, `Symbol`, `Date`, `Time`, `Timestamp`, `Text`
/// - **relation**: `Object` (one sub-record), `ObjectArray` (a table of them)
/// - **opaque**: `Structure` (engine never looks inside)
/// - **block**: sparse per-instance variants of a base kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Numeric value (f64 with a missing sentinel)
    Continuous,
    /// Categorical value (interned string)
    Symbol,
    /// Calendar date
    Date,
    /// Time of day
    Time,
    /// Date + time
    Timestamp,
    /// Free text (not interned)
    Text,
    /// Relation to one record of another class
    Object,
    /// Relation to a table of records of another class
    ObjectArray,
    /// Opaque structure handle
    Structure,
    /// Sparse block of continuous values
    ContinuousBlock,
    /// Sparse block of symbol values
    SymbolBlock,
    /// Sparse block of object arrays
    ObjectArrayBlock,
}

impl ValueKind {
    /// Simple kinds can be stored in a flat column and compared for equality.
    pub fn is_simple(self) -> bool {
        matches!(
            self,
            ValueKind::Continuous
                | ValueKind::Symbol
                | ValueKind::Date
                | ValueKind::Time
                | ValueKind::Timestamp
                | ValueKind::Text
        )
    }

    /// Date/time variants carry format metadata on their attributes.
    pub fn is_temporal(self) -> bool {
        matches!(self, ValueKind::Date | ValueKind::Time | ValueKind::Timestamp)
    }

    /// Relation kinds reference records of another class.
    pub fn is_relation(self) -> bool {
        matches!(self, ValueKind::Object | ValueKind::ObjectArray)
    }

    /// Block kinds hold one sparse value set per instance.
    pub fn is_block(self) -> bool {
        matches!(
            self,
            ValueKind::ContinuousBlock | ValueKind::SymbolBlock | ValueKind::ObjectArrayBlock
        )
    }

    /// Kinds that a dictionary can persist per record.
    pub fn is_storable(self) -> bool {
        self.is_simple() || self.is_relation() || self.is_block()
    }

    /// Block variant of a base kind, if one exists.
    pub fn block_kind(self) -> Option<ValueKind> {
        match self {
            ValueKind::Continuous => Some(ValueKind::ContinuousBlock),
            ValueKind::Symbol => Some(ValueKind::SymbolBlock),
            ValueKind::ObjectArray => Some(ValueKind::ObjectArrayBlock),
            _ => None,
        }
    }

    /// Base kind of a block variant, if this is a block kind.
    pub fn base_kind(self) -> Option<ValueKind> {
        match self {
            ValueKind::ContinuousBlock => Some(ValueKind::Continuous),
            ValueKind::SymbolBlock => Some(ValueKind::Symbol),
            ValueKind::ObjectArrayBlock => Some(ValueKind::ObjectArray),
            _ => None,
        }
    }

    /// Display name, as used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Continuous => "Continuous",
            ValueKind::Symbol => "Symbol",
            ValueKind::Date => "Date",
            ValueKind::Time => "Time",
            ValueKind::Timestamp => "Timestamp",
            ValueKind::Text => "Text",
            ValueKind::Object => "Object",
            ValueKind::ObjectArray => "ObjectArray",
            ValueKind::Structure => "Structure",
            ValueKind::ContinuousBlock => "ContinuousBlock",
            ValueKind::SymbolBlock => "SymbolBlock",
            ValueKind::ObjectArrayBlock => "ObjectArrayBlock",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Addressing scheme of a sparse attribute block.
///
/// Block members are keyed either by a categorical var-key or by an integer
/// var-key; `None` means "not yet determined" and is rejected by the
/// completeness check of block-producing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VarKeyKind {
    /// No addressing scheme chosen yet
    #[default]
    None,
    /// Categorical keys
    Symbol,
    /// Integer keys
    Continuous,
}

impl fmt::Display for VarKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VarKeyKind::None => "None",
            VarKeyKind::Symbol => "Symbol",
            VarKeyKind::Continuous => "Continuous",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_families() {
        assert!(ValueKind::Continuous.is_simple());
        assert!(ValueKind::Text.is_simple());
        assert!(!ValueKind::Object.is_simple());

        assert!(ValueKind::Object.is_relation());
        assert!(ValueKind::ObjectArray.is_relation());
        assert!(!ValueKind::Structure.is_relation());

        assert!(ValueKind::ContinuousBlock.is_block());
        assert!(!ValueKind::Continuous.is_block());

        assert!(ValueKind::Date.is_temporal());
        assert!(!ValueKind::Symbol.is_temporal());
    }

    #[test]
    fn test_block_base_round_trip() {
        for kind in [
            ValueKind::Continuous,
            ValueKind::Symbol,
            ValueKind::ObjectArray,
        ] {
            let block = kind.block_kind().unwrap();
            assert_eq!(block.base_kind(), Some(kind));
        }
        assert_eq!(ValueKind::Date.block_kind(), None);
        assert_eq!(ValueKind::Object.block_kind(), None);
    }

    #[test]
    fn test_storable() {
        assert!(ValueKind::SymbolBlock.is_storable());
        assert!(!ValueKind::Structure.is_storable());
    }
}
