//! Sparse value blocks
//!
//! A block attribute's value for one instance is the set of (sparse index,
//! value) pairs actually present. Blocks are assembled once per evaluation --
//! from a dictionary during building, frozen into a sorted pair array for
//! reading -- and owned by the slot that stores them.

use indexmap::IndexMap;
use std::rc::Rc;

use tabula_types::{Continuous, Symbol};

use crate::value::ObjectHandle;

/// Immutable sorted sparse pair array.
///
/// # Invariants
///
/// - Pairs are sorted by sparse index, with no duplicates.
#[derive(Debug, Clone, Default)]
pub struct ValueBlock<T> {
    pairs: Vec<(u32, T)>,
}

impl<T: Clone> ValueBlock<T> {
    /// The empty block.
    pub fn empty() -> Self {
        ValueBlock { pairs: Vec::new() }
    }

    /// Freeze a pair list; sorts and asserts uniqueness.
    pub fn from_pairs(mut pairs: Vec<(u32, T)>) -> Self {
        pairs.sort_by_key(|(sparse, _)| *sparse);
        debug_assert!(
            pairs.windows(2).all(|w| w[0].0 < w[1].0),
            "duplicate sparse index in value block"
        );
        ValueBlock { pairs }
    }

    /// Freeze a dictionary of present values.
    pub fn from_map(map: &IndexMap<u32, T>) -> Self {
        Self::from_pairs(map.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    /// Number of present pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Value at a sparse index, if present.
    pub fn at(&self, sparse: u32) -> Option<&T> {
        self.pairs
            .binary_search_by_key(&sparse, |(s, _)| *s)
            .ok()
            .map(|i| &self.pairs[i].1)
    }

    /// Iterate present pairs in sparse-index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.pairs.iter().map(|(s, v)| (*s, v))
    }

    /// Copy of the block keeping only pairs whose sparse index is below
    /// `limit`. Used when an instance is mutated onto a class whose loaded
    /// block attributes narrowed (sparse positions are assigned as a
    /// prefix, so a position bound is a subset bound).
    pub fn shrink(&self, limit: u32) -> Self {
        ValueBlock {
            pairs: self
                .pairs
                .iter()
                .take_while(|(s, _)| *s < limit)
                .cloned()
                .collect(),
        }
    }
}

/// Sparse block of continuous values.
pub type ContinuousValueBlock = ValueBlock<Continuous>;

/// Sparse block of symbol values.
pub type SymbolValueBlock = ValueBlock<Symbol>;

/// Sparse block of object arrays.
pub type ObjectArrayValueBlock = ValueBlock<Vec<ObjectHandle>>;

impl ContinuousValueBlock {
    /// Value at a sparse index, missing when absent.
    pub fn value_at(&self, sparse: u32) -> Continuous {
        self.at(sparse).copied().unwrap_or(Continuous::MISSING)
    }

    /// Shared empty block.
    pub fn empty_rc() -> Rc<Self> {
        Rc::new(Self::empty())
    }
}

impl SymbolValueBlock {
    /// Value at a sparse index, the empty symbol when absent.
    pub fn value_at(&self, sparse: u32) -> Symbol {
        self.at(sparse).cloned().unwrap_or_else(Symbol::empty)
    }

    pub fn empty_rc() -> Rc<Self> {
        Rc::new(Self::empty())
    }
}

impl ObjectArrayValueBlock {
    /// Value at a sparse index, the empty array when absent.
    pub fn value_at(&self, sparse: u32) -> Vec<ObjectHandle> {
        self.at(sparse).cloned().unwrap_or_default()
    }

    pub fn empty_rc() -> Rc<Self> {
        Rc::new(Self::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs_sorts() {
        let block = ContinuousValueBlock::from_pairs(vec![
            (5, Continuous::new(5.0)),
            (1, Continuous::new(1.0)),
            (3, Continuous::new(3.0)),
        ]);
        let indices: Vec<u32> = block.iter().map(|(s, _)| s).collect();
        assert_eq!(indices, vec![1, 3, 5]);
    }

    #[test]
    fn test_lookup_with_default() {
        let block =
            ContinuousValueBlock::from_pairs(vec![(0, Continuous::new(1.5)), (2, Continuous::ZERO)]);
        assert_eq!(block.value_at(0).value(), 1.5);
        assert!(block.value_at(1).is_missing());
        assert_eq!(block.value_at(2).value(), 0.0);
    }

    #[test]
    fn test_symbol_block_default() {
        let block = SymbolValueBlock::from_pairs(vec![(4, Symbol::new("x"))]);
        assert_eq!(block.value_at(4), Symbol::new("x"));
        assert!(block.value_at(0).is_empty());
    }

    #[test]
    fn test_from_map() {
        let mut map = IndexMap::new();
        map.insert(7u32, Continuous::new(7.0));
        map.insert(2u32, Continuous::new(2.0));
        let block = ContinuousValueBlock::from_map(&map);
        assert_eq!(block.len(), 2);
        assert_eq!(block.value_at(2).value(), 2.0);
        assert_eq!(block.value_at(7).value(), 7.0);
    }

    #[test]
    fn test_shrink() {
        let block = ContinuousValueBlock::from_pairs(vec![
            (0, Continuous::new(0.0)),
            (1, Continuous::new(1.0)),
            (3, Continuous::new(3.0)),
        ]);
        let narrowed = block.shrink(2);
        assert_eq!(narrowed.len(), 2);
        assert!(narrowed.at(3).is_none());
        assert_eq!(block.shrink(0).len(), 0);
    }
}
