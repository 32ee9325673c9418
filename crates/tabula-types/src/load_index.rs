//! Compiled storage handle for attribute values
//!
//! A [`LoadIndex`] is produced by schema compilation and lets an instance
//! reach a value in O(1): either a dense slot, or a (block slot, sparse
//! position) pair for attributes living inside a sparse block. "No index"
//! is `Option<LoadIndex>`, not a sentinel bit pattern.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense or sparse storage handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadIndex {
    dense: u32,
    sparse: Option<u32>,
}

impl LoadIndex {
    /// Handle for a value stored directly in a dense slot.
    pub fn dense(slot: u32) -> Self {
        LoadIndex {
            dense: slot,
            sparse: None,
        }
    }

    /// Handle for a value stored at a sparse position inside a block slot.
    pub fn sparse(slot: u32, position: u32) -> Self {
        LoadIndex {
            dense: slot,
            sparse: Some(position),
        }
    }

    /// Dense slot, as a vector index.
    pub fn dense_index(self) -> usize {
        self.dense as usize
    }

    /// Sparse position within the block, if this is a sparse handle.
    pub fn sparse_index(self) -> Option<u32> {
        self.sparse
    }

    pub fn is_dense(self) -> bool {
        self.sparse.is_none()
    }

    pub fn is_sparse(self) -> bool {
        self.sparse.is_some()
    }

    /// The dense handle of the enclosing slot (identity for dense handles).
    pub fn block(self) -> LoadIndex {
        LoadIndex {
            dense: self.dense,
            sparse: None,
        }
    }
}

impl fmt::Display for LoadIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sparse {
            None => write!(f, "{}", self.dense),
            Some(pos) => write!(f, "{}:{}", self.dense, pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_handle() {
        let li = LoadIndex::dense(3);
        assert!(li.is_dense());
        assert_eq!(li.dense_index(), 3);
        assert_eq!(li.sparse_index(), None);
        assert_eq!(li.block(), li);
    }

    #[test]
    fn test_sparse_handle() {
        let li = LoadIndex::sparse(2, 7);
        assert!(li.is_sparse());
        assert_eq!(li.dense_index(), 2);
        assert_eq!(li.sparse_index(), Some(7));
        assert_eq!(li.block(), LoadIndex::dense(2));
        assert_eq!(li.to_string(), "2:7");
    }
}
