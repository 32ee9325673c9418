//! Continuous (numeric) values with a missing sentinel
//!
//! A derivation rule whose inputs are absent does not fail; it returns
//! [`Continuous::MISSING`], and downstream rules propagate it. The sentinel
//! is negative infinity, which sorts below every actual value, so ordering
//! stays total without special-casing.
//!
//! # Examples
//!
//! ```rust
//! use tabula_types::Continuous;
//!
//! let a = Continuous::new(2.0);
//! let b = Continuous::new(3.0);
//! assert_eq!((a + b).value(), 5.0);
//!
//! let m = Continuous::MISSING + a;
//! assert!(m.is_missing());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A numeric value.
///
/// # Invariants
///
/// - Never holds NaN: the constructor normalizes NaN to [`Continuous::MISSING`].
/// - `MISSING` compares below every actual value.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Continuous(f64);

impl Continuous {
    /// The missing-value sentinel.
    pub const MISSING: Continuous = Continuous(f64::NEG_INFINITY);

    /// Zero.
    pub const ZERO: Continuous = Continuous(0.0);

    /// Create a value, normalizing NaN to missing.
    pub fn new(v: f64) -> Self {
        if v.is_nan() {
            Continuous::MISSING
        } else {
            Continuous(v)
        }
    }

    /// Raw numeric value. Missing reads as negative infinity.
    pub fn value(self) -> f64 {
        self.0
    }

    /// Whether this is the missing sentinel.
    pub fn is_missing(self) -> bool {
        self.0 == f64::NEG_INFINITY
    }
}

impl From<f64> for Continuous {
    fn from(v: f64) -> Self {
        Continuous::new(v)
    }
}

impl Eq for Continuous {}

impl Ord for Continuous {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // NaN is excluded by construction, total_cmp keeps this consistent
        // with PartialOrd.
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Continuous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_missing() {
            f.write_str("Missing")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

macro_rules! missing_propagating_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for Continuous {
            type Output = Continuous;

            fn $method(self, other: Continuous) -> Continuous {
                if self.is_missing() || other.is_missing() {
                    Continuous::MISSING
                } else {
                    Continuous::new(self.0 $op other.0)
                }
            }
        }
    };
}

missing_propagating_op!(Add, add, +);
missing_propagating_op!(Sub, sub, -);
missing_propagating_op!(Mul, mul, *);
missing_propagating_op!(Div, div, /);

impl Neg for Continuous {
    type Output = Continuous;

    fn neg(self) -> Continuous {
        if self.is_missing() {
            Continuous::MISSING
        } else {
            Continuous::new(-self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sentinel() {
        assert!(Continuous::MISSING.is_missing());
        assert!(!Continuous::new(0.0).is_missing());
        assert!(Continuous::new(f64::NAN).is_missing());
    }

    #[test]
    fn test_missing_propagates_through_arithmetic() {
        let v = Continuous::new(7.0);
        assert!((Continuous::MISSING + v).is_missing());
        assert!((v - Continuous::MISSING).is_missing());
        assert!((Continuous::MISSING * Continuous::MISSING).is_missing());
        assert!((-Continuous::MISSING).is_missing());
    }

    #[test]
    fn test_missing_sorts_first() {
        let mut values = vec![
            Continuous::new(1.0),
            Continuous::MISSING,
            Continuous::new(-10.0),
        ];
        values.sort();
        assert!(values[0].is_missing());
        assert_eq!(values[1].value(), -10.0);
    }

    #[test]
    fn test_division_by_zero_is_not_nan() {
        // 0/0 would be NaN; the constructor turns it into missing.
        let z = Continuous::ZERO;
        assert!((z / z).is_missing());
    }
}
