//! Non-negative stock quantities.
//!
//! [`Quantity`] is the arithmetic primitive used everywhere an amount of stock
//! appears. Every operation is checked: underflow and overflow surface as
//! [`QuantityError`] instead of wrapping or panicking.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced by quantity arithmetic and construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    /// Attempted to build a quantity from a negative value.
    #[error("Quantity cannot be negative: {0}")]
    Negative(i64),

    /// Subtraction would produce a negative quantity.
    #[error("Cannot subtract {subtrahend} from {minuend}: result would be negative")]
    Underflow {
        /// Left-hand side of the subtraction.
        minuend: u32,
        /// Right-hand side of the subtraction.
        subtrahend: u32,
    },

    /// Addition or multiplication exceeded the representable range.
    #[error("Quantity overflow: {0}")]
    Overflow(String),
}

/// An immutable, non-negative amount of stock.
///
/// # Example
///
/// ```
/// use stockpile_core::quantity::Quantity;
///
/// let total = Quantity::new(100);
/// let reserved = Quantity::new(30);
/// assert_eq!(total.subtract(reserved).unwrap(), Quantity::new(70));
/// assert!(reserved.subtract(total).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    /// Creates a quantity from an unsigned value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The zero quantity.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns `true` if this quantity is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if this quantity is strictly positive.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Adds two quantities.
    ///
    /// # Errors
    ///
    /// Returns [`QuantityError::Overflow`] if the sum does not fit.
    pub fn add(self, other: Self) -> Result<Self, QuantityError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or_else(|| QuantityError::Overflow(format!("{} + {}", self.0, other.0)))
    }

    /// Subtracts `other` from this quantity.
    ///
    /// # Errors
    ///
    /// Returns [`QuantityError::Underflow`] if `other` is larger than `self`.
    pub fn subtract(self, other: Self) -> Result<Self, QuantityError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(QuantityError::Underflow {
                minuend: self.0,
                subtrahend: other.0,
            })
    }

    /// Multiplies this quantity by a factor, e.g. a per-set requirement by a set count.
    ///
    /// # Errors
    ///
    /// Returns [`QuantityError::Overflow`] if the product does not fit.
    pub fn times(self, factor: u32) -> Result<Self, QuantityError> {
        self.0
            .checked_mul(factor)
            .map(Self)
            .ok_or_else(|| QuantityError::Overflow(format!("{} * {factor}", self.0)))
    }

    /// How many whole multiples of `per_unit` fit in this quantity.
    ///
    /// Returns 0 when `per_unit` is zero.
    #[must_use]
    pub const fn whole_multiples_of(self, per_unit: Self) -> u32 {
        match self.0.checked_div(per_unit.0) {
            Some(n) => n,
            None => 0,
        }
    }

    /// Returns `true` if this quantity is at least `other`.
    #[must_use]
    pub const fn is_at_least(self, other: Self) -> bool {
        self.0 >= other.0
    }
}

impl TryFrom<i64> for Quantity {
    type Error = QuantityError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 0 {
            return Err(QuantityError::Negative(value));
        }
        u32::try_from(value)
            .map(Self)
            .map_err(|_| QuantityError::Overflow(value.to_string()))
    }
}

impl From<u32> for Quantity {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
