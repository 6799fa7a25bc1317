//! Fixed-point quantities for emissions and material amounts.
//!
//! Every value is stored as `i64` scaled by [`SCALE`] (six decimal places).
//! Integer sums are exact and commutative, so combining several incoming
//! contributions yields the same bits in any order. Ratios are evaluated in
//! `i128` and truncated toward zero.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Fixed-point scale factor. A real value `x` is stored as `x * SCALE`.
pub const SCALE: i64 = 1_000_000;

/// A fixed-point quantity (tonnes CO2e for emissions, tonnes for amounts).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quantity(pub i64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    /// Builds a quantity from a whole number of units.
    pub fn from_units(units: i64) -> Result<Self, CoreError> {
        units
            .checked_mul(SCALE)
            .map(Quantity)
            .ok_or(CoreError::Overflow { op: "from_units" })
    }

    /// Converts a decimal value at the API edge. Rounds to the nearest
    /// representable step; rejects NaN, infinities and out-of-range values.
    pub fn from_f64(value: f64) -> Result<Self, CoreError> {
        if !value.is_finite() {
            return Err(CoreError::InvalidQuantity {
                reason: format!("{value} is not a finite number"),
            });
        }
        let scaled = (value * SCALE as f64).round();
        if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
            return Err(CoreError::Overflow { op: "from_f64" });
        }
        Ok(Quantity(scaled as i64))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Quantity) -> Result<Quantity, CoreError> {
        self.0
            .checked_add(other.0)
            .map(Quantity)
            .ok_or(CoreError::Overflow { op: "add" })
    }

    /// Subtraction that floors at zero instead of going negative.
    pub fn saturating_sub_floor_zero(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(other.0).max(0))
    }

    /// Computes `self * numerator / denominator` without intermediate
    /// rounding. Returns zero when the denominator is not positive.
    pub fn scale_by(self, numerator: Quantity, denominator: Quantity) -> Result<Quantity, CoreError> {
        if denominator.0 <= 0 {
            return Ok(Quantity::ZERO);
        }
        let product = (self.0 as i128) * (numerator.0 as i128);
        let value = product / (denominator.0 as i128);
        i64::try_from(value)
            .map(Quantity)
            .map_err(|_| CoreError::Overflow { op: "scale_by" })
    }

    /// Sums an iterator of quantities, failing on overflow.
    pub fn checked_sum<I>(iter: I) -> Result<Quantity, CoreError>
    where
        I: IntoIterator<Item = Quantity>,
    {
        iter.into_iter()
            .try_fold(Quantity::ZERO, |acc, q| acc.checked_add(q))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = SCALE as u64;
        write!(f, "{}{}.{:06}", sign, abs / scale, abs % scale)
    }
}
