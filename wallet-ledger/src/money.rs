//! Fixed-point money in integer minor units
//!
//! Balances and amounts are `i64` counts of minor units (cents). Decimal or
//! float quantities are converted exactly once, at the engine's public
//! boundary, rounding half away from zero to two places.

use crate::error::{LedgerError, Result};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minor units per major unit
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Decimal places carried by a minor unit
pub const SCALE: u32 = 2;

/// Signed amount of money in minor units
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero
    pub const ZERO: Money = Money(0);

    /// From a raw minor-unit count
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Raw minor-unit count
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Convert a decimal quantity of major units
    pub fn from_decimal(amount: Decimal) -> Result<Self> {
        let rounded = amount.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
        rounded
            .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
            .and_then(|scaled| scaled.to_i64())
            .map(Money)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("{} is out of range", amount)))
    }

    /// Convert a float quantity of major units, going through `Decimal` so
    /// that `0.29` becomes 29 minor units instead of truncating to 28.
    pub fn from_f64(amount: f64) -> Result<Self> {
        let decimal = Decimal::from_f64(amount)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("{} is not a finite amount", amount)))?;
        Self::from_decimal(decimal)
    }

    /// Exact decimal value in major units
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, SCALE)
    }

    /// True when strictly greater than zero
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// True when below zero
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn checked_neg(self) -> Option<Money> {
        self.0.checked_neg().map(Money)
    }

    /// Amount accepted by a mutation: strictly positive
    pub fn positive_amount(amount: Decimal) -> Result<Self> {
        let money = Self::from_decimal(amount)?;
        if !money.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        Ok(money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.to_decimal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decimal_round_trip() {
        let money = Money::from_decimal(dec!(200.50)).unwrap();
        assert_eq!(money.minor(), 20_050);
        assert_eq!(money.to_decimal(), dec!(200.50));
        assert_eq!(money.to_string(), "200.50");
    }

    #[test]
    fn test_rounds_half_away_from_zero() {
        assert_eq!(Money::from_decimal(dec!(0.005)).unwrap().minor(), 1);
        assert_eq!(Money::from_decimal(dec!(0.004)).unwrap().minor(), 0);
        assert_eq!(Money::from_decimal(dec!(-0.005)).unwrap().minor(), -1);
        assert_eq!(Money::from_decimal(dec!(1.235)).unwrap().minor(), 124);
    }

    #[test]
    fn test_float_boundary_does_not_truncate() {
        // 0.29 * 100.0 == 28.999999999999996 in binary floating point
        assert_eq!(Money::from_f64(0.29).unwrap().minor(), 29);
        assert_eq!(Money::from_f64(75.25).unwrap().minor(), 7_525);
        assert!(Money::from_f64(f64::NAN).is_err());
        assert!(Money::from_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let huge = Decimal::from(i64::MAX);
        assert!(matches!(
            Money::from_decimal(huge),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_positive_amount() {
        assert!(Money::positive_amount(dec!(0.01)).is_ok());
        assert!(Money::positive_amount(dec!(0)).is_err());
        assert!(Money::positive_amount(dec!(-5)).is_err());
        // rounds to zero
        assert!(Money::positive_amount(dec!(0.001)).is_err());
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Money::from_minor(i64::MAX);
        assert!(a.checked_add(Money::from_minor(1)).is_none());
        assert_eq!(
            Money::from_minor(5).checked_sub(Money::from_minor(7)),
            Some(Money::from_minor(-2))
        );
        assert!(Money::from_minor(i64::MIN).checked_neg().is_none());
    }

    #[test]
    fn test_serializes_as_minor_units() {
        let json = serde_json::to_string(&Money::from_minor(12_550)).unwrap();
        assert_eq!(json, "12550");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Money::from_minor(12_550));
    }
}
