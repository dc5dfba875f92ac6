//! Amount type for handling TON values.
//!
//! This module provides the `Amount` type which wraps `Decimal` and keeps it at a fixed precision
//! of six decimal places, so that repeated additions do not drift the way `f64` would.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// The number of decimal places that are kept.
pub const PRECISION: u32 = 6;

/// The number of nanotons in one TON.
const NANO_SCALE: u32 = 9;

/// Represents an amount of TON, rounded to `PRECISION` decimal places.
///
/// Amounts are written to JSON as plain numbers, which is what consumers of `stats.json` expect.
/// They can be read from JSON numbers or numeric strings.
///
/// ```
/// # use ton_donations::model::Amount;
/// let a = Amount::from_nano(2_000_000_000).unwrap();
/// let b = Amount::from_f64(0.5).unwrap();
/// assert_eq!((a + b).to_string(), "2.5");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Creates a new Amount, rounding `value` to `PRECISION` decimal places.
    pub fn new(value: Decimal) -> Self {
        Self(round(value))
    }

    /// Converts a nanoton value, as reported by TonAPI, into TON. Returns `None` if the value is
    /// too large to be represented.
    pub fn from_nano(nano: i128) -> Option<Self> {
        Decimal::try_from_i128_with_scale(nano, NANO_SCALE)
            .ok()
            .map(Self::new)
    }

    /// Converts an `f64`. Returns `None` for NaN, infinities and values that do not fit.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Decimal::from_f64(value).map(Self::new)
    }

    /// Returns the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Returns the value as an `f64`, for consumers that only understand floats.
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or_default()
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Returns `self` or zero, whichever is larger.
    pub fn clamp_non_negative(self) -> Self {
        if self.is_negative() {
            Self::ZERO
        } else {
            self
        }
    }
}

fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRECISION, RoundingStrategy::MidpointAwayFromZero)
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Self) -> Self::Output {
        Amount::new(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount::new(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// An error that can occur when parsing strings into `Amount` values.
#[derive(Debug, thiserror::Error)]
#[error("invalid amount: {0}")]
pub struct AmountError(#[from] rust_decimal::Error);

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Amount::default());
        }
        let value = Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map_err(AmountError)?;
        Ok(Amount::new(value))
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(AmountVisitor)
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number or a numeric string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        Ok(Amount::new(Decimal::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(Amount::new(Decimal::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        Amount::from_f64(v).ok_or_else(|| E::custom(format!("{v} is not a usable amount")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        Amount::from_str(v).map_err(E::custom)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Amount, E> {
        Ok(Amount::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_from_nano() {
        assert_eq!(Amount::from_nano(2_000_000_000).unwrap().value(), dec("2"));
        assert_eq!(Amount::from_nano(500_000_000).unwrap().value(), dec("0.5"));
    }

    #[test]
    fn test_from_nano_rounds_to_six_places() {
        // 1.2345675 TON rounds half away from zero
        assert_eq!(
            Amount::from_nano(1_234_567_500).unwrap().value(),
            dec("1.234568")
        );
        assert_eq!(Amount::from_nano(1).unwrap().value(), Decimal::ZERO);
    }

    #[test]
    fn test_from_nano_too_large() {
        assert!(Amount::from_nano(i128::MAX).is_none());
    }

    #[test]
    fn test_from_f64_rejects_non_finite() {
        assert!(Amount::from_f64(f64::NAN).is_none());
        assert!(Amount::from_f64(f64::INFINITY).is_none());
        assert!(Amount::from_f64(f64::NEG_INFINITY).is_none());
        assert_eq!(Amount::from_f64(-15.0).unwrap().value(), dec("-15"));
    }

    #[test]
    fn test_repeated_addition_does_not_drift() {
        let tenth = Amount::from_f64(0.1).unwrap();
        let mut total = Amount::ZERO;
        for _ in 0..10 {
            total = total + tenth;
        }
        assert_eq!(total.value(), dec("1"));
    }

    #[test]
    fn test_sign_checks() {
        assert!(!Amount::ZERO.is_positive());
        assert!(!Amount::ZERO.is_negative());
        assert!(Amount::from_f64(-1.0).unwrap().is_negative());
        assert!(Amount::from_f64(1.0).unwrap().is_positive());
        assert_eq!(
            Amount::from_f64(-3.0).unwrap().clamp_non_negative(),
            Amount::ZERO
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::from_f64(2.0).unwrap().to_string(), "2");
        assert_eq!(Amount::from_f64(0.123456).unwrap().to_string(), "0.123456");
    }

    #[test]
    fn test_serialize_as_number() {
        let json = serde_json::to_string(&Amount::from_f64(2.5).unwrap()).unwrap();
        assert_eq!(json, "2.5");
    }

    #[test]
    fn test_deserialize_number_string_and_null() {
        let a: Amount = serde_json::from_str("3").unwrap();
        assert_eq!(a.value(), dec("3"));
        let b: Amount = serde_json::from_str("1.25").unwrap();
        assert_eq!(b.value(), dec("1.25"));
        let c: Amount = serde_json::from_str("\"0.75\"").unwrap();
        assert_eq!(c.value(), dec("0.75"));
        let d: Amount = serde_json::from_str("null").unwrap();
        assert!(d.is_zero());
    }

    #[test]
    fn test_parse_scientific() {
        assert_eq!(Amount::from_str("1e-3").unwrap().value(), dec("0.001"));
    }
}
