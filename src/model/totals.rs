use crate::country::COUNTRIES;
use crate::model::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors for rejected corrections.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TotalsError {
    /// The amount for an absolute correction was not a finite, non-negative number.
    #[error("invalid amount {0}: it must be a finite number that is zero or more")]
    InvalidAmount(f64),
    /// The delta for an additive correction was not a finite number.
    #[error("invalid delta {0}: it must be a finite number")]
    InvalidDelta(f64),
    /// The number is finite but too large to be held as a total.
    #[error("{0} is out of range for a TON amount")]
    OutOfRange(f64),
}

/// The running donation total for each country, in TON.
///
/// Serializes as a plain JSON object of country name to number, which is the format of
/// `stats.json`. Values are never negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountryTotals(BTreeMap<String, Amount>);

impl CountryTotals {
    /// Creates a set of totals with every country in `COUNTRIES` at zero.
    pub fn new() -> Self {
        let mut totals = Self::default();
        totals.ensure_defaults();
        totals
    }

    /// Adds a donation. Does nothing if `country` is empty or `amount` is not positive.
    pub fn add(&mut self, country: &str, amount: Amount) {
        if country.is_empty() || !amount.is_positive() {
            return;
        }
        let total = self.0.entry(country.to_string()).or_default();
        *total = *total + amount;
    }

    /// Replaces the total for `country`.
    pub fn set_absolute(&mut self, country: &str, amount: f64) -> Result<Amount, TotalsError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TotalsError::InvalidAmount(amount));
        }
        let value = Amount::from_f64(amount)
            .filter(|a| !a.is_negative())
            .ok_or(TotalsError::OutOfRange(amount))?;
        self.0.insert(country.to_string(), value);
        Ok(value)
    }

    /// Adds `delta`, which may be negative, to the total for `country`. The result never goes
    /// below zero.
    pub fn add_delta(&mut self, country: &str, delta: f64) -> Result<Amount, TotalsError> {
        if !delta.is_finite() {
            return Err(TotalsError::InvalidDelta(delta));
        }
        let delta = Amount::from_f64(delta).ok_or(TotalsError::OutOfRange(delta))?;
        let total = self.0.entry(country.to_string()).or_default();
        *total = (*total + delta).clamp_non_negative();
        Ok(*total)
    }

    /// Brings in the changes that `theirs` made since `base`, keeping the changes that `self` made
    /// since `base`. For a country that `theirs` changed, the result is `self + (theirs - base)`,
    /// clamped at zero. Countries that `theirs` left alone keep their value in `self`.
    pub fn merge(&mut self, base: &CountryTotals, theirs: &CountryTotals) {
        for (country, their_total) in theirs.iter() {
            let base_total = base.get(country).unwrap_or_default();
            if their_total == base_total {
                continue;
            }
            let total = self.0.entry(country.to_string()).or_default();
            *total = (*total + their_total - base_total).clamp_non_negative();
        }
    }

    /// Inserts a zero for every country in `COUNTRIES` that is missing. Existing values are left
    /// alone.
    pub fn ensure_defaults(&mut self) {
        for c in COUNTRIES {
            self.0.entry(c.to_string()).or_default();
        }
    }

    /// Returns a copy with all default countries present.
    pub fn snapshot(&self) -> CountryTotals {
        let mut copy = self.clone();
        copy.ensure_defaults();
        copy
    }

    pub fn get(&self, country: &str) -> Option<Amount> {
        self.0.get(country).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Amount)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Returns the countries ordered by total, largest first. Ties are ordered by name.
    pub fn ranked(&self) -> Vec<(&str, Amount)> {
        let mut rows: Vec<_> = self.iter().collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn amt(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    #[test]
    fn test_new_has_every_country() {
        let totals = CountryTotals::new();
        assert_eq!(totals.len(), COUNTRIES.len());
        for c in COUNTRIES {
            assert_eq!(totals.get(c), Some(Amount::ZERO));
        }
    }

    #[test]
    fn test_add_accumulates() {
        let mut totals = CountryTotals::new();
        totals.add("France", amt("2"));
        totals.add("France", amt("0.000001"));
        assert_eq!(totals.get("France"), Some(amt("2.000001")));
    }

    #[test]
    fn test_add_ignores_non_positive_and_empty_country() {
        let mut totals = CountryTotals::new();
        totals.add("France", amt("5"));
        totals.add("France", Amount::ZERO);
        totals.add("France", amt("-1"));
        totals.add("", amt("3"));
        assert_eq!(totals.get("France"), Some(amt("5")));
        assert_eq!(totals.get(""), None);
    }

    #[test]
    fn test_set_absolute() {
        let mut totals = CountryTotals::new();
        totals.add("Japan", amt("4"));
        assert_eq!(totals.set_absolute("Japan", 10.0).unwrap(), amt("10"));
        assert_eq!(totals.get("Japan"), Some(amt("10")));
        assert_eq!(totals.set_absolute("Japan", 0.0).unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_set_absolute_rejects_bad_input() {
        let mut totals = CountryTotals::new();
        totals.add("Japan", amt("4"));
        assert_eq!(
            totals.set_absolute("Japan", -1.0),
            Err(TotalsError::InvalidAmount(-1.0))
        );
        assert!(totals.set_absolute("Japan", f64::NAN).is_err());
        assert!(totals.set_absolute("Japan", f64::INFINITY).is_err());
        assert_eq!(totals.get("Japan"), Some(amt("4")));
    }

    #[test]
    fn test_add_delta_clamps_to_zero() {
        let mut totals = CountryTotals::new();
        totals.add("France", amt("5"));
        assert_eq!(totals.add_delta("France", -1e9).unwrap(), Amount::ZERO);
        assert_eq!(totals.get("France"), Some(Amount::ZERO));
    }

    #[test]
    fn test_add_delta_rejects_non_finite() {
        let mut totals = CountryTotals::new();
        assert!(matches!(
            totals.add_delta("France", f64::NAN),
            Err(TotalsError::InvalidDelta(_))
        ));
        assert!(totals.add_delta("France", f64::NEG_INFINITY).is_err());
        assert_eq!(totals.get("France"), Some(Amount::ZERO));
    }

    #[test]
    fn test_too_large_is_out_of_range() {
        let mut totals = CountryTotals::new();
        let e = totals.set_absolute("Japan", 1e30).unwrap_err();
        assert_eq!(e, TotalsError::OutOfRange(1e30));
        assert!(e.to_string().contains("out of range"));
        assert_eq!(
            totals.add_delta("Japan", -1e30),
            Err(TotalsError::OutOfRange(-1e30))
        );
        assert_eq!(totals.get("Japan"), Some(Amount::ZERO));
    }

    #[test]
    fn test_set_then_negative_delta() {
        let mut totals = CountryTotals::new();
        totals.set_absolute("Japan", 10.0).unwrap();
        totals.add_delta("Japan", -15.0).unwrap();
        assert_eq!(totals.get("Japan"), Some(Amount::ZERO));
    }

    #[test]
    fn test_add_delta_rounds() {
        let mut totals = CountryTotals::new();
        totals.add_delta("Italy", 0.1234567).unwrap();
        assert_eq!(
            totals.get("Italy").unwrap().value(),
            Decimal::from_str("0.123457").unwrap()
        );
    }

    #[test]
    fn test_ensure_defaults_is_idempotent_and_preserves_values() {
        let mut totals = CountryTotals::default();
        totals.add("Brazil", amt("7.5"));
        totals.add("Atlantis", amt("1"));
        totals.ensure_defaults();
        let once = totals.clone();
        totals.ensure_defaults();
        assert_eq!(totals, once);
        assert_eq!(totals.get("Brazil"), Some(amt("7.5")));
        assert_eq!(totals.get("Atlantis"), Some(amt("1")));
        assert_eq!(totals.len(), COUNTRIES.len() + 1);
    }

    #[test]
    fn test_snapshot_fills_missing_countries() {
        let totals: CountryTotals = serde_json::from_str(r#"{"France": 1.5}"#).unwrap();
        assert_eq!(totals.len(), 1);
        let snap = totals.snapshot();
        assert_eq!(snap.len(), COUNTRIES.len());
        assert_eq!(snap.get("France"), Some(amt("1.5")));
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let mut totals = CountryTotals::default();
        totals.add("France", amt("2"));
        totals.add("Spain", amt("0.5"));
        let json = serde_json::to_string(&totals).unwrap();
        assert_eq!(json, r#"{"France":2.0,"Spain":0.5}"#);
    }

    #[test]
    fn test_merge_takes_changes_from_both_sides() {
        let mut base = CountryTotals::new();
        base.add("Japan", amt("1"));
        base.add("France", amt("2"));

        let mut ours = base.clone();
        ours.add("France", amt("3"));
        ours.add("Spain", amt("0.5"));

        let mut theirs = base.clone();
        theirs.set_absolute("Japan", 10.0).unwrap();
        theirs.add_delta("France", -1.0).unwrap();

        ours.merge(&base, &theirs);
        assert_eq!(ours.get("Japan"), Some(amt("10")));
        assert_eq!(ours.get("France"), Some(amt("4")));
        assert_eq!(ours.get("Spain"), Some(amt("0.5")));
    }

    #[test]
    fn test_merge_clamps_and_ignores_unchanged() {
        let mut base = CountryTotals::new();
        base.add("Peru", amt("5"));
        let mut ours = base.clone();
        ours.add_delta("Peru", -4.0).unwrap();
        let mut theirs = base.clone();
        theirs.set_absolute("Peru", 0.0).unwrap();

        ours.merge(&base, &theirs);
        assert_eq!(ours.get("Peru"), Some(Amount::ZERO));

        let before = ours.clone();
        ours.merge(&theirs, &theirs);
        assert_eq!(ours, before);
    }

    #[test]
    fn test_ranked() {
        let mut totals = CountryTotals::default();
        totals.add("Spain", amt("1"));
        totals.add("France", amt("3"));
        totals.add("Austria", amt("1"));
        let ranked: Vec<&str> = totals.ranked().into_iter().map(|(c, _)| c).collect();
        assert_eq!(ranked, vec!["France", "Austria", "Spain"]);
    }
}
