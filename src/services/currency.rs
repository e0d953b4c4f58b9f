//! Per-currency accumulation used by every ledger and summary view.
//!
//! Amounts in different currencies are never added together; each report
//! carries one total per currency code.

use std::collections::BTreeMap;

use serde::Serialize;

pub const DEFAULT_CURRENCY: &str = "USD";

/// Upper-cases and trims a currency code, falling back to [`DEFAULT_CURRENCY`].
pub fn normalize_currency(code: Option<&str>) -> String {
    match code.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_ascii_uppercase(),
        _ => DEFAULT_CURRENCY.to_string(),
    }
}

/// Checks the shape of a caller-supplied code: three ASCII letters.
pub fn is_valid_currency(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CurrencyTotals(BTreeMap<String, f64>);

impl CurrencyTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, currency: &str, amount: f64) {
        let key = normalize_currency(Some(currency));
        let slot = self.0.entry(key).or_insert(0.0);
        *slot = round2(*slot + amount);
    }

    pub fn get(&self, currency: &str) -> f64 {
        self.0.get(&normalize_currency(Some(currency))).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn currencies(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Element-wise `self - other` over the union of currencies.
    pub fn minus(&self, other: &CurrencyTotals) -> CurrencyTotals {
        let mut out = self.clone();
        for (currency, amount) in other.iter() {
            out.add(currency, -amount);
        }
        out
    }
}

impl<'a> FromIterator<(&'a str, f64)> for CurrencyTotals {
    fn from_iter<I: IntoIterator<Item = (&'a str, f64)>>(iter: I) -> Self {
        let mut totals = CurrencyTotals::new();
        for (currency, amount) in iter {
            totals.add(currency, amount);
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_or_missing_codes_default_to_usd() {
        assert_eq!(normalize_currency(None), "USD");
        assert_eq!(normalize_currency(Some("   ")), "USD");
        assert_eq!(normalize_currency(Some(" iqd ")), "IQD");
    }

    #[test]
    fn validates_code_shape() {
        assert!(is_valid_currency("IQD"));
        assert!(!is_valid_currency("US"));
        assert!(!is_valid_currency("U$D"));
    }

    #[test]
    fn sums_per_currency_without_mixing() {
        let totals: CurrencyTotals = [("USD", 10.0), ("iqd", 25000.0), ("usd", 5.5), ("", 1.0)]
            .into_iter()
            .collect();
        assert_eq!(totals.get("USD"), 16.5);
        assert_eq!(totals.get("IQD"), 25000.0);
        assert_eq!(totals.get("EUR"), 0.0);
        assert_eq!(totals.currencies().collect::<Vec<_>>(), vec!["IQD", "USD"]);
    }

    #[test]
    fn rounding_keeps_cents_stable() {
        let mut totals = CurrencyTotals::new();
        for _ in 0..10 {
            totals.add("USD", 0.1);
        }
        assert_eq!(totals.get("USD"), 1.0);
        assert_eq!(round2(2.675_000_1), 2.68);
    }

    #[test]
    fn minus_covers_currencies_on_either_side() {
        let income: CurrencyTotals = [("USD", 100.0)].into_iter().collect();
        let expense: CurrencyTotals = [("USD", 40.0), ("IQD", 5000.0)].into_iter().collect();
        let net = income.minus(&expense);
        assert_eq!(net.get("USD"), 60.0);
        assert_eq!(net.get("IQD"), -5000.0);
    }

    #[test]
    fn serializes_as_plain_object() {
        let totals: CurrencyTotals = [("USD", 1.5)].into_iter().collect();
        assert_eq!(serde_json::to_value(&totals).unwrap(), serde_json::json!({"USD": 1.5}));
    }
}
