use chrono::{NaiveDate, Utc};
use rand::Rng;

use crate::error::ApiError;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Accepts `YYYY-MM-DD` and returns it re-formatted; `field` names the input in errors.
pub fn parse_date(value: &str, field: &str) -> Result<String, ApiError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| ApiError::validation(format!("{} must be a date in YYYY-MM-DD form", field)))
}

/// Trims and drops empty strings.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn required(value: &str, field: &str) -> Result<String, ApiError> {
    let v = value.trim();
    if v.is_empty() {
        Err(ApiError::validation(format!("{} is required", field)))
    } else {
        Ok(v.to_string())
    }
}

pub fn non_negative(value: f64, field: &str) -> Result<f64, ApiError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ApiError::validation(format!("{} must be zero or positive", field)))
    }
}

/// `<prefix>-YYYYMMDD-<hex>` with `hex_len` random upper-case hex digits.
pub fn reference_number(prefix: &str, hex_len: usize) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..hex_len)
        .map(|_| char::from_digit(rng.random_range(0..16u32), 16).unwrap_or('0').to_ascii_uppercase())
        .collect();
    format!("{}-{}-{}", prefix, Utc::now().format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_numbers_have_the_expected_shape() {
        let r = reference_number("SH", 6);
        let parts: Vec<&str> = r.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "SH");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn parses_and_rejects_dates() {
        assert_eq!(parse_date(" 2026-03-07 ", "date").unwrap(), "2026-03-07");
        assert!(parse_date("07/03/2026", "date").is_err());
        assert!(parse_date("2026-02-30", "date").is_err());
    }

    #[test]
    fn validates_amounts_and_required_fields() {
        assert!(non_negative(0.0, "fee").is_ok());
        assert!(non_negative(-1.0, "fee").is_err());
        assert!(non_negative(f64::NAN, "fee").is_err());
        assert_eq!(required("  Basra ", "governorate").unwrap(), "Basra");
        assert!(required("   ", "governorate").is_err());
        assert_eq!(non_empty(Some("  ".into())), None);
    }
}
