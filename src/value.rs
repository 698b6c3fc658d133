//! Scalar cell values and coercion rules
//!
//! Every parsed cell becomes a tagged [`Scalar`]. Ingestion only produces
//! `Number`, `Text` and `Null`; `Date` appears when a caller asks for a
//! temporal reading of a cell (chart x-axes, type conversion).

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    static ref PLAIN_NUMBER: Regex =
        Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?$").unwrap();
    static ref GROUPED_NUMBER: Regex = Regex::new(r"^[+-]?\d{1,3}(?:,\d{3})+(?:\.\d+)?$").unwrap();
}

const CURRENCY_SYMBOLS: [char; 5] = ['$', '€', '£', '¥', '₹'];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Loosely typed record, as handed over by callers that hold row data.
pub type Record = HashMap<String, Scalar>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Number(f64),
    Date(NaiveDateTime),
    Text(String),
}

impl Scalar {
    /// Normalize one raw cell: blank → `Null`, numeric-looking → `Number`,
    /// anything else → trimmed `Text`.
    pub fn from_cell(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Scalar::Null;
        }
        match coerce_number(trimmed) {
            Some(n) => Scalar::Number(n),
            None => Scalar::Text(trimmed.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric reading of the value. Text cells go through the same coercion as
    /// ingestion so formatted strings still count.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) if n.is_finite() => Some(*n),
            Scalar::Text(s) => coerce_number(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Scalar::Date(d) => Some(*d),
            Scalar::Text(s) => parse_date(s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Scalar::Date(d) => {
                if d.time() == chrono::NaiveTime::MIN {
                    write!(f, "{}", d.format("%Y-%m-%d"))
                } else {
                    write!(f, "{}", d.format("%Y-%m-%dT%H:%M:%S"))
                }
            }
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Scalar::Number(n)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<Option<f64>> for Scalar {
    fn from(n: Option<f64>) -> Self {
        n.map(Scalar::Number).unwrap_or(Scalar::Null)
    }
}

/// Coerce a formatted numeric string (`$1,234.50`, `45%`, `(12)`) to `f64`.
///
/// Returns `None` rather than erroring on anything that is not clearly a number.
pub fn coerce_number(raw: &str) -> Option<f64> {
    let mut s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() > 2 {
        negative = true;
        s = s[1..s.len() - 1].trim();
    }

    let mut sign = "";
    if let Some(rest) = s.strip_prefix('-') {
        sign = "-";
        s = rest.trim_start();
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest.trim_start();
    }

    if let Some(rest) = s.strip_prefix(CURRENCY_SYMBOLS) {
        s = rest.trim_start();
        if sign.is_empty() {
            if let Some(rest) = s.strip_prefix('-') {
                sign = "-";
                s = rest;
            }
        }
    }

    if let Some(rest) = s.strip_suffix('%') {
        s = rest.trim_end();
    }

    let digits = if s.contains(',') {
        if !GROUPED_NUMBER.is_match(s) {
            return None;
        }
        s.replace(',', "")
    } else {
        s.to_string()
    };

    if !PLAIN_NUMBER.is_match(&digits) {
        return None;
    }

    let value: f64 = format!("{}{}", sign, digits).parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Parse the date and datetime layouts commonly found in exported spreadsheets.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    // Bare numbers are never dates here; they stay numeric.
    if s.len() < 6 || PLAIN_NUMBER.is_match(s) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_cells_are_null() {
        assert_eq!(Scalar::from_cell(""), Scalar::Null);
        assert_eq!(Scalar::from_cell("   \t"), Scalar::Null);
    }

    #[test]
    fn test_formatted_numbers() {
        assert_eq!(coerce_number("42"), Some(42.0));
        assert_eq!(coerce_number(" -3.5 "), Some(-3.5));
        assert_eq!(coerce_number("$1,234.50"), Some(1234.5));
        assert_eq!(coerce_number("€ 99"), Some(99.0));
        assert_eq!(coerce_number("45%"), Some(45.0));
        assert_eq!(coerce_number("(1,000)"), Some(-1000.0));
        assert_eq!(coerce_number("-$20"), Some(-20.0));
        assert_eq!(coerce_number("1e3"), Some(1000.0));
    }

    #[test]
    fn test_non_numbers_fall_back_to_text() {
        assert_eq!(coerce_number("abc"), None);
        assert_eq!(coerce_number("1,2"), None);
        assert_eq!(coerce_number("NaN"), None);
        assert_eq!(coerce_number("inf"), None);
        assert_eq!(coerce_number("12abc"), None);
        assert_eq!(Scalar::from_cell("  hello "), Scalar::Text("hello".to_string()));
    }

    #[test]
    fn test_dates() {
        assert!(parse_date("2024-03-01").is_some());
        assert!(parse_date("2024-03-01 10:30:00").is_some());
        assert!(parse_date("03/15/2024").is_some());
        assert!(parse_date("2024-03-01T10:30:00Z").is_some());
        assert!(parse_date("20240301").is_none());
        assert!(parse_date("hello world").is_none());
    }

    #[test]
    fn test_display_integral_numbers() {
        assert_eq!(Scalar::Number(3.0).to_string(), "3");
        assert_eq!(Scalar::Number(2.5).to_string(), "2.5");
        assert_eq!(Scalar::Null.to_string(), "");
    }
}
