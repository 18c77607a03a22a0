use std::fmt;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Tokens the nflverse exports (and pandas before them) use for "no value".
pub const MISSING_TOKENS: &[&str] = &["NA", "NaN", "nan", "None", "NULL", "null", "N/A"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Returns the trimmed cell, or `None` when the cell carries no value.
pub fn present(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || MISSING_TOKENS.contains(&trimmed) {
        None
    } else {
        Some(trimmed)
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Parses any timestamp shape seen across the releases. Offsets are folded
/// into UTC; bare dates become midnight.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_utc());
    }
    if let Ok(parsed) = parse_naive_datetime(value) {
        return Ok(parsed);
    }
    let date = parse_naive_date(value)?;
    date.and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("Failed to build midnight for '{value}'"))
}

/// Parses integer or float text into an `i64`, truncating finite floats
/// toward zero.
pub fn parse_integer(value: &str) -> Option<i64> {
    if let Ok(parsed) = value.parse::<i64>() {
        return Some(parsed);
    }
    let float = value.parse::<f64>().ok()?;
    if !float.is_finite() || float.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(float.trunc() as i64)
}

pub fn parse_float(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Numeric indicator codes: exactly 1 is true, exactly 0 is false.
pub fn parse_indicator(value: &str) -> Option<bool> {
    let number = value.parse::<f64>().ok()?;
    if number == 1.0 {
        Some(true)
    } else if number == 0.0 {
        Some(false)
    } else {
        None
    }
}

/// Renders a key component so `15` and `15.0` produce the same key.
pub fn key_component(raw: &str) -> String {
    if let Ok(float) = raw.parse::<f64>()
        && float.is_finite()
        && float.fract() == 0.0
        && !raw.contains(['e', 'E'])
        && raw.contains('.')
    {
        return (float as i64).to_string();
    }
    raw.to_string()
}
