//! Raw column values as delivered by the sample store
//!
//! Warehouse rows arrive loosely typed (numbers, booleans, text codes, NULLs).
//! `Value` carries them untouched until the loader enforces feature types.

use serde::{Deserialize, Serialize};

/// Raw column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL / absent
    Null,
    /// Boolean value
    Bool(bool),
    /// Number value (f64 handles both int and float columns)
    Number(f64),
    /// Text value (category codes, numeric strings)
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Numeric view used for model features.
    ///
    /// Booleans map to 1.0 / 0.0, numeric strings are parsed, NULL and NaN are `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) if n.is_nan() => None,
            Value::Number(n) => Some(*n),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" => Some(1.0),
                "false" | "f" => Some(0.0),
                other => other.parse::<f64>().ok(),
            },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_coerces_to_unit_interval() {
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::Bool(false).as_f64(), Some(0.0));
    }

    #[test]
    fn test_null_and_nan_are_missing() {
        assert!(Value::Null.is_null());
        assert!(Value::Number(f64::NAN).is_null());
        assert_eq!(Value::Number(f64::NAN).as_f64(), None);
        assert_eq!(Value::Null.as_f64(), None);
    }

    #[test]
    fn test_numeric_strings_are_parsed() {
        assert_eq!(Value::from("12.5").as_f64(), Some(12.5));
        assert_eq!(Value::from("true").as_f64(), Some(1.0));
        assert_eq!(Value::from("M").as_f64(), None);
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<f64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(3.0)), Value::Number(3.0));
    }
}
