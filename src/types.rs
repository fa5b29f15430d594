//! Data types: value kinds and per-type parsing/validation rules.
//!
//! A `DataType` is referenced by name from field definitions. Parsing returns
//! a normalized `serde_json::Value` or a human-readable failure message; the
//! caller routes messages into its collector.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The value kind a data type ultimately yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
}

impl ValueType {
    /// PostgreSQL type name used for parameter casts (e.g. `$3::timestamptz`).
    pub fn pg_cast(self) -> Option<&'static str> {
        match self {
            ValueType::Text => None,
            ValueType::Integer => Some("bigint"),
            ValueType::Decimal => Some("numeric"),
            ValueType::Boolean => Some("boolean"),
            ValueType::Date => Some("date"),
            ValueType::Timestamp => Some("timestamptz"),
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Decimal)
    }
}

/// A named, resolved data type: value kind plus validation rules.
#[derive(Clone, Debug)]
pub struct DataType {
    pub name: String,
    pub value_type: ValueType,
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub pattern: Option<Regex>,
}

impl DataType {
    /// Built-in types available without any declaration.
    pub fn builtins() -> Vec<DataType> {
        ["_text", "_number", "_decimal", "_boolean", "_date", "_timestamp"]
            .iter()
            .map(|name| DataType {
                name: (*name).to_string(),
                value_type: match *name {
                    "_number" => ValueType::Integer,
                    "_decimal" => ValueType::Decimal,
                    "_boolean" => ValueType::Boolean,
                    "_date" => ValueType::Date,
                    "_timestamp" => ValueType::Timestamp,
                    _ => ValueType::Text,
                },
                min_length: None,
                max_length: None,
                min_value: None,
                max_value: None,
                pattern: None,
            })
            .collect()
    }

    /// Parse a textual value into a normalized JSON value.
    pub fn parse_text(&self, raw: &str) -> Result<Value, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(format!("empty value is not a valid {}", self.name));
        }
        match self.value_type {
            ValueType::Text => self.check_text(raw).map(|_| Value::String(raw.to_string())),
            ValueType::Integer => {
                let n: i64 = raw
                    .parse()
                    .map_err(|_| format!("'{}' is not a whole number", raw))?;
                self.check_range(n as f64)?;
                Ok(Value::Number(n.into()))
            }
            ValueType::Decimal => {
                let n: f64 = raw
                    .parse()
                    .map_err(|_| format!("'{}' is not a number", raw))?;
                self.check_range(n)?;
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{}' is not a representable number", raw))
            }
            ValueType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", raw)),
            },
            ValueType::Date => {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| format!("'{}' is not a date (expected yyyy-mm-dd)", raw))?;
                Ok(Value::String(raw.to_string()))
            }
            ValueType::Timestamp => {
                if chrono::DateTime::parse_from_rfc3339(raw).is_err()
                    && NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").is_err()
                {
                    return Err(format!("'{}' is not a timestamp", raw));
                }
                Ok(Value::String(raw.to_string()))
            }
        }
    }

    /// Parse an already-typed JSON value; strings go through `parse_text`.
    pub fn parse_object(&self, v: &Value) -> Result<Value, String> {
        match v {
            Value::Null => Err("null".into()),
            Value::String(s) => self.parse_text(s),
            Value::Bool(b) => {
                if self.value_type == ValueType::Boolean {
                    Ok(Value::Bool(*b))
                } else {
                    Err(format!("boolean supplied where {} expected", self.name))
                }
            }
            Value::Number(n) => match self.value_type {
                ValueType::Integer => {
                    let i = n
                        .as_i64()
                        .ok_or_else(|| format!("'{}' is not a whole number", n))?;
                    self.check_range(i as f64)?;
                    Ok(Value::Number(i.into()))
                }
                ValueType::Decimal => {
                    let f = n.as_f64().ok_or_else(|| format!("'{}' is not a number", n))?;
                    self.check_range(f)?;
                    Ok(v.clone())
                }
                ValueType::Text => Ok(Value::String(n.to_string())),
                _ => Err(format!("number supplied where {} expected", self.name)),
            },
            Value::Array(_) | Value::Object(_) => {
                Err(format!("structured value supplied where {} expected", self.name))
            }
        }
    }

    fn check_text(&self, s: &str) -> Result<(), String> {
        if let Some(min) = self.min_length {
            if s.len() < min as usize {
                return Err(format!("must be at least {} characters", min));
            }
        }
        if let Some(max) = self.max_length {
            if s.len() > max as usize {
                return Err(format!("must be at most {} characters", max));
            }
        }
        if let Some(re) = &self.pattern {
            if !re.is_match(s) {
                return Err("does not match the required pattern".into());
            }
        }
        Ok(())
    }

    fn check_range(&self, n: f64) -> Result<(), String> {
        if let Some(min) = self.min_value {
            if n < min {
                return Err(format!("must be at least {}", min));
            }
        }
        if let Some(max) = self.max_value {
            if n > max {
                return Err(format!("must be at most {}", max));
            }
        }
        Ok(())
    }
}
