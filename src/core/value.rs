// src/core/value.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValueError {
    #[error("cannot parse '{raw}' as {kind}")]
    Parse { kind: ValueKind, raw: String },
}

/// The type tag a flag declares for its value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Uint,
    Float,
    Str,
    StrList,
    Duration,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Float => "float",
            Self::Str => "string",
            Self::StrList => "string list",
            Self::Duration => "duration",
        };
        f.write_str(name)
    }
}

/// A typed value held by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    StrList(Vec<String>),
    Duration(Duration),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Uint(_) => ValueKind::Uint,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::StrList(_) => ValueKind::StrList,
            Self::Duration(_) => ValueKind::Duration,
        }
    }

    /// Parses a raw token into a value of the requested kind.
    pub fn parse(kind: ValueKind, raw: &str) -> Result<Self, ValueError> {
        let err = || ValueError::Parse {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            ValueKind::Bool => parse_bool(raw).map(Self::Bool).ok_or_else(err),
            ValueKind::Int => raw.parse::<i64>().map(Self::Int).map_err(|_| err()),
            ValueKind::Uint => raw.parse::<u64>().map(Self::Uint).map_err(|_| err()),
            ValueKind::Float => raw.parse::<f64>().map(Self::Float).map_err(|_| err()),
            ValueKind::Str => Ok(Self::Str(raw.to_string())),
            ValueKind::StrList => Ok(Self::StrList(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            )),
            ValueKind::Duration => parse_duration(raw).map(Self::Duration).ok_or_else(err),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Str(s) => parse_bool(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Uint(u) => i64::try_from(*u).ok(),
            Self::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(u) => Some(*u),
            Self::Int(i) => u64::try_from(*i).ok(),
            Self::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Uint(u) => Some(*u as f64),
            Self::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            Self::StrList(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(d) => Some(*d),
            Self::Str(s) => parse_duration(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Uint(u) => write!(f, "{}", u),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => f.write_str(s),
            Self::StrList(l) => f.write_str(&l.join(",")),
            Self::Duration(d) => write!(f, "{}s", d.as_secs_f64()),
        }
    }
}

/// Accepts the usual configuration spellings of a boolean.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" => Some(true),
        "0" | "false" | "no" | "off" | "n" => Some(false),
        _ => None,
    }
}

/// Parses a compound duration literal such as `300ms`, `1h2m3s` or `2.5s`.
/// A bare number is taken as seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<f64>() {
        if secs < 0.0 {
            return None;
        }
        return Some(Duration::from_secs_f64(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None; // A unit with no leading number.
        }
        let (num_str, tail) = rest.split_at(digits_end);
        let number: f64 = num_str.parse().ok()?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);
        let secs_per_unit = match unit {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            _ => return None,
        };
        let part = number * secs_per_unit;
        if part < 0.0 {
            return None;
        }
        total += Duration::from_secs_f64(part);
        rest = next;
    }
    Some(total)
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_values() {
        assert_eq!(Value::parse(ValueKind::Int, "-42").unwrap(), Value::Int(-42));
        assert_eq!(Value::parse(ValueKind::Uint, "42").unwrap(), Value::Uint(42));
        assert_eq!(
            Value::parse(ValueKind::Float, "2.75").unwrap(),
            Value::Float(2.75)
        );
        assert_eq!(
            Value::parse(ValueKind::Str, "hello").unwrap(),
            Value::Str("hello".to_string())
        );
    }

    #[test]
    fn test_parse_bool_spellings() {
        for raw in ["true", "1", "yes", "ON"] {
            assert_eq!(Value::parse(ValueKind::Bool, raw).unwrap(), Value::Bool(true));
        }
        for raw in ["false", "0", "no", "Off"] {
            assert_eq!(
                Value::parse(ValueKind::Bool, raw).unwrap(),
                Value::Bool(false)
            );
        }
        assert!(Value::parse(ValueKind::Bool, "maybe").is_err());
    }

    #[test]
    fn test_parse_string_list_splits_on_commas() {
        let v = Value::parse(ValueKind::StrList, "a, b,,c").unwrap();
        assert_eq!(
            v,
            Value::StrList(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_parse_duration_compound() {
        assert_eq!(parse_duration("1h2m3s"), Some(Duration::from_secs(3723)));
        assert_eq!(parse_duration("300ms"), Some(Duration::from_millis(300)));
        assert_eq!(parse_duration("2.5s"), Some(Duration::from_millis(2500)));
        // A bare number is seconds.
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("3x"), None);
        assert_eq!(parse_duration("ms"), None);
    }

    #[test]
    fn test_parse_failure_names_kind_and_token() {
        let err = Value::parse(ValueKind::Int, "twelve").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("twelve"));
        assert!(message.contains("int"));
    }

    #[test]
    fn test_numeric_coercions() {
        assert_eq!(Value::Uint(7).as_int(), Some(7));
        assert_eq!(Value::Int(-1).as_uint(), None);
        assert_eq!(Value::Str("250ms".to_string()).as_duration(), Some(Duration::from_millis(250)));
    }
}
