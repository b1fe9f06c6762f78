//! Runtime values and the coercion rules shared by parameter binding,
//! input validation, and expression evaluation.
//!
//! Every conversion between a [`Value`] and a declared [`ParamType`] goes
//! through [`coerce`]. Conditions use it with [`ParamType::Boolean`],
//! arithmetic with [`ParamType::Number`], and tool arguments with the
//! parameter's declared type.

use basic_dialog_parser::ast::{format_number, ParamType};
use chrono::NaiveDate;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Date layouts accepted when a string is coerced to a date, tried in order.
pub const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d %b %Y", "%d %B %Y",
];

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("valid email regex")
});

/// A dynamically typed script value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    #[default]
    Null,
    String(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Null, blank strings, and empty collections.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            Value::Number(_) | Value::Boolean(_) | Value::Date(_) => false,
        }
    }

    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::String(s) => f.write_str(s),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

// ============================================================================
// Coercion
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert {found} '{value}' to {target}")]
pub struct CoercionError {
    pub value: String,
    pub found: &'static str,
    pub target: ParamType,
}

impl CoercionError {
    fn new(value: &Value, target: ParamType) -> Self {
        let mut shown = value.to_string();
        if shown.chars().count() > 40 {
            shown = shown.chars().take(40).collect::<String>() + "...";
        }
        Self {
            value: shown,
            found: value.type_name(),
            target,
        }
    }
}

/// Convert `value` to the representation of `target`.
///
/// | Target | Accepts |
/// |--------|---------|
/// | `String` | anything, via its display form |
/// | `Number` | numbers, numeric strings, booleans as 1/0 |
/// | `Integer` | as `Number`, without a fractional part |
/// | `Boolean` | booleans, numbers (non-zero), `true/yes/y/on/1`, `false/no/n/off/0/""`, null |
/// | `Date` | dates, strings in one of [`DATE_FORMATS`] |
/// | `Email` | well-formed addresses, lower-cased |
/// | `Phone` | 10 to 15 digits with optional `+ - ( ) .` and spaces |
pub fn coerce(value: &Value, target: ParamType) -> Result<Value, CoercionError> {
    let fail = || CoercionError::new(value, target);
    match target {
        ParamType::String => Ok(Value::String(value.to_string())),
        ParamType::Number => to_number(value).map(Value::Number).ok_or_else(fail),
        ParamType::Integer => match to_number(value) {
            Some(n) if n.fract() == 0.0 => Ok(Value::Number(n)),
            _ => Err(fail()),
        },
        ParamType::Boolean => to_boolean(value).map(Value::Boolean).ok_or_else(fail),
        ParamType::Date => to_date(value).map(Value::Date).ok_or_else(fail),
        ParamType::Email => match value {
            Value::String(s) if EMAIL.is_match(s.trim()) => Ok(Value::String(s.trim().to_lowercase())),
            _ => Err(fail()),
        },
        ParamType::Phone => match value {
            Value::String(_) | Value::Number(_) => normalize_phone(&value.to_string())
                .map(Value::String)
                .ok_or_else(fail),
            _ => Err(fail()),
        },
    }
}

/// Coerce to a boolean, as conditions do.
pub fn as_condition(value: &Value) -> Result<bool, CoercionError> {
    match coerce(value, ParamType::Boolean)? {
        Value::Boolean(b) => Ok(b),
        _ => Err(CoercionError::new(value, ParamType::Boolean)),
    }
}

/// Coerce to a number, as arithmetic does.
pub fn as_number(value: &Value) -> Result<f64, CoercionError> {
    match coerce(value, ParamType::Number)? {
        Value::Number(n) => Ok(n),
        _ => Err(CoercionError::new(value, ParamType::Number)),
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
        }
        _ => None,
    }
}

fn to_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Boolean(b) => Some(*b),
        Value::Number(n) => Some(*n != 0.0),
        Value::Null => Some(false),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "on" | "1" => Some(true),
            "false" | "no" | "n" | "off" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::String(s) => parse_date(s.trim()),
        _ => None,
    }
}

pub(crate) fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

fn normalize_phone(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || " +-().".contains(c))
    {
        return None;
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if !(10..=15).contains(&digits.len()) {
        return None;
    }
    if trimmed.starts_with('+') {
        Some(format!("+{}", digits))
    } else {
        Some(digits)
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// Equality as `=` and `SELECT CASE` see it: operands of different types
/// are compared after coercing the other side to the typed one.
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), other) | (other, Value::Number(x)) => to_number(other) == Some(*x),
        (Value::Boolean(x), other) | (other, Value::Boolean(x)) => to_boolean(other) == Some(*x),
        (Value::Date(x), other) | (other, Value::Date(x)) => to_date(other) == Some(*x),
        (Value::List(_), Value::List(_)) | (Value::Map(_), Value::Map(_)) => a == b,
        _ => false,
    }
}

/// Ordering for `<`, `<=`, `>`, `>=`; `None` when the operands are not comparable.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::String(x), Value::String(y)) => match (to_number(a), to_number(b)) {
            (Some(n), Some(m)) => n.partial_cmp(&m),
            _ => Some(x.cmp(y)),
        },
        (Value::Number(x), other) => to_number(other).and_then(|y| x.partial_cmp(&y)),
        (other, Value::Number(y)) => to_number(other).and_then(|x| x.partial_cmp(y)),
        (Value::Date(x), other) => to_date(other).map(|y| x.cmp(&y)),
        (other, Value::Date(y)) => to_date(other).map(|x| x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_coerce_to_number() {
        assert_eq!(coerce(&"42".into(), ParamType::Number), Ok(Value::Number(42.0)));
        assert_eq!(coerce(&" 2.5 ".into(), ParamType::Number), Ok(Value::Number(2.5)));
        assert_eq!(coerce(&true.into(), ParamType::Number), Ok(Value::Number(1.0)));
        assert!(coerce(&"abc".into(), ParamType::Number).is_err());
        assert!(coerce(&"".into(), ParamType::Number).is_err());
        assert!(coerce(&"NaN".into(), ParamType::Number).is_err());
        assert!(coerce(&Value::Null, ParamType::Number).is_err());
    }

    #[test]
    fn test_coerce_to_integer_rejects_fractions() {
        assert_eq!(coerce(&"7".into(), ParamType::Integer), Ok(Value::Number(7.0)));
        let err = coerce(&Value::Number(7.5), ParamType::Integer).unwrap_err();
        assert_eq!(err.target, ParamType::Integer);
        assert_eq!(err.to_string(), "cannot convert number '7.5' to INTEGER");
    }

    #[test]
    fn test_coerce_to_boolean() {
        assert_eq!(as_condition(&"Yes".into()), Ok(true));
        assert_eq!(as_condition(&"off".into()), Ok(false));
        assert_eq!(as_condition(&Value::Number(0.0)), Ok(false));
        assert_eq!(as_condition(&Value::Number(-3.0)), Ok(true));
        assert_eq!(as_condition(&Value::Null), Ok(false));
        assert!(as_condition(&"maybe".into()).is_err());
        assert!(as_condition(&Value::List(vec![])).is_err());
    }

    #[test]
    fn test_coerce_to_date() {
        assert_eq!(coerce(&"2024-03-01".into(), ParamType::Date), Ok(Value::Date(date(2024, 3, 1))));
        assert_eq!(coerce(&"01/03/2024".into(), ParamType::Date), Ok(Value::Date(date(2024, 3, 1))));
        assert_eq!(coerce(&"1 Mar 2024".into(), ParamType::Date), Ok(Value::Date(date(2024, 3, 1))));
        assert!(coerce(&"2024-13-01".into(), ParamType::Date).is_err());
    }

    #[test]
    fn test_coerce_email_and_phone() {
        assert_eq!(
            coerce(&" Ana@Example.COM ".into(), ParamType::Email),
            Ok(Value::String("ana@example.com".into()))
        );
        assert!(coerce(&"not-an-email".into(), ParamType::Email).is_err());
        assert_eq!(
            coerce(&"+55 (21) 99999-0000".into(), ParamType::Phone),
            Ok(Value::String("+5521999990000".into()))
        );
        assert!(coerce(&"12345".into(), ParamType::Phone).is_err());
        assert!(coerce(&"call me maybe".into(), ParamType::Phone).is_err());
    }

    #[test]
    fn test_coerce_to_string_uses_display() {
        assert_eq!(coerce(&Value::Number(3.0), ParamType::String), Ok("3".into()));
        assert_eq!(coerce(&Value::Null, ParamType::String), Ok("".into()));
        assert_eq!(
            coerce(&Value::List(vec!["a".into(), Value::Number(1.5)]), ParamType::String),
            Ok("a, 1.5".into())
        );
    }

    #[test]
    fn test_loose_equality() {
        assert!(loosely_equal(&"10".into(), &Value::Number(10.0)));
        assert!(loosely_equal(&Value::Boolean(true), &"yes".into()));
        assert!(loosely_equal(&Value::Null, &"".into()));
        assert!(!loosely_equal(&"a".into(), &"A".into()));
        assert!(loosely_equal(&Value::Date(date(2024, 1, 2)), &"2024-01-02".into()));
    }

    #[test]
    fn test_compare() {
        assert_eq!(compare(&"9".into(), &"10".into()), Some(Ordering::Less));
        assert_eq!(compare(&"apple".into(), &"banana".into()), Some(Ordering::Less));
        assert_eq!(compare(&"20".into(), &Value::Number(18.0)), Some(Ordering::Greater));
        assert_eq!(compare(&Value::List(vec![]), &Value::Number(1.0)), None);
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"name": "Ana", "age": 30, "tags": ["a", "b"], "ok": true, "none": null});
        let value = Value::from_json(json.clone());
        let Value::Map(entries) = &value else {
            panic!("expected map");
        };
        assert_eq!(entries["age"], Value::Number(30.0));
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_continuation_serialization_is_tagged() {
        let json = serde_json::to_string(&Value::Number(1.0)).unwrap();
        assert_eq!(json, r#"{"type":"number","value":1.0}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Number(1.0));
    }
}
