//! Built-in pure functions callable from expressions, e.g. `LEN(name)`.
//!
//! Names arrive upper-cased from the parser. String positions are 1-based
//! and count characters, not bytes.

use crate::error::RuntimeError;
use crate::value::{as_number, coerce, Value};
use basic_dialog_parser::ast::{format_number, ParamType};
use chrono::{Datelike, Local, NaiveDate};
use std::fmt::Write;

pub const FUNCTIONS: &[&str] = &[
    "LEN", "UCASE", "LCASE", "TRIM", "LEFT", "RIGHT", "MID", "INSTR", "REPLACE", "VAL", "STR",
    "INT", "ROUND", "ABS", "NOW", "TODAY", "YEAR", "MONTH", "DAY", "ISEMPTY", "SPLIT", "JOIN",
    "FIRST", "LAST", "COUNT", "FORMAT",
];

pub fn call(name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let value = match name {
        "LEN" => {
            arity(name, args, 1, 1)?;
            let len = match &args[0] {
                Value::List(items) => items.len(),
                Value::Map(entries) => entries.len(),
                other => other.to_string().chars().count(),
            };
            Value::Number(len as f64)
        }
        "UCASE" => {
            arity(name, args, 1, 1)?;
            Value::String(args[0].to_string().to_uppercase())
        }
        "LCASE" => {
            arity(name, args, 1, 1)?;
            Value::String(args[0].to_string().to_lowercase())
        }
        "TRIM" => {
            arity(name, args, 1, 1)?;
            Value::String(args[0].to_string().trim().to_string())
        }
        "LEFT" => {
            arity(name, args, 2, 2)?;
            let n = count(name, &args[1])?;
            Value::String(args[0].to_string().chars().take(n).collect())
        }
        "RIGHT" => {
            arity(name, args, 2, 2)?;
            let text: Vec<char> = args[0].to_string().chars().collect();
            let n = count(name, &args[1])?.min(text.len());
            Value::String(text[text.len() - n..].iter().collect())
        }
        "MID" => {
            arity(name, args, 2, 3)?;
            let start = count(name, &args[1])?.max(1) - 1;
            let source = args[0].to_string();
            let chars = source.chars().skip(start);
            let text: String = match args.get(2) {
                Some(len) => chars.take(count(name, len)?).collect(),
                None => chars.collect(),
            };
            Value::String(text)
        }
        "INSTR" => {
            arity(name, args, 2, 2)?;
            let haystack = args[0].to_string();
            let needle = args[1].to_string();
            let position = haystack
                .find(&needle)
                .map(|byte| haystack[..byte].chars().count() + 1)
                .unwrap_or(0);
            Value::Number(position as f64)
        }
        "REPLACE" => {
            arity(name, args, 3, 3)?;
            Value::String(
                args[0]
                    .to_string()
                    .replace(&args[1].to_string(), &args[2].to_string()),
            )
        }
        "VAL" => {
            arity(name, args, 1, 1)?;
            Value::Number(as_number(&args[0]).unwrap_or(0.0))
        }
        "STR" => {
            arity(name, args, 1, 1)?;
            Value::String(args[0].to_string())
        }
        "INT" => {
            arity(name, args, 1, 1)?;
            Value::Number(as_number(&args[0])?.floor())
        }
        "ROUND" => {
            arity(name, args, 1, 2)?;
            let n = as_number(&args[0])?;
            let digits = match args.get(1) {
                Some(d) => count(name, d)?,
                None => 0,
            };
            let scale = 10f64.powi(digits.min(15) as i32);
            Value::Number((n * scale).round() / scale)
        }
        "ABS" => {
            arity(name, args, 1, 1)?;
            Value::Number(as_number(&args[0])?.abs())
        }
        "NOW" => {
            arity(name, args, 0, 0)?;
            Value::String(Local::now().format("%Y-%m-%d %H:%M:%S").to_string())
        }
        "TODAY" => {
            arity(name, args, 0, 0)?;
            Value::Date(Local::now().date_naive())
        }
        "YEAR" | "MONTH" | "DAY" => {
            arity(name, args, 1, 1)?;
            let Value::Date(date) = coerce(&args[0], ParamType::Date)? else {
                return Err(invalid(name, "expected a date"));
            };
            let part = match name {
                "YEAR" => date.year() as f64,
                "MONTH" => date.month() as f64,
                _ => date.day() as f64,
            };
            Value::Number(part)
        }
        "ISEMPTY" => {
            arity(name, args, 1, 1)?;
            Value::Boolean(args[0].is_empty())
        }
        "SPLIT" => {
            arity(name, args, 2, 2)?;
            let separator = args[1].to_string();
            if separator.is_empty() {
                return Err(invalid(name, "separator must not be empty"));
            }
            Value::List(
                args[0]
                    .to_string()
                    .split(separator.as_str())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )
        }
        "JOIN" => {
            arity(name, args, 1, 2)?;
            let separator = args.get(1).map(|s| s.to_string()).unwrap_or_else(|| ", ".into());
            let Value::List(items) = &args[0] else {
                return Err(invalid(name, "expected a list"));
            };
            Value::String(
                items
                    .iter()
                    .map(|item| item.to_string())
                    .collect::<Vec<_>>()
                    .join(&separator),
            )
        }
        "FIRST" | "LAST" => {
            arity(name, args, 1, 1)?;
            let first = name == "FIRST";
            match &args[0] {
                Value::List(items) => {
                    let item = if first { items.first() } else { items.last() };
                    item.cloned().unwrap_or_default()
                }
                other => {
                    let text = other.to_string();
                    let mut words = text.split_whitespace();
                    let word = if first { words.next() } else { words.next_back() };
                    word.map(Value::from).unwrap_or_default()
                }
            }
        }
        "COUNT" => {
            arity(name, args, 1, 1)?;
            let n = match &args[0] {
                Value::List(items) => items.len(),
                Value::Map(entries) => entries.len(),
                Value::Null => 0,
                _ => 1,
            };
            Value::Number(n as f64)
        }
        "FORMAT" => {
            arity(name, args, 2, 2)?;
            format_value(&args[0], &args[1].to_string())?
        }
        _ => return Err(RuntimeError::UnknownFunction(name.to_string())),
    };
    Ok(value)
}

fn format_value(value: &Value, pattern: &str) -> Result<Value, RuntimeError> {
    if let Value::Date(date) = value {
        return format_date(*date, pattern);
    }
    if pattern.contains('%') {
        let Value::Date(date) = coerce(value, ParamType::Date)? else {
            return Err(invalid("FORMAT", "expected a date"));
        };
        return format_date(date, pattern);
    }

    // Numeric patterns like "0.00" or "#,##0.0": the digits after the
    // decimal point set the precision, a comma turns on grouping.
    let n = as_number(value)?;
    let decimals = pattern
        .split_once('.')
        .map(|(_, frac)| frac.chars().filter(|c| *c == '0' || *c == '#').count())
        .unwrap_or(0);
    let fixed = format!("{:.*}", decimals, n);
    if !pattern.contains(',') {
        return Ok(Value::String(fixed));
    }
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (fixed.clone(), None),
    };
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest.to_string()),
        None => ("", int_part),
    };
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    Ok(Value::String(match frac_part {
        Some(frac) => format!("{}{}.{}", sign, grouped, frac),
        None => format!("{}{}", sign, grouped),
    }))
}

fn format_date(date: NaiveDate, pattern: &str) -> Result<Value, RuntimeError> {
    let mut out = String::new();
    write!(out, "{}", date.format(pattern))
        .map_err(|_| invalid("FORMAT", &format!("invalid date pattern '{}'", pattern)))?;
    Ok(Value::String(out))
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(invalid(
            name,
            &format!("expects {} argument(s), got {}", expected, args.len()),
        ));
    }
    Ok(())
}

/// A non-negative whole number argument.
fn count(name: &str, value: &Value) -> Result<usize, RuntimeError> {
    let n = as_number(value)?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(invalid(
            name,
            &format!("expected a whole number, got {}", format_number(n)),
        ));
    }
    Ok(n as usize)
}

fn invalid(function: &str, message: &str) -> RuntimeError {
    RuntimeError::InvalidArgument {
        function: function.to_string(),
        message: message.to_string(),
    }
}
