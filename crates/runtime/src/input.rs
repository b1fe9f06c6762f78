//! Validation of user replies to `HEAR`.
//!
//! A reply either becomes the value bound to the `HEAR` variable or is
//! rejected with a re-prompt that is sent back to the user.

use crate::value::{coerce, parse_date, Value};
use basic_dialog_parser::ast::ParamType;
use chrono::{Duration, Local};
use regex::Regex;
use std::sync::LazyLock;

/// What a pending `HEAR` accepts, with menu options already evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    Any,
    Typed(ParamType),
    Menu(Vec<String>),
}

/// `1,234,567`: commas only between complete groups of three digits.
static THOUSANDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?\d{1,3}(,\d{3})+$").expect("thousands pattern is valid")
});

const TRUE_WORDS: &[&str] = &[
    "yes", "y", "true", "1", "ok", "okay", "sure", "yeah", "yep", "confirm", "confirmed", "agree",
];
const FALSE_WORDS: &[&str] = &[
    "no", "n", "false", "0", "nope", "cancel", "deny", "reject", "disagree",
];

/// Validate `input` against `expected`; `Err` carries the re-prompt.
pub fn validate(input: &str, expected: &Expected) -> Result<Value, String> {
    let trimmed = input.trim();
    match expected {
        Expected::Any => Ok(Value::String(trimmed.to_string())),
        Expected::Typed(ty) => validate_typed(trimmed, *ty),
        Expected::Menu(options) => validate_menu(trimmed, options),
    }
}

fn validate_typed(input: &str, ty: ParamType) -> Result<Value, String> {
    let raw = Value::String(input.to_string());
    match ty {
        ParamType::String => {
            if input.is_empty() {
                Err(reprompt(ty))
            } else {
                Ok(raw)
            }
        }
        ParamType::Integer => {
            let mut cleaned: String = input.chars().filter(|c| !matches!(c, ' ' | '_')).collect();
            if THOUSANDS.is_match(&cleaned) {
                cleaned.retain(|c| c != ',');
            }
            coerce(&Value::String(cleaned), ty).map_err(|_| reprompt(ty))
        }
        ParamType::Number => {
            let cleaned = input.replace(' ', "").replace(',', ".");
            coerce(&Value::String(cleaned), ty).map_err(|_| reprompt(ty))
        }
        ParamType::Boolean => {
            let lower = input.to_lowercase();
            let word = if TRUE_WORDS.contains(&lower.as_str()) {
                "true"
            } else if FALSE_WORDS.contains(&lower.as_str()) {
                "false"
            } else {
                return Err(reprompt(ty));
            };
            coerce(&Value::from(word), ty).map_err(|_| reprompt(ty))
        }
        ParamType::Date => {
            let today = Local::now().date_naive();
            let date = match input.to_lowercase().as_str() {
                "today" => Some(today),
                "tomorrow" => Some(today + Duration::days(1)),
                "yesterday" => Some(today - Duration::days(1)),
                _ => parse_date(input),
            };
            date.map(Value::Date).ok_or_else(|| reprompt(ty))
        }
        ParamType::Email | ParamType::Phone => coerce(&raw, ty).map_err(|_| reprompt(ty)),
    }
}

/// Exact text (case-insensitive), then 1-based position, then a unique substring.
fn validate_menu(input: &str, options: &[String]) -> Result<Value, String> {
    let lower = input.to_lowercase();

    if let Some(option) = options.iter().find(|o| o.to_lowercase() == lower) {
        return Ok(Value::String(option.clone()));
    }

    if let Ok(n) = lower.parse::<usize>() {
        if (1..=options.len()).contains(&n) {
            return Ok(Value::String(options[n - 1].clone()));
        }
    }

    if !lower.is_empty() {
        let mut matches = options.iter().filter(|o| o.to_lowercase().contains(&lower));
        if let (Some(only), None) = (matches.next(), matches.next()) {
            return Ok(Value::String(only.clone()));
        }
    }

    Err(format!("Please choose one of: {}", options.join(", ")))
}

fn reprompt(ty: ParamType) -> String {
    match ty {
        ParamType::String => "Please type a reply.",
        ParamType::Number => "Please enter a number.",
        ParamType::Integer => "Please enter a whole number.",
        ParamType::Boolean => "Please answer yes or no.",
        ParamType::Date => "Please enter a date, for example 2024-12-31.",
        ParamType::Email => "Please enter a valid email address.",
        ParamType::Phone => "Please enter a phone number with 10 to 15 digits.",
    }
    .to_string()
}
