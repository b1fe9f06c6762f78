//! Expression evaluation. Pure: reads bindings, calls built-in functions,
//! never performs I/O.

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::functions;
use crate::value::{as_condition, as_number, compare, loosely_equal, Value};
use basic_dialog_parser::ast::{BinOp, Expr, Spanned, UnaryOp};
use basic_dialog_parser::parser::MAX_NESTING_DEPTH;
use chrono::{NaiveDate, TimeDelta};
use std::cmp::Ordering;

pub fn eval(expr: &Spanned<Expr>, ctx: &ExecutionContext) -> Result<Value, RuntimeError> {
    eval_at(expr, ctx, 0)
}

fn eval_at(expr: &Spanned<Expr>, ctx: &ExecutionContext, depth: usize) -> Result<Value, RuntimeError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(RuntimeError::ExpressionTooDeep(MAX_NESTING_DEPTH));
    }
    match &expr.node {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Boolean(*b)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Var(name) => ctx.get(name).cloned(),
        Expr::List(items) => items
            .iter()
            .map(|item| eval_at(item, ctx, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Member { object, field } => member(eval_at(object, ctx, depth + 1)?, field),
        Expr::Index { object, index } => index_into(
            eval_at(object, ctx, depth + 1)?,
            eval_at(index, ctx, depth + 1)?,
        ),
        Expr::Call { name, args } => {
            let args = args
                .iter()
                .map(|arg| eval_at(arg, ctx, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            functions::call(name, &args)
        }
        Expr::Unary { op, operand } => {
            let value = eval_at(operand, ctx, depth + 1)?;
            match op {
                UnaryOp::Neg => Ok(Value::Number(-as_number(&value)?)),
                UnaryOp::Not => Ok(Value::Boolean(!as_condition(&value)?)),
            }
        }
        Expr::Binary { op, left, right } => match op {
            BinOp::And => {
                if !as_condition(&eval_at(left, ctx, depth + 1)?)? {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(as_condition(&eval_at(right, ctx, depth + 1)?)?))
            }
            BinOp::Or => {
                if as_condition(&eval_at(left, ctx, depth + 1)?)? {
                    return Ok(Value::Boolean(true));
                }
                Ok(Value::Boolean(as_condition(&eval_at(right, ctx, depth + 1)?)?))
            }
            _ => binary(*op, eval_at(left, ctx, depth + 1)?, eval_at(right, ctx, depth + 1)?),
        },
    }
}

/// Evaluate as a condition.
pub fn condition(expr: &Spanned<Expr>, ctx: &ExecutionContext) -> Result<bool, RuntimeError> {
    Ok(as_condition(&eval(expr, ctx)?)?)
}

/// Field access on maps: exact key first, then case-insensitive. Missing
/// fields and fields of null are null.
fn member(object: Value, field: &str) -> Result<Value, RuntimeError> {
    match object {
        Value::Map(mut entries) => {
            if let Some(value) = entries.shift_remove(field) {
                return Ok(value);
            }
            Ok(entries
                .into_iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(field))
                .map(|(_, value)| value)
                .unwrap_or_default())
        }
        Value::Null => Ok(Value::Null),
        other => Err(RuntimeError::TypeMismatch(format!(
            "cannot read field '{}' of a {}",
            field,
            other.type_name()
        ))),
    }
}

fn index_into(object: Value, index: Value) -> Result<Value, RuntimeError> {
    match object {
        Value::List(items) => {
            let i = as_number(&index)?;
            if i < 0.0 || i.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(items.into_iter().nth(i as usize).unwrap_or_default())
        }
        Value::Map(entries) => member(Value::Map(entries), &index.to_string()),
        Value::Null => Ok(Value::Null),
        other => Err(RuntimeError::TypeMismatch(format!(
            "cannot index into a {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    match op {
        BinOp::Eq => Ok(Value::Boolean(loosely_equal(&left, &right))),
        BinOp::Ne => Ok(Value::Boolean(!loosely_equal(&left, &right))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(&left, &right).ok_or_else(|| {
                RuntimeError::TypeMismatch(format!(
                    "cannot compare {} with {}",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(Value::Boolean(match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Le => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinOp::Concat => Ok(Value::String(format!("{left}{right}"))),
        BinOp::Add => add(left, right),
        BinOp::Sub => match (&left, &right) {
            (Value::Date(a), Value::Date(b)) => Ok(Value::Number((*a - *b).num_days() as f64)),
            (Value::Date(d), other) => shift_date(*d, -as_number(other)?),
            _ => Ok(Value::Number(as_number(&left)? - as_number(&right)?)),
        },
        BinOp::Mul => Ok(Value::Number(as_number(&left)? * as_number(&right)?)),
        BinOp::Div => {
            let divisor = as_number(&right)?;
            if divisor == 0.0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(Value::Number(as_number(&left)? / divisor))
        }
        BinOp::Mod => {
            let divisor = as_number(&right)?;
            if divisor == 0.0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(Value::Number(as_number(&left)? % divisor))
        }
        BinOp::Pow => Ok(Value::Number(as_number(&left)?.powf(as_number(&right)?))),
        BinOp::And => Ok(Value::Boolean(as_condition(&left)? && as_condition(&right)?)),
        BinOp::Or => Ok(Value::Boolean(as_condition(&left)? || as_condition(&right)?)),
    }
}

/// `+` adds when both sides are numeric, shifts dates by days, appends to
/// lists, and otherwise concatenates text.
fn add(left: Value, right: Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Date(d), other) | (other, Value::Date(d)) => shift_date(d, as_number(&other)?),
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (Value::List(mut a), item) => {
            a.push(item);
            Ok(Value::List(a))
        }
        (left, right) => match (as_number(&left), as_number(&right)) {
            (Ok(a), Ok(b)) => Ok(Value::Number(a + b)),
            _ if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) => {
                Ok(Value::String(format!("{left}{right}")))
            }
            _ => Err(RuntimeError::TypeMismatch(format!(
                "cannot add {} and {}",
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

fn shift_date(date: NaiveDate, days: f64) -> Result<Value, RuntimeError> {
    let out_of_range = || RuntimeError::InvalidArgument {
        function: "date arithmetic".to_string(),
        message: format!("{date} + {days} days is out of range"),
    };
    if !days.is_finite() {
        return Err(out_of_range());
    }
    // `as` saturates, so huge values fall through to `try_days` rejecting them.
    TimeDelta::try_days(days.trunc() as i64)
        .and_then(|delta| date.checked_add_signed(delta))
        .map(Value::Date)
        .ok_or_else(out_of_range)
}
