// Built-in formula function library

use super::ast::Expr;
use super::eval::Evaluator;
use crate::document::CellValue;
use crate::error::{CellDbError, Result};
use chrono::{Datelike, Days, Months, NaiveDate};
use std::collections::HashMap;

/// Names of every built-in function
pub const BUILTIN_FUNCTIONS: &[&str] = &[
    "if", "concat", "length", "lower", "upper", "contains", "replace", "trim", "abs", "round",
    "floor", "ceil", "min", "max", "sqrt", "pow", "now", "dateAdd", "dateDiff", "toNumber",
    "toString", "empty",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&name)
}

pub(crate) fn call(
    evaluator: &Evaluator,
    name: &str,
    args: &[Expr],
    context: &HashMap<String, CellValue>,
) -> Result<CellValue> {
    // `if` only evaluates the branch it takes
    if name == "if" {
        check_arity(name, args.len(), 2, Some(3))?;
        let condition = evaluator.evaluate(&args[0], context)?;
        return if condition.is_truthy() {
            evaluator.evaluate(&args[1], context)
        } else if let Some(otherwise) = args.get(2) {
            evaluator.evaluate(otherwise, context)
        } else {
            Ok(CellValue::Null)
        };
    }

    if !is_builtin(name) {
        return Err(CellDbError::eval(format!("Unknown function: {name}")));
    }

    let (min, max) = arity(name);
    check_arity(name, args.len(), min, max)?;

    let values = args
        .iter()
        .map(|arg| evaluator.evaluate(arg, context))
        .collect::<Result<Vec<_>>>()?;

    apply(evaluator, name, &values)
}

/// Minimum and (if bounded) maximum argument count
fn arity(name: &str) -> (usize, Option<usize>) {
    match name {
        "concat" => (0, None),
        "now" => (0, Some(0)),
        "round" => (1, Some(2)),
        "dateDiff" => (2, Some(3)),
        "contains" | "min" | "max" | "pow" => (2, Some(2)),
        "replace" | "dateAdd" => (3, Some(3)),
        _ => (1, Some(1)),
    }
}

fn check_arity(name: &str, given: usize, min: usize, max: Option<usize>) -> Result<()> {
    let ok = given >= min && max.map_or(true, |max| given <= max);
    if ok {
        return Ok(());
    }
    let required = match max {
        Some(max) if max == min => format!("{min}"),
        Some(max) => format!("{min} to {max}"),
        None => format!("at least {min}"),
    };
    let plural = if max == Some(1) && min == 1 { "" } else { "s" };
    Err(CellDbError::eval(format!(
        "Function {name} requires {required} argument{plural}, got {given}"
    )))
}

fn apply(evaluator: &Evaluator, name: &str, args: &[CellValue]) -> Result<CellValue> {
    let text = |i: usize| args[i].to_display_string();
    let number = |i: usize| args[i].to_number();

    let value = match name {
        "concat" => CellValue::Text(args.iter().map(CellValue::to_display_string).collect()),
        "length" => CellValue::Number(text(0).chars().count() as f64),
        "lower" => CellValue::Text(text(0).to_lowercase()),
        "upper" => CellValue::Text(text(0).to_uppercase()),
        "trim" => CellValue::Text(text(0).trim().to_string()),
        "contains" => CellValue::Bool(text(0).to_lowercase().contains(&text(1).to_lowercase())),
        "replace" => {
            let from = text(1);
            if from.is_empty() {
                CellValue::Text(text(0))
            } else {
                CellValue::Text(text(0).replace(&from, &text(2)))
            }
        }
        "abs" => CellValue::Number(number(0).abs()),
        "floor" => CellValue::Number(number(0).floor()),
        "ceil" => CellValue::Number(number(0).ceil()),
        "sqrt" => CellValue::Number(number(0).sqrt()),
        "pow" => CellValue::Number(number(0).powf(number(1))),
        "min" => CellValue::Number(number(0).min(number(1))),
        "max" => CellValue::Number(number(0).max(number(1))),
        "round" => {
            let decimals = args.get(1).map(|d| d.to_number().trunc()).unwrap_or(0.0);
            CellValue::Number(round_half_up(number(0), decimals))
        }
        "now" => CellValue::Text(evaluator.today().format("%Y-%m-%d").to_string()),
        "dateAdd" => {
            let date = parse_date(&text(0))?;
            let amount = number(1);
            if !amount.is_finite() {
                return Err(CellDbError::eval("dateAdd amount must be a number"));
            }
            let shifted = add_to_date(date, amount.trunc() as i64, &text(2))?;
            CellValue::Text(shifted.format("%Y-%m-%d").to_string())
        }
        "dateDiff" => {
            let a = parse_date(&text(0))?;
            let b = parse_date(&text(1))?;
            let unit = args
                .get(2)
                .map(CellValue::to_display_string)
                .unwrap_or_else(|| "days".to_string());
            CellValue::Number(date_diff(a, b, &unit)? as f64)
        }
        "toNumber" => CellValue::Number(number(0)),
        "toString" => CellValue::Text(text(0)),
        "empty" => CellValue::Bool(match &args[0] {
            CellValue::Number(n) => *n == 0.0,
            CellValue::Bool(b) => !b,
            other => other.is_empty(),
        }),
        other => return Err(CellDbError::eval(format!("Unknown function: {other}"))),
    };
    Ok(value)
}

fn round_half_up(value: f64, decimals: f64) -> f64 {
    let factor = 10f64.powf(decimals);
    (value * factor + 0.5).floor() / factor
}

/// Accepts `YYYY-MM-DD` or any timestamp starting with one.
fn parse_date(s: &str) -> Result<NaiveDate> {
    let trimmed = s.trim();
    let candidate = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(candidate, "%Y-%m-%d")
        .map_err(|_| CellDbError::eval(format!("Invalid date: '{s}'")))
}

fn add_to_date(date: NaiveDate, amount: i64, unit: &str) -> Result<NaiveDate> {
    let out_of_range = || CellDbError::eval("Date out of range");
    let shift_days = |days: i64| {
        let magnitude = Days::new(days.unsigned_abs());
        if days >= 0 {
            date.checked_add_days(magnitude)
        } else {
            date.checked_sub_days(magnitude)
        }
    };
    let shift_months = |months: i64| {
        let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
        if months >= 0 {
            date.checked_add_months(magnitude)
        } else {
            date.checked_sub_months(magnitude)
        }
    };

    let shifted = match unit {
        "day" | "days" => shift_days(amount),
        "week" | "weeks" => shift_days(amount.saturating_mul(7)),
        "month" | "months" => shift_months(amount),
        "year" | "years" => shift_months(amount.saturating_mul(12)),
        other => return Err(CellDbError::eval(format!("Unknown date unit: '{other}'"))),
    };
    shifted.ok_or_else(out_of_range)
}

/// Whole units from `b` to `a` (positive when `a` is later).
fn date_diff(a: NaiveDate, b: NaiveDate, unit: &str) -> Result<i64> {
    let days = a.signed_duration_since(b).num_days();
    let months = || {
        let mut months = (a.year() as i64 - b.year() as i64) * 12 + a.month() as i64 - b.month() as i64;
        if months > 0 && a.day() < b.day() {
            months -= 1;
        } else if months < 0 && a.day() > b.day() {
            months += 1;
        }
        months
    };

    match unit {
        "day" | "days" => Ok(days),
        "week" | "weeks" => Ok(days / 7),
        "month" | "months" => Ok(months()),
        "year" | "years" => Ok(months() / 12),
        other => Err(CellDbError::eval(format!("Unknown date unit: '{other}'"))),
    }
}
