use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use super::mapping::{FieldType, SuppressionPolicy};
use crate::pipeline::domain::FieldValue;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Coerced {
    Value(FieldValue),
    Suppressed(FieldValue),
    Absent,
}

pub(crate) fn coerce(
    raw: &Value,
    field_type: FieldType,
    suppression: Option<&SuppressionPolicy>,
) -> Result<Coerced, String> {
    match raw {
        Value::Null => Ok(Coerced::Absent),
        Value::String(text) => coerce_text(text, field_type, suppression),
        Value::Number(number) => coerce_number(number, field_type),
        Value::Bool(flag) => match field_type {
            FieldType::String => Ok(Coerced::Value(FieldValue::Text(flag.to_string()))),
            other => Err(format!("expected {}, got boolean", other.label())),
        },
        Value::Array(_) | Value::Object(_) => {
            Err(format!("expected {}, got nested value", field_type.label()))
        }
    }
}

fn coerce_text(
    text: &str,
    field_type: FieldType,
    suppression: Option<&SuppressionPolicy>,
) -> Result<Coerced, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Coerced::Absent);
    }

    if field_type.is_numeric() {
        if let Some(policy) = suppression.filter(|policy| policy.matches(trimmed)) {
            return substitute(policy.substitute, field_type).map(Coerced::Suppressed);
        }
    }

    let value = match field_type {
        FieldType::Integer => FieldValue::Integer(parse_integer(trimmed)?),
        FieldType::Float => FieldValue::Float(parse_float(trimmed)?),
        FieldType::Date => FieldValue::Date(parse_date(trimmed)?),
        FieldType::String => FieldValue::Text(trimmed.to_string()),
    };
    Ok(Coerced::Value(value))
}

fn coerce_number(number: &serde_json::Number, field_type: FieldType) -> Result<Coerced, String> {
    let value = match field_type {
        FieldType::Integer => match number.as_i64() {
            Some(value) => FieldValue::Integer(value),
            None => FieldValue::Integer(integral(number.as_f64(), &number.to_string())?),
        },
        FieldType::Float => FieldValue::Float(
            number
                .as_f64()
                .ok_or_else(|| format!("'{number}' is not a finite number"))?,
        ),
        FieldType::Date => return Err(format!("expected date, got number {number}")),
        FieldType::String => FieldValue::Text(number.to_string()),
    };
    Ok(Coerced::Value(value))
}

pub(crate) fn substitute(value: f64, field_type: FieldType) -> Result<FieldValue, String> {
    match field_type {
        FieldType::Integer => integral(Some(value), &value.to_string()).map(FieldValue::Integer),
        FieldType::Float => Ok(FieldValue::Float(value)),
        other => Err(format!("suppression substitute cannot fill a {} field", other.label())),
    }
}

/// `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
fn integral(value: Option<f64>, raw: &str) -> Result<i64, String> {
    match value {
        Some(value)
            if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 =>
        {
            Ok(value as i64)
        }
        _ => Err(format!("'{raw}' is not a whole number in range")),
    }
}

fn strip_numeric_noise(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !matches!(ch, ',' | '$' | '%' | ' ' | '\u{a0}'))
        .collect()
}

pub(crate) fn parse_integer(raw: &str) -> Result<i64, String> {
    let cleaned = strip_numeric_noise(raw);
    if let Ok(value) = cleaned.parse::<i64>() {
        return Ok(value);
    }
    integral(cleaned.parse::<f64>().ok(), raw)
}

pub(crate) fn parse_float(raw: &str) -> Result<f64, String> {
    strip_numeric_noise(raw)
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| format!("'{raw}' is not a number"))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.date_naive());
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date);
        }
    }

    // Monthly periods land on the first of the month.
    let first_of_month = [
        (format!("{raw}-01"), "%Y-%m-%d"),
        (format!("1 {raw}"), "%d %B %Y"),
    ];
    for (candidate, format) in &first_of_month {
        if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
            return Ok(date);
        }
    }

    Err(format!("'{raw}' is not a recognised date"))
}
