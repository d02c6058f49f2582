//! Field extraction helpers for JSON payload objects.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::DecodeReason;

pub(super) type Object = Map<String, Value>;

/// Coerce a JSON number or numeric string into a finite f64
pub(super) fn number(value: &Value, field: &'static str) -> Result<f64, DecodeReason> {
    let n = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| DecodeReason::InvalidField {
            field,
            reason: "number out of range".to_string(),
        })?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| DecodeReason::InvalidField {
            field,
            reason: format!("'{}' is not a number", s),
        })?,
        other => {
            return Err(DecodeReason::InvalidField {
                field,
                reason: format!("expected number, got {}", kind(other)),
            })
        }
    };

    if !n.is_finite() {
        return Err(DecodeReason::NonFinite(field));
    }
    Ok(n)
}

pub(super) fn required_number(obj: &Object, field: &'static str) -> Result<f64, DecodeReason> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(DecodeReason::MissingField(field)),
        Some(v) => number(v, field),
    }
}

pub(super) fn required_str<'a>(obj: &'a Object, field: &'static str) -> Result<&'a str, DecodeReason> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(DecodeReason::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(DecodeReason::InvalidField {
            field,
            reason: format!("expected string, got {}", kind(other)),
        }),
    }
}

/// First present string among `fields`; null counts as absent
pub(super) fn optional_str<'a>(
    obj: &'a Object,
    fields: &[&'static str],
) -> Result<Option<&'a str>, DecodeReason> {
    for &field in fields {
        match obj.get(field) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => return Ok(Some(s)),
            Some(other) => {
                return Err(DecodeReason::InvalidField {
                    field,
                    reason: format!("expected string, got {}", kind(other)),
                })
            }
        }
    }
    Ok(None)
}

/// Payload timestamp: RFC 3339 string or epoch milliseconds
pub(super) fn timestamp(obj: &Object, fallback: DateTime<Utc>) -> Result<DateTime<Utc>, DecodeReason> {
    const FIELD: &str = "timestamp";

    match obj.get(FIELD) {
        None | Some(Value::Null) => Ok(fallback),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| DecodeReason::InvalidField {
                field: FIELD,
                reason: e.to_string(),
            }),
        Some(Value::Number(n)) => {
            let millis = match n.as_i64() {
                Some(ms) => ms,
                None => n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64).ok_or(
                    DecodeReason::InvalidField {
                        field: FIELD,
                        reason: "epoch milliseconds out of range".to_string(),
                    },
                )?,
            };
            DateTime::from_timestamp_millis(millis).ok_or(DecodeReason::InvalidField {
                field: FIELD,
                reason: "epoch milliseconds out of range".to_string(),
            })
        }
        Some(other) => Err(DecodeReason::InvalidField {
            field: FIELD,
            reason: format!("expected string or number, got {}", kind(other)),
        }),
    }
}

/// Copy of `obj` without the named keys
pub(super) fn remaining(obj: &Object, consumed: &[&str]) -> Object {
    obj.iter()
        .filter(|(k, _)| !consumed.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
