//! Directory values ↔ typed column values.

use chrono::{Duration, NaiveDateTime, Timelike};
use serde_json::{json, Value};

use crate::core::rules::{ContainerShape, ValueKind};
use crate::core::value::SqlValue;
use crate::error::{LoaderError, Result};

/// Values accepted as boolean true, compared case-insensitively.
const TRUE_VALUES: [&str; 5] = ["1", "on", "true", "yes", "ok"];

/// Compact directory timestamp without the fraction: `YYYYMMDDHHMMSS`.
const COMPACT_TIMESTAMP: &str = "%Y%m%d%H%M%S";

/// Convert an attribute's value list to the column value for `kind`.
///
/// Structured kinds keep the whole list; every scalar kind takes the first
/// value. An empty list gives an empty container, an empty string for text,
/// and NULL for the other scalars.
pub fn typed_value(column: &str, kind: ValueKind, values: &[String]) -> Result<SqlValue> {
    if let ValueKind::Structured(shape) = kind {
        return Ok(container(shape, values.to_vec()));
    }
    let Some(first) = values.first() else {
        return Ok(match kind {
            ValueKind::Text => SqlValue::Text(String::new()),
            _ => SqlValue::Null,
        });
    };

    let value = match kind {
        ValueKind::SmallintBool => SqlValue::I16(i16::from(is_true(first))),
        ValueKind::Bool => SqlValue::Bool(is_true(first)),
        ValueKind::Integer => {
            let n = first.trim().parse::<i64>().map_err(|e| {
                LoaderError::value(column, format!("'{}' is not an integer: {}", first, e))
            })?;
            SqlValue::I64(n)
        }
        ValueKind::Timestamp => SqlValue::Timestamp(parse_compact_timestamp(column, first)?),
        ValueKind::Text | ValueKind::Structured(_) => SqlValue::Text(first.clone()),
    };
    Ok(value)
}

/// A value list in the container shape a structured column stores.
pub fn container(shape: ContainerShape, values: Vec<String>) -> SqlValue {
    match shape {
        ContainerShape::Tagged => SqlValue::Json(json!({ "v": values })),
        ContainerShape::Bare => SqlValue::Json(json!(values)),
        ContainerShape::NativeArray => SqlValue::TextArray(values),
    }
}

fn is_true(value: &str) -> bool {
    TRUE_VALUES.iter().any(|t| t.eq_ignore_ascii_case(value.trim()))
}

/// Parse `YYYYMMDDHHMMSS[.fff]Z`.
pub fn parse_compact_timestamp(column: &str, value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim().trim_end_matches('Z');
    let (main, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    let invalid = |reason: String| {
        LoaderError::value(column, format!("'{}' is not a directory timestamp: {}", value, reason))
    };

    let base = NaiveDateTime::parse_from_str(main, COMPACT_TIMESTAMP)
        .map_err(|e| invalid(e.to_string()))?;
    if fraction.is_empty() {
        return Ok(base);
    }
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("fraction must be digits".to_string()));
    }
    let millis: String = fraction.chars().chain("000".chars()).take(3).collect();
    let millis: i64 = millis.parse().map_err(|_| invalid("bad fraction".to_string()))?;
    Ok(base + Duration::milliseconds(millis))
}

/// Format a timestamp back into the compact directory form. Milliseconds are
/// only written when non-zero.
pub fn format_compact_timestamp(ts: &NaiveDateTime) -> String {
    let millis = ts.nanosecond() / 1_000_000;
    if millis == 0 {
        format!("{}Z", ts.format(COMPACT_TIMESTAMP))
    } else {
        format!("{}.{:03}Z", ts.format(COMPACT_TIMESTAMP), millis)
    }
}

/// Turn a stored column value back into the directory value list.
///
/// NULL and empty strings read back as no values. Structured values accept
/// every container shape, and JSON held in a text column (MariaDB stores
/// JSON as `LONGTEXT`) is parsed first.
pub fn read_back(kind: ValueKind, stored: &SqlValue) -> Vec<String> {
    match stored {
        SqlValue::Null => Vec::new(),
        SqlValue::Bool(b) => vec![b.to_string()],
        SqlValue::I16(v) if kind == ValueKind::SmallintBool => vec![(*v != 0).to_string()],
        SqlValue::I16(v) => vec![v.to_string()],
        SqlValue::I64(v) if kind == ValueKind::SmallintBool => vec![(*v != 0).to_string()],
        SqlValue::I64(v) => vec![v.to_string()],
        SqlValue::Text(s) if s.is_empty() => Vec::new(),
        SqlValue::Text(s) => match kind {
            ValueKind::Structured(_) => match serde_json::from_str::<Value>(s) {
                Ok(v @ (Value::Object(_) | Value::Array(_))) => json_values(&v),
                _ => vec![s.clone()],
            },
            _ => vec![s.clone()],
        },
        SqlValue::Json(v) => json_values(v),
        SqlValue::TextArray(items) => items.clone(),
        SqlValue::Timestamp(ts) => vec![format_compact_timestamp(ts)],
    }
}

fn json_values(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Object(map) => map.get("v").map(json_values).unwrap_or_default(),
        Value::Array(items) => items.iter().map(json_scalar).collect(),
        Value::String(s) if s.is_empty() => Vec::new(),
        other => vec![json_scalar(other)],
    }
}

fn json_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_boolean_values() {
        for v in ["1", "on", "TRUE", "Yes", "ok"] {
            assert_eq!(
                typed_value("jansEnabled", ValueKind::SmallintBool, &strings(&[v])).unwrap(),
                SqlValue::I16(1)
            );
        }
        assert_eq!(
            typed_value("jansEnabled", ValueKind::Bool, &strings(&["false"])).unwrap(),
            SqlValue::Bool(false)
        );
        assert_eq!(
            typed_value("jansEnabled", ValueKind::SmallintBool, &strings(&["maybe"])).unwrap(),
            SqlValue::I16(0)
        );
    }

    #[test]
    fn test_integer_takes_first_value() {
        assert_eq!(
            typed_value("jansCount", ValueKind::Integer, &strings(&["42", "7"])).unwrap(),
            SqlValue::I64(42)
        );
        let err = typed_value("jansCount", ValueKind::Integer, &strings(&["many"])).unwrap_err();
        assert!(matches!(err, LoaderError::Value { ref column, .. } if column == "jansCount"));
    }

    #[test]
    fn test_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_milli_opt(12, 30, 15, 120)
            .unwrap();
        let ts = parse_compact_timestamp("exp", "20240305123015.12Z").unwrap();
        assert_eq!(ts, expected);
        assert_eq!(format_compact_timestamp(&ts), "20240305123015.120Z");

        let ts = parse_compact_timestamp("exp", "20240305123015Z").unwrap();
        assert_eq!(format_compact_timestamp(&ts), "20240305123015Z");
        assert!(parse_compact_timestamp("exp", "2024-03-05").is_err());
    }

    #[test]
    fn test_structured_shapes() {
        let values = strings(&["admin"]);
        assert_eq!(
            typed_value("role", ValueKind::Structured(ContainerShape::Tagged), &values).unwrap(),
            SqlValue::Json(json!({"v": ["admin"]}))
        );
        assert_eq!(
            typed_value("role", ValueKind::Structured(ContainerShape::Bare), &values).unwrap(),
            SqlValue::Json(json!(["admin"]))
        );
        assert_eq!(
            typed_value("role", ValueKind::Structured(ContainerShape::NativeArray), &[]).unwrap(),
            SqlValue::TextArray(Vec::new())
        );
    }

    #[test]
    fn test_read_back_shapes() {
        let tagged = ValueKind::Structured(ContainerShape::Tagged);
        assert_eq!(read_back(tagged, &SqlValue::Json(json!({"v": ["a", "b"]}))), strings(&["a", "b"]));
        assert_eq!(read_back(tagged, &SqlValue::Text(r#"{"v": ["a"]}"#.into())), strings(&["a"]));
        assert_eq!(read_back(tagged, &SqlValue::Text("plain".into())), strings(&["plain"]));
        assert_eq!(read_back(ValueKind::SmallintBool, &SqlValue::I16(1)), strings(&["true"]));
        assert_eq!(read_back(ValueKind::Integer, &SqlValue::I64(5)), strings(&["5"]));
        assert!(read_back(ValueKind::Text, &SqlValue::Text(String::new())).is_empty());
        assert!(read_back(ValueKind::Text, &SqlValue::Null).is_empty());
    }

    #[test]
    fn test_round_trip_per_kind() {
        let cases: Vec<(ValueKind, Vec<String>)> = vec![
            (ValueKind::Text, strings(&["Gluu Inc."])),
            (ValueKind::Integer, strings(&["300"])),
            (ValueKind::Bool, strings(&["true"])),
            (ValueKind::SmallintBool, strings(&["false"])),
            (ValueKind::Timestamp, strings(&["20301231235959Z"])),
            (ValueKind::Structured(ContainerShape::Tagged), strings(&["a", "b"])),
            (ValueKind::Structured(ContainerShape::Bare), strings(&["x"])),
            (ValueKind::Structured(ContainerShape::NativeArray), strings(&["p", "q"])),
        ];
        for (kind, values) in cases {
            let stored = typed_value("attr", kind, &values).unwrap();
            assert_eq!(read_back(kind, &stored), values, "{:?}", kind);
        }
    }
}
