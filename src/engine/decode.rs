//! Payload coercion by declared field type, and JSON <-> record conversion.

use crate::error::{AppError, FieldErrors};
use crate::model::{FieldKind, ResolvedField, ResolvedModel, Resource};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn from_millis(v: &Value) -> Option<DateTime<Utc>> {
    let ms = v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))?;
    DateTime::from_timestamp_millis(ms)
}

/// Numbers are Unix milliseconds; strings are RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (UTC).
fn to_time(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(_) => from_millis(v),
        Value::String(s) => parse_datetime(s.trim()),
        _ => None,
    }
}

/// Coerce one value. `Err` carries the message for the field.
fn coerce_value(field: &ResolvedField, v: Value) -> Result<Value, String> {
    if let Value::String(s) = &v {
        if s.trim().is_empty() && field.is_optional() && field.kind() != FieldKind::Text {
            return Ok(Value::Null);
        }
    }
    if v.is_null() {
        return Ok(v);
    }
    let name = &field.json_name;
    match field.kind() {
        FieldKind::Timestamp => to_time(&v)
            .map(|t| Value::String(t.to_rfc3339()))
            .ok_or_else(|| format!("{} must be a valid time", name)),
        FieldKind::NaiveTimestamp => to_time(&v)
            .map(|t| Value::String(t.naive_utc().format(NAIVE_FORMAT).to_string()))
            .ok_or_else(|| format!("{} must be a valid time", name)),
        FieldKind::Date => to_time(&v)
            .map(|t| Value::String(t.date_naive().format("%Y-%m-%d").to_string()))
            .ok_or_else(|| format!("{} must be a valid date", name)),
        FieldKind::Integer => match &v {
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("{} must be an integer", name)),
            _ => Ok(v),
        },
        FieldKind::Float => match &v {
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("{} must be a number", name)),
            _ => Ok(v),
        },
        FieldKind::Bool => match &v {
            Value::String(s) => match s.trim() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("{} must be a boolean", name)),
            },
            Value::Number(n) => Ok(Value::Bool(n.as_i64() != Some(0))),
            _ => Ok(v),
        },
        _ => Ok(v),
    }
}

/// Coerce payload values in place according to the model's declared field types.
/// Unknown keys are left as they are.
pub fn coerce_payload(model: &ResolvedModel, payload: &mut Map<String, Value>) -> Result<(), AppError> {
    let mut errors = FieldErrors::new();
    for (key, value) in payload.iter_mut() {
        let Some(field) = model.field_by_json(key) else {
            continue;
        };
        match coerce_value(field, value.take()) {
            Ok(v) => *value = v,
            Err(msg) => errors.add(key.clone(), msg),
        }
    }
    errors.into_result()
}

/// Overlay `fields` onto `base` and decode the result as `T`.
pub fn merge_into<T: Resource>(base: &T, fields: &Map<String, Value>) -> Result<T, serde_json::Error> {
    let mut value = serde_json::to_value(base)?;
    if let Value::Object(obj) = &mut value {
        for (k, v) in fields {
            obj.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(value)
}

/// Decode a stored row; columns the row lacks keep their default.
pub fn decode_row<T: Resource>(row: Value) -> Result<T, AppError> {
    let Value::Object(fields) = row else {
        return Err(AppError::Internal(format!("{} row is not an object", T::TYPE_NAME)));
    };
    merge_into(&T::default(), &fields)
        .map_err(|e| AppError::Internal(format!("decode {} row: {}", T::TYPE_NAME, e)))
}

pub fn to_object<T: Resource>(record: &T) -> Result<Map<String, Value>, AppError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err(AppError::Internal(format!("{} does not serialize to an object", T::TYPE_NAME))),
        Err(e) => Err(AppError::Internal(format!("encode {}: {}", T::TYPE_NAME, e))),
    }
}

/// "Now" in the representation the field's type expects.
pub fn now_for(field: &ResolvedField) -> Value {
    let now = Utc::now();
    match field.kind() {
        FieldKind::NaiveTimestamp => Value::String(now.naive_utc().format(NAIVE_FORMAT).to_string()),
        FieldKind::Date => Value::String(now.date_naive().format("%Y-%m-%d").to_string()),
        FieldKind::Integer => Value::from(now.timestamp_millis()),
        _ => Value::String(now.to_rfc3339()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDef, Fields, ModelCollection};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Event {
        id: u64,
        title: String,
        starts_at: Option<DateTime<Utc>>,
        day: Option<NaiveDate>,
        seats: i64,
        open: bool,
    }

    impl Fields for Event {
        const TYPE_NAME: &'static str = "Event";

        fn fields() -> Vec<FieldDef> {
            vec![
                FieldDef::field("id", "u64"),
                FieldDef::field("title", "String"),
                FieldDef::field("starts_at", "Option<DateTime<Utc>>"),
                FieldDef::field("day", "Option<NaiveDate>"),
                FieldDef::field("seats", "i64"),
                FieldDef::field("open", "bool"),
            ]
        }
    }

    impl Resource for Event {
        const TABLE: &'static str = "events";
    }

    fn model() -> std::sync::Arc<ResolvedModel> {
        ModelCollection::new().register::<Event>().resolve_all().get::<Event>().unwrap()
    }

    #[test]
    fn coerces_times_numbers_and_flags() {
        let mut payload = json!({
            "starts_at": 0,
            "day": "2024-03-05 10:11:12",
            "seats": "12",
            "open": "true",
            "title": "",
            "extra": "kept"
        })
        .as_object()
        .cloned()
        .unwrap();
        coerce_payload(&model(), &mut payload).unwrap();
        assert_eq!(payload["starts_at"], "1970-01-01T00:00:00+00:00");
        assert_eq!(payload["day"], "2024-03-05");
        assert_eq!(payload["seats"], 12);
        assert_eq!(payload["open"], true);
        assert_eq!(payload["title"], "");
        assert_eq!(payload["extra"], "kept");

        let event: Event = merge_into(&Event::default(), &payload).unwrap();
        assert_eq!(event.seats, 12);
        assert!(event.starts_at.is_some());
    }

    #[test]
    fn empty_optional_time_becomes_null() {
        let mut payload = json!({"starts_at": ""}).as_object().cloned().unwrap();
        coerce_payload(&model(), &mut payload).unwrap();
        assert!(payload["starts_at"].is_null());
    }

    #[test]
    fn reports_unparseable_fields() {
        let mut payload = json!({"seats": "many", "starts_at": "soon"}).as_object().cloned().unwrap();
        match coerce_payload(&model(), &mut payload) {
            Err(AppError::ValidationFailed(errs)) => {
                assert!(errs.contains("seats"));
                assert!(errs.contains("starts_at"));
            }
            other => panic!("expected validation failure, got {:?}", other.err()),
        }
    }

    #[test]
    fn decode_row_fills_missing_columns() {
        let event: Event = decode_row(json!({"id": 3, "title": "x"})).unwrap();
        assert_eq!(event.id, 3);
        assert_eq!(event.seats, 0);
    }
}
