//! Payload values attached to index points.
//!
//! The ANN store only accepts primitives, strings and arrays. Structured
//! identifiers and timestamps are flattened to strings and null fields are
//! dropped.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

/// A payload value before sanitization.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Structured identifier, stored as its canonical string form.
    Id(Uuid),
    Timestamp(DateTime<Utc>),
    Array(Vec<PayloadValue>),
    Object(Vec<(String, PayloadValue)>),
}

impl PayloadValue {
    /// Convert to a store-compatible JSON value.
    ///
    /// Returns `None` for values that must be dropped (null, non-finite
    /// numbers).
    pub fn sanitize(&self) -> Option<Value> {
        match self {
            PayloadValue::Null => None,
            PayloadValue::Bool(b) => Some(Value::Bool(*b)),
            PayloadValue::Number(n) => Number::from_f64(*n).map(Value::Number),
            PayloadValue::String(s) => Some(Value::String(s.clone())),
            PayloadValue::Id(id) => Some(Value::String(id.to_string())),
            PayloadValue::Timestamp(ts) => Some(Value::String(ts.to_rfc3339())),
            PayloadValue::Array(items) => Some(Value::Array(
                items.iter().filter_map(PayloadValue::sanitize).collect(),
            )),
            PayloadValue::Object(fields) => Some(Value::Object(sanitize_fields(fields))),
        }
    }
}

fn sanitize_fields(fields: &[(String, PayloadValue)]) -> Map<String, Value> {
    fields
        .iter()
        .filter_map(|(key, value)| value.sanitize().map(|v| (key.clone(), v)))
        .collect()
}

/// Ordered set of payload fields for one point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    fields: Vec<(String, PayloadValue)>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any earlier field with the same key.
    pub fn with(mut self, key: &str, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<PayloadValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Sanitized JSON object ready to send to the store.
    pub fn sanitize(&self) -> Map<String, Value> {
        sanitize_fields(&self.fields)
    }
}

impl From<bool> for PayloadValue {
    fn from(v: bool) -> Self {
        PayloadValue::Bool(v)
    }
}

impl From<f64> for PayloadValue {
    fn from(v: f64) -> Self {
        PayloadValue::Number(v)
    }
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        PayloadValue::Number(v as f64)
    }
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        PayloadValue::String(v.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        PayloadValue::String(v)
    }
}

impl From<Uuid> for PayloadValue {
    fn from(v: Uuid) -> Self {
        PayloadValue::Id(v)
    }
}

impl From<DateTime<Utc>> for PayloadValue {
    fn from(v: DateTime<Utc>) -> Self {
        PayloadValue::Timestamp(v)
    }
}

impl<T: Into<PayloadValue>> From<Option<T>> for PayloadValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PayloadValue::Null)
    }
}

impl<T: Into<PayloadValue>> From<Vec<T>> for PayloadValue {
    fn from(v: Vec<T>) -> Self {
        PayloadValue::Array(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_structured_values_become_strings() {
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let payload = Payload::new()
            .with("author", id)
            .with("published_at", ts)
            .with("title", "Managing type 2 diabetes");

        assert_eq!(
            Value::Object(payload.sanitize()),
            json!({
                "author": "67e55044-10b1-426f-9247-bb680e5fe0c8",
                "published_at": "2024-03-01T12:00:00+00:00",
                "title": "Managing type 2 diabetes",
            })
        );
    }

    #[test]
    fn test_null_fields_dropped() {
        let payload = Payload::new()
            .with("summary", None::<String>)
            .with("score", f64::NAN)
            .with("visible", true);

        assert_eq!(Value::Object(payload.sanitize()), json!({"visible": true}));
    }

    #[test]
    fn test_nested_values_sanitized() {
        let id = Uuid::nil();
        let payload = Payload::new()
            .with("tags", vec!["cardiology", "diet"])
            .with(
                "meta",
                PayloadValue::Object(vec![
                    ("owner".to_string(), PayloadValue::Id(id)),
                    ("gone".to_string(), PayloadValue::Null),
                ]),
            );

        assert_eq!(
            Value::Object(payload.sanitize()),
            json!({
                "tags": ["cardiology", "diet"],
                "meta": {"owner": "00000000-0000-0000-0000-000000000000"},
            })
        );
    }

    #[test]
    fn test_insert_replaces_existing_key() {
        let payload = Payload::new().with("k", "a").with("k", "b");
        assert_eq!(payload.get("k"), Some(&PayloadValue::String("b".into())));
        assert_eq!(payload.sanitize().len(), 1);
    }
}
