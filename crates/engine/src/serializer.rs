//! Payload serializers
//!
//! A serializer turns a [`Value`] into the bytes stored in the backing
//! store and back. Two implementations ship:
//!
//! - [`MsgPackSerializer`] (default): compact, keeps bytes and integers intact
//! - [`JsonSerializer`]: human-readable; `Bytes` payloads come back as an
//!   array of integers
//!
//! Dates, datetimes, times and decimals travel as tagged maps and are
//! restored on decode by both formats. Object keys are ordered, so equal
//! payloads always encode to identical bytes, which the direct encoding
//! relies on.

use std::fmt;
use std::sync::Arc;

use ttseries_core::{Error, Result, Value};

/// Converts payload values to and from bytes
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Registered name of this serializer
    fn name(&self) -> &'static str;

    /// Encode a payload
    fn dumps(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode a payload
    fn loads(&self, raw: &[u8]) -> Result<Value>;
}

/// MessagePack serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

impl Serializer for MsgPackSerializer {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn dumps(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    fn loads(&self, raw: &[u8]) -> Result<Value> {
        Ok(rmp_serde::from_slice(raw)?)
    }
}

/// JSON serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn dumps(&self, value: &Value) -> Result<Vec<u8>> {
        if let Some(bad) = first_non_finite(value) {
            return Err(Error::Serialization(format!(
                "JSON cannot represent float {}",
                bad
            )));
        }
        Ok(serde_json::to_vec(value)?)
    }

    fn loads(&self, raw: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(raw)?)
    }
}

fn first_non_finite(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) if !f.is_finite() => Some(*f),
        Value::Array(items) => items.iter().find_map(first_non_finite),
        Value::Object(entries) => entries.values().find_map(first_non_finite),
        _ => None,
    }
}

/// Resolve a serializer by its configured name
pub fn serializer_by_name(name: &str) -> Result<Arc<dyn Serializer>> {
    match name {
        "msgpack" => Ok(Arc::new(MsgPackSerializer)),
        "json" => Ok(Arc::new(JsonSerializer)),
        other => Err(Error::SerializerConfig(format!(
            "unknown serializer '{}', expected \"msgpack\" or \"json\"",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> Value {
        let dt = NaiveDate::from_ymd_opt(2018, 5, 11)
            .unwrap()
            .and_hms_micro_opt(10, 1, 2, 331_131)
            .unwrap();
        Value::object([
            ("value", Value::Int(21)),
            ("volume", Value::Float(11344.34)),
            ("at", Value::DateTime(dt)),
            ("day", Value::Date(dt.date())),
            ("tags", Value::Array(vec!["a".into(), Value::Null, true.into()])),
        ])
    }

    #[test]
    fn test_msgpack_roundtrip() {
        let s = MsgPackSerializer;
        let raw = s.dumps(&sample()).unwrap();
        assert_eq!(s.loads(&raw).unwrap(), sample());
    }

    #[test]
    fn test_json_roundtrip() {
        let s = JsonSerializer;
        let raw = s.dumps(&sample()).unwrap();
        assert_eq!(s.loads(&raw).unwrap(), sample());
    }

    #[test]
    fn test_msgpack_keeps_bytes() {
        let s = MsgPackSerializer;
        let v = Value::Bytes(vec![0, 159, 146, 150]);
        assert_eq!(s.loads(&s.dumps(&v).unwrap()).unwrap(), v);
    }

    #[test]
    fn test_json_rejects_nan() {
        let v = Value::Array(vec![Value::Float(f64::NAN)]);
        assert!(matches!(JsonSerializer.dumps(&v), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_garbage_input_is_serialization_error() {
        assert!(matches!(
            JsonSerializer.loads(b"{not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(serializer_by_name("msgpack").unwrap().name(), "msgpack");
        assert_eq!(serializer_by_name("json").unwrap().name(), "json");
        assert!(matches!(
            serializer_by_name("pickle"),
            Err(Error::SerializerConfig(_))
        ));
    }

    #[test]
    fn test_equal_payloads_encode_identically() {
        let a = Value::object([("b", Value::Int(1)), ("a", Value::Int(2))]);
        let b = Value::object([("a", Value::Int(2)), ("b", Value::Int(1))]);
        assert_eq!(
            MsgPackSerializer.dumps(&a).unwrap(),
            MsgPackSerializer.dumps(&b).unwrap()
        );
    }
}
