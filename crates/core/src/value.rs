//! Payload value model
//!
//! This module defines:
//! - Value: Unified enum for every payload a series can hold
//!
//! ## Value Model
//!
//! - Null, Bool, Int, Float, String, Bytes, Array, Object
//! - Date, DateTime, Time, Decimal
//!
//! Objects use an ordered map so two equal payloads always encode to the
//! same bytes. The direct-value encoding stores encoded payloads as sorted-set
//! members, which makes byte-stable encoding a correctness requirement.
//!
//! ## Wire Shape
//!
//! The first eight variants map onto the native types of any self-describing
//! format (msgpack, JSON). The temporal and decimal variants are written as a
//! tagged map:
//!
//! ```text
//! {"__cls__": "datetime", "str": "2018-05-11T10:01:02.331131"}
//! {"__cls__": "decimal",  "str": "3.1415"}
//! ```

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const CLASS_FIELD: &str = "__cls__";
const TEXT_FIELD: &str = "str";

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Payload value stored in a series
///
/// Different variants are NEVER equal, even if they hold the "same" value:
/// `Int(1) != Float(1.0)`. Float equality follows IEEE-754.
#[derive(Debug, Clone)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Array of values
    Array(Vec<Value>),
    /// Mapping with string keys, ordered by key
    Object(BTreeMap<String, Value>),
    /// Calendar date
    Date(NaiveDate),
    /// Date and time without zone
    DateTime(NaiveDateTime),
    /// Time of day
    Time(NaiveTime),
    /// Arbitrary precision decimal
    Decimal(Decimal),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Date(_) => "Date",
            Value::DateTime(_) => "DateTime",
            Value::Time(_) => "Time",
            Value::Decimal(_) => "Decimal",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as i64 if this is an Int value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view used for timestamp columns: Int and Float only
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string slice if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as slice if this is an Array value
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as map if this is an Object value
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    /// Build an object from `(key, value)` pairs
    pub fn object<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn tagged(class: &str, text: &str) -> Option<Value> {
        match class {
            "date" => NaiveDate::from_str(text).ok().map(Value::Date),
            "datetime" => NaiveDateTime::from_str(text).ok().map(Value::DateTime),
            "time" => NaiveTime::from_str(text).ok().map(Value::Time),
            "decimal" => Decimal::from_str(text).ok().map(Value::Decimal),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Object(m)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

fn serialize_tagged<S: Serializer>(
    serializer: S,
    class: &str,
    text: &str,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry(CLASS_FIELD, class)?;
    map.serialize_entry(TEXT_FIELD, text)?;
    map.end()
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Date(d) => serialize_tagged(serializer, "date", &d.to_string()),
            Value::DateTime(dt) => serialize_tagged(
                serializer,
                "datetime",
                &dt.format(DATETIME_FORMAT).to_string(),
            ),
            Value::Time(t) => {
                serialize_tagged(serializer, "time", &t.format(TIME_FORMAT).to_string())
            }
            Value::Decimal(d) => serialize_tagged(serializer, "decimal", &d.to_string()),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a self-describing payload value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Value::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> std::result::Result<Value, E> {
        match i64::try_from(u) {
            Ok(i) => Ok(Value::Int(i)),
            Err(_) => Ok(Value::Float(u as f64)),
        }
    }

    fn visit_f32<E: de::Error>(self, f: f32) -> std::result::Result<Value, E> {
        Ok(Value::Float(f64::from(f)))
    }

    fn visit_f64<E: de::Error>(self, f: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> std::result::Result<Value, E> {
        Ok(Value::String(s))
    }

    fn visit_bytes<E: de::Error>(self, b: &[u8]) -> std::result::Result<Value, E> {
        Ok(Value::Bytes(b.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, b: Vec<u8>) -> std::result::Result<Value, E> {
        Ok(Value::Bytes(b))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Value, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            entries.insert(k, v);
        }

        if entries.len() == 2 {
            if let (Some(Value::String(class)), Some(Value::String(text))) =
                (entries.get(CLASS_FIELD), entries.get(TEXT_FIELD))
            {
                return Value::tagged(class, text).ok_or_else(|| {
                    de::Error::custom(format!("invalid {} payload '{}'", class, text))
                });
            }
        }
        Ok(Value::Object(entries))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgpack_roundtrip(v: &Value) -> Value {
        let bytes = rmp_serde::to_vec(v).unwrap();
        rmp_serde::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_int_not_equal_float() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn test_nan_not_equal() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_nested_object_msgpack() {
        let v = Value::object([
            ("value", Value::Int(21)),
            ("volume", Value::Float(11344.34)),
            (
                "asks",
                Value::Array(vec![Value::object([
                    ("ask_1", Value::Int(10)),
                    ("price", Value::Int(21)),
                ])]),
            ),
        ]);
        assert_eq!(msgpack_roundtrip(&v), v);
    }

    #[test]
    fn test_temporal_and_decimal_msgpack() {
        let dt = NaiveDate::from_ymd_opt(2018, 5, 11)
            .unwrap()
            .and_hms_micro_opt(10, 1, 2, 331_131)
            .unwrap();
        let v = Value::Array(vec![
            Value::DateTime(dt),
            Value::Date(dt.date()),
            Value::Time(dt.time()),
            Value::Decimal(Decimal::from_str("3.1415").unwrap()),
        ]);
        assert_eq!(msgpack_roundtrip(&v), v);
    }

    #[test]
    fn test_bytes_msgpack() {
        let v = Value::Bytes(vec![0, 1, 2, 255]);
        assert_eq!(msgpack_roundtrip(&v), v);
    }

    #[test]
    fn test_tagged_map_shape() {
        let v = Value::Decimal(Decimal::from_str("1.50").unwrap());
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["__cls__"], "decimal");
        assert_eq!(json["str"], "1.50");
    }

    #[test]
    fn test_invalid_tagged_payload_rejected() {
        let json = r#"{"__cls__": "date", "str": "not-a-date"}"#;
        assert!(serde_json::from_str::<Value>(json).is_err());
    }

    #[test]
    fn test_equal_objects_encode_identically() {
        let a = Value::object([("b", Value::Int(2)), ("a", Value::Int(1))]);
        let b = Value::object([("a", Value::Int(1)), ("b", Value::Int(2))]);
        assert_eq!(rmp_serde::to_vec(&a).unwrap(), rmp_serde::to_vec(&b).unwrap());
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::from("x").as_f64(), None);
    }
}
