//! Self-describing records with named typed fields.
//!
//! A [`Record`] is the unit of application data: event payloads, documents,
//! matchers, and query parameters are all records. Field values cover the
//! protocol's type set only; anything else in an incoming CBOR map is
//! rejected rather than silently coerced.
//!
//! # Invariants
//!
//! - Round-trip: encoding a record and decoding the bytes yields an equal
//!   record, except that an `I64` whose value fits in 32 bits decodes as
//!   `I32` (CBOR integers carry no width). The typed accessors coerce, so
//!   callers never observe the difference.

use std::collections::BTreeMap;

use bytes::Bytes;
use ciborium::value::Value as Cbor;

use crate::errors::{ProtocolError, Result};

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// UTF-8 string
    Str(String),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// Boolean
    Bool(bool),
    /// Opaque byte string
    Bytes(Bytes),
    /// Nested record
    Record(Record),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Self::Record(v)
    }
}

impl Value {
    fn into_cbor(self) -> Cbor {
        match self {
            Self::Str(s) => Cbor::Text(s),
            Self::I32(n) => Cbor::Integer(n.into()),
            Self::I64(n) => Cbor::Integer(n.into()),
            Self::Bool(b) => Cbor::Bool(b),
            Self::Bytes(b) => Cbor::Bytes(b.to_vec()),
            Self::Record(r) => Cbor::Map(r.into_cbor_entries()),
        }
    }

    fn from_cbor(value: Cbor) -> Result<Self> {
        match value {
            Cbor::Text(s) => Ok(Self::Str(s)),
            Cbor::Integer(n) => {
                let wide: i128 = n.into();
                // Narrowest width wins so small longs and ints compare equal
                // after a round trip.
                if let Ok(narrow) = i32::try_from(wide) {
                    Ok(Self::I32(narrow))
                } else if let Ok(long) = i64::try_from(wide) {
                    Ok(Self::I64(long))
                } else {
                    Err(ProtocolError::UnsupportedValue(format!("integer out of range: {wide}")))
                }
            },
            Cbor::Bool(b) => Ok(Self::Bool(b)),
            Cbor::Bytes(b) => Ok(Self::Bytes(Bytes::from(b))),
            Cbor::Map(entries) => Ok(Self::Record(Record::from_cbor_entries(entries)?)),
            other => {
                Err(ProtocolError::UnsupportedValue(format!("unsupported CBOR type: {other:?}")))
            },
        }
    }
}

/// A mapping from field name to typed value.
///
/// Field order is not significant; records compare structurally.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, consuming and returning the record for chaining.
    #[must_use]
    pub fn put(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Insert a field in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Raw field lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// String field. `None` if absent or not a string.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// 32-bit integer field. Range-checks a stored `I64`.
    #[must_use]
    pub fn get_i32(&self, name: &str) -> Option<i32> {
        match self.fields.get(name) {
            Some(Value::I32(n)) => Some(*n),
            Some(Value::I64(n)) => i32::try_from(*n).ok(),
            _ => None,
        }
    }

    /// 64-bit integer field. Reads both integer widths.
    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.fields.get(name) {
            Some(Value::I32(n)) => Some(i64::from(*n)),
            Some(Value::I64(n)) => Some(*n),
            _ => None,
        }
    }

    /// Boolean field. `None` if absent or not a boolean.
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.fields.get(name) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Byte-string field. `None` if absent or not bytes.
    #[must_use]
    pub fn get_bytes(&self, name: &str) -> Option<&Bytes> {
        match self.fields.get(name) {
            Some(Value::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// Nested record field. `None` if absent or not a record.
    #[must_use]
    pub fn get_record(&self, name: &str) -> Option<&Record> {
        match self.fields.get(name) {
            Some(Value::Record(r)) => Some(r),
            _ => None,
        }
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode to CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let cbor = Cbor::Map(self.clone().into_cbor_entries());
        let mut out = Vec::new();
        ciborium::ser::into_writer(&cbor, &mut out)
            .map_err(|e| ProtocolError::InvalidRecord(e.to_string()))?;
        Ok(out)
    }

    /// Decode from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let cbor: Cbor = ciborium::de::from_reader(bytes)
            .map_err(|e| ProtocolError::InvalidRecord(e.to_string()))?;
        match cbor {
            Cbor::Map(entries) => Self::from_cbor_entries(entries),
            _ => Err(ProtocolError::NotARecord),
        }
    }

    pub(crate) fn into_cbor_entries(self) -> Vec<(Cbor, Cbor)> {
        self.fields
            .into_iter()
            .map(|(name, value)| (Cbor::Text(name), value.into_cbor()))
            .collect()
    }

    pub(crate) fn from_cbor_entries(entries: Vec<(Cbor, Cbor)>) -> Result<Self> {
        let mut fields = BTreeMap::new();
        for (key, value) in entries {
            let Cbor::Text(name) = key else {
                return Err(ProtocolError::NotARecord);
            };
            fields.insert(name, Value::from_cbor(value)?);
        }
        Ok(Self { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip() {
        let record = Record::new()
            .put("name", "orders")
            .put("count", 7)
            .put("offset", 5_000_000_000_i64)
            .put("live", true)
            .put("blob", Bytes::from_static(b"\x00\x01\x02"))
            .put("inner", Record::new().put("id", 1));

        let bytes = record.encode().unwrap();
        let decoded = Record::decode(&bytes).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn small_long_decodes_as_int() {
        let bytes = Record::new().put("n", 42_i64).encode().unwrap();
        let decoded = Record::decode(&bytes).unwrap();

        assert_eq!(decoded.get("n"), Some(&Value::I32(42)));
        assert_eq!(decoded.get_i64("n"), Some(42));
        assert_eq!(decoded.get_i32("n"), Some(42));
    }

    #[test]
    fn accessors_reject_wrong_types() {
        let record = Record::new().put("s", "text").put("n", 3);

        assert_eq!(record.get_i32("s"), None);
        assert_eq!(record.get_str("n"), None);
        assert_eq!(record.get_bool("missing"), None);
    }

    #[test]
    fn reject_non_map_payload() {
        let mut out = Vec::new();
        ciborium::ser::into_writer(&Cbor::Integer(9.into()), &mut out).unwrap();
        assert_eq!(Record::decode(&out), Err(ProtocolError::NotARecord));
    }

    #[test]
    fn reject_unsupported_value() {
        let cbor = Cbor::Map(vec![(Cbor::Text("f".into()), Cbor::Float(1.5))]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&cbor, &mut out).unwrap();
        assert!(matches!(Record::decode(&out), Err(ProtocolError::UnsupportedValue(_))));
    }
}
