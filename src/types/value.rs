//! Stored value payloads.
//!
//! The keyspace stores a tagged sum rather than trait objects: the
//! dispatcher inspects the tag and refuses type-mismatched operations with
//! a wire error before any state changes.

use bytes::Bytes;

use crate::store::{DocumentStore, GeoIndex, RegisterBank, SortedIndex};

/// Payload stored under a key.
#[derive(Debug, Clone)]
pub enum Value {
    /// Raw byte string (the `SET` family).
    Str(Bytes),
    /// Integer scalar.
    Int(i64),
    /// Float scalar.
    Float(f64),
    /// Boolean scalar.
    Bool(bool),
    /// Flat array of scalars.
    Array(Vec<Value>),
    /// Score-ordered multimap (the `Z*` family, order books).
    Sorted(SortedIndex),
    /// Geospatial point index (the `GEO*` family).
    Geo(GeoIndex),
    /// Cardinality register bank (the `PF*` family).
    Registers(RegisterBank),
    /// Semi-structured document collection.
    Documents(DocumentStore),
}

impl Value {
    /// Short tag name used in type-mismatch diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::Array(_) => "array",
            Value::Sorted(_) => "zset",
            Value::Geo(_) => "geo",
            Value::Registers(_) => "hyperloglog",
            Value::Documents(_) => "documents",
        }
    }

    /// Approximate heap footprint in bytes, used for the eviction budget.
    /// The estimate only needs to be monotone in actual usage.
    pub fn approximate_size(&self) -> usize {
        match self {
            Value::Str(b) => b.len(),
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => 8,
            Value::Array(items) => items.iter().map(Value::approximate_size).sum::<usize>() + 24,
            Value::Sorted(idx) => idx.approximate_size(),
            Value::Geo(idx) => idx.approximate_size(),
            Value::Registers(bank) => bank.register_count() + 16,
            Value::Documents(store) => store.approximate_size(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Bytes::from(s))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Str(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Str(Bytes::from(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}
