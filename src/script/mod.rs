//! Scripted risk/fraud evaluation.
//!
//! Scripts run inside an embedded evaluator behind the [`ScriptEngine`]
//! trait; the keyspace is visible to them only through the narrow
//! [`StoreApi`] capability object, which keeps internal types out of the
//! sandbox and makes the callback table mockable in tests. The crate ships
//! a small deterministic interpreter ([`engine::Interpreter`]) implementing
//! the trait.
//!
//! Loaded sources are immutable: `SCRIPT LOAD` stores the text under its
//! SHA-256 digest and replacing a script means re-loading under the same
//! digest.

pub mod callbacks;
pub mod engine;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::types::Frame;

pub use callbacks::{KeyspaceApi, StoreApi};
pub use engine::Interpreter;

/// Dynamic value produced and consumed by scripts.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// Absent value; converts to a null bulk.
    Nil,
    /// Boolean; converts to integer 0/1.
    Bool(bool),
    /// Number; converts to an integer when integral, else a bulk.
    Number(f64),
    /// String; converts to a bulk.
    Str(String),
    /// Array; converts element-wise.
    Array(Vec<ScriptValue>),
    /// Mapping; converts to a flat array of key/value pairs.
    Map(Vec<(String, ScriptValue)>),
}

impl ScriptValue {
    /// Human-readable type tag for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::Str(_) => "string",
            ScriptValue::Array(_) => "array",
            ScriptValue::Map(_) => "map",
        }
    }
}

/// Execution budget: operation count and wall clock.
#[derive(Debug, Clone, Copy)]
pub struct ScriptBudget {
    /// Maximum interpreter operations.
    pub max_ops: u64,
    /// Maximum wall-clock milliseconds.
    pub max_millis: u64,
}

impl Default for ScriptBudget {
    fn default() -> Self {
        Self {
            max_ops: 100_000,
            max_millis: 250,
        }
    }
}

/// The evaluator contract. The host-language bridge is pluggable; the
/// server only depends on this trait.
pub trait ScriptEngine: Send + Sync {
    /// Evaluate `source` with the given `KEYS`/`ARGV` bindings against the
    /// store capability, within the budget.
    fn eval(
        &self,
        source: &str,
        keys: &[String],
        argv: &[String],
        store: &dyn StoreApi,
        budget: &ScriptBudget,
    ) -> Result<ScriptValue>;
}

/// One loaded script.
#[derive(Debug, Clone)]
pub struct ScriptRecord {
    /// SHA-256 hex digest of the source.
    pub digest: String,
    /// Immutable source text.
    pub source: String,
    /// Load instant.
    pub created_at: DateTime<Utc>,
}

/// Digest-keyed script storage.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    scripts: RwLock<HashMap<String, ScriptRecord>>,
}

impl ScriptRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a source and return its digest. Re-loading identical source
    /// is idempotent.
    pub fn load(&self, source: &str) -> String {
        let digest = sha256_hex(source);
        self.scripts
            .write()
            .entry(digest.clone())
            .or_insert_with(|| ScriptRecord {
                digest: digest.clone(),
                source: source.to_string(),
                created_at: Utc::now(),
            });
        digest
    }

    /// Fetch a source by digest.
    pub fn get(&self, digest: &str) -> Option<String> {
        self.scripts
            .read()
            .get(&digest.to_ascii_lowercase())
            .map(|record| record.source.clone())
    }

    /// Number of loaded scripts.
    pub fn len(&self) -> usize {
        self.scripts.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.scripts.read().is_empty()
    }
}

/// Convert a script's return value into its wire reply.
pub fn value_to_frame(value: ScriptValue) -> Frame {
    match value {
        ScriptValue::Nil => Frame::NullBulk,
        ScriptValue::Bool(b) => Frame::Integer(i64::from(b)),
        ScriptValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 9e18 {
                Frame::Integer(n as i64)
            } else {
                Frame::bulk(crate::types::format_f64(n))
            }
        },
        ScriptValue::Str(s) => Frame::bulk(s),
        ScriptValue::Array(items) => Frame::Array(items.into_iter().map(value_to_frame).collect()),
        ScriptValue::Map(pairs) => {
            let mut flat = Vec::with_capacity(pairs.len() * 2);
            for (key, value) in pairs {
                flat.push(Frame::bulk(key));
                flat.push(value_to_frame(value));
            }
            Frame::Array(flat)
        },
    }
}

fn sha256_hex(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn load_is_idempotent_and_digest_keyed() {
        let registry = ScriptRegistry::new();
        let d1 = registry.load("return 1");
        let d2 = registry.load("return 1");
        assert_eq!(d1, d2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&d1).unwrap(), "return 1");
        assert_eq!(d1.len(), 64);

        let d3 = registry.load("return 2");
        assert_ne!(d1, d3);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn digest_lookup_is_case_insensitive() {
        let registry = ScriptRegistry::new();
        let digest = registry.load("return 'x'");
        assert!(registry.get(&digest.to_ascii_uppercase()).is_some());
    }

    #[test]
    fn return_value_conversion() {
        assert_eq!(value_to_frame(ScriptValue::Nil), Frame::NullBulk);
        assert_eq!(value_to_frame(ScriptValue::Bool(true)), Frame::Integer(1));
        assert_eq!(value_to_frame(ScriptValue::Bool(false)), Frame::Integer(0));
        assert_eq!(value_to_frame(ScriptValue::Number(42.0)), Frame::Integer(42));
        assert_eq!(
            value_to_frame(ScriptValue::Number(1.5)),
            Frame::Bulk(Bytes::from("1.5"))
        );
        assert_eq!(
            value_to_frame(ScriptValue::Str("hi".into())),
            Frame::Bulk(Bytes::from("hi"))
        );
        assert_eq!(
            value_to_frame(ScriptValue::Map(vec![(
                "risk".into(),
                ScriptValue::Number(3.0)
            )])),
            Frame::Array(vec![Frame::Bulk(Bytes::from("risk")), Frame::Integer(3)])
        );
    }
}
