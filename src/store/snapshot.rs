//! Best-effort point-in-time snapshots.
//!
//! The copy phase runs against the keyspace's export (shard read access
//! only); encoding and I/O happen afterwards against an opaque writer, so
//! writers are never blocked beyond the copy. Subscriptions, cluster
//! topology and loaded scripts are deliberately not captured.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::{DocumentStore, GeoIndex, Keyspace, RegisterBank, SortedIndex};
use crate::store::keyspace::Item;
use crate::types::Value;

const SNAPSHOT_VERSION: u32 = 1;

/// Serialized snapshot document.
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    version: u32,
    taken_at: DateTime<Utc>,
    items: Vec<SnapshotItem>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotItem {
    key: String,
    value: SnapshotValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

/// Flat, serde-friendly mirror of [`Value`].
#[derive(Debug, Serialize, Deserialize)]
enum SnapshotValue {
    Str(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<SnapshotValue>),
    Sorted(Vec<(String, f64)>),
    Geo(Vec<(String, f64, f64)>),
    Registers(RegisterBank),
    Documents(DocumentStore),
}

impl SnapshotValue {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Str(b) => SnapshotValue::Str(b.to_vec()),
            Value::Int(n) => SnapshotValue::Int(*n),
            Value::Float(f) => SnapshotValue::Float(*f),
            Value::Bool(b) => SnapshotValue::Bool(*b),
            Value::Array(items) => {
                SnapshotValue::Array(items.iter().map(SnapshotValue::from_value).collect())
            },
            Value::Sorted(idx) => SnapshotValue::Sorted(idx.iter_all()),
            Value::Geo(idx) => SnapshotValue::Geo(
                idx.iter_all()
                    .into_iter()
                    .map(|(name, p)| (name, p.longitude, p.latitude))
                    .collect(),
            ),
            Value::Registers(bank) => SnapshotValue::Registers(bank.clone()),
            Value::Documents(store) => SnapshotValue::Documents(store.clone()),
        }
    }

    fn into_value(self) -> Result<Value> {
        Ok(match self {
            SnapshotValue::Str(b) => Value::Str(b.into()),
            SnapshotValue::Int(n) => Value::Int(n),
            SnapshotValue::Float(f) => Value::Float(f),
            SnapshotValue::Bool(b) => Value::Bool(b),
            SnapshotValue::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(SnapshotValue::into_value)
                    .collect::<Result<_>>()?,
            ),
            SnapshotValue::Sorted(members) => {
                let mut idx = SortedIndex::new();
                for (member, score) in members {
                    idx.insert(&member, score)?;
                }
                Value::Sorted(idx)
            },
            SnapshotValue::Geo(points) => {
                let mut idx = GeoIndex::new();
                for (name, lon, lat) in points {
                    idx.add(&name, lon, lat)?;
                }
                Value::Geo(idx)
            },
            SnapshotValue::Registers(bank) => Value::Registers(bank),
            SnapshotValue::Documents(store) => Value::Documents(store),
        })
    }
}

/// Capture the keyspace and hand the encoded document to `writer`.
/// Returns the number of captured items.
pub fn write_snapshot(keyspace: &Keyspace, writer: &mut dyn Write) -> Result<usize> {
    let exported = keyspace.export();
    let items: Vec<SnapshotItem> = exported
        .iter()
        .map(|(key, item)| SnapshotItem {
            key: key.clone(),
            value: SnapshotValue::from_value(&item.value),
            created_at: item.created_at,
            updated_at: item.updated_at,
            expires_at: item.expires_at,
        })
        .collect();
    let count = items.len();
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        taken_at: Utc::now(),
        items,
    };
    serde_json::to_writer(writer, &snapshot).map_err(|e| Error::Snapshot(e.to_string()))?;
    Ok(count)
}

/// Rehydrate the keyspace from a snapshot stream, replacing its contents.
/// Items already expired at load time are skipped. Returns the number of
/// restored items.
pub fn read_snapshot(keyspace: &Keyspace, reader: &mut dyn Read) -> Result<usize> {
    let snapshot: Snapshot =
        serde_json::from_reader(reader).map_err(|e| Error::Snapshot(e.to_string()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(Error::Snapshot(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }
    let now = Utc::now();
    let mut entries = Vec::with_capacity(snapshot.items.len());
    for item in snapshot.items {
        if item.expires_at.is_some_and(|at| at <= now) {
            continue;
        }
        let mut restored = Item::new(item.value.into_value()?, None);
        restored.created_at = item.created_at;
        restored.updated_at = item.updated_at;
        restored.expires_at = item.expires_at;
        entries.push((item.key, restored));
    }
    let count = entries.len();
    keyspace.import(entries);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::keyspace::EvictionPolicy;
    use chrono::Duration;
    use serde_json::json;

    fn populated() -> Keyspace {
        let ks = Keyspace::new(None, EvictionPolicy::Lru);
        ks.set("greeting", "hello".into(), None);
        ks.set("mortal", "soon".into(), Some(Duration::seconds(3600)));
        ks.with_sorted_mut("book", |idx| {
            idx.insert("bid:1", 150.20)?;
            idx.insert("ask:1", -150.25)
        })
        .unwrap();
        ks.with_geo_mut("atms", |idx| idx.add("atm:1", -122.4194, 37.7749))
            .unwrap();
        ks.with_registers_mut("velocity", 12, |bank| {
            bank.add(b"tx1");
            bank.add(b"tx2");
            Ok(())
        })
        .unwrap();
        ks.with_documents_mut("orders", |store| {
            store.set("ord-1", json!({"qty": 10}), None)
        })
        .unwrap();
        ks
    }

    #[test]
    fn round_trip_reproduces_typed_indices() {
        let ks = populated();
        let mut buf = Vec::new();
        let written = write_snapshot(&ks, &mut buf).unwrap();
        assert_eq!(written, 6);

        let restored = Keyspace::new(None, EvictionPolicy::Lru);
        let read = read_snapshot(&restored, &mut buf.as_slice()).unwrap();
        assert_eq!(read, 6);

        assert_eq!(&restored.get("greeting").unwrap()[..], b"hello");
        assert!(restored.ttl("mortal") > 0);
        assert_eq!(
            restored.with_sorted("book", |idx| idx.best_bid()).unwrap().unwrap().unwrap().0,
            "bid:1"
        );
        assert_eq!(
            restored.with_geo("atms", |idx| idx.len()).unwrap(),
            Some(1)
        );
        assert_eq!(
            restored
                .with_registers("velocity", |bank| bank.estimate())
                .unwrap(),
            Some(2)
        );
        assert_eq!(
            restored
                .with_documents("orders", |store| store.len())
                .unwrap(),
            Some(1)
        );
    }

    #[test]
    fn expired_items_are_dropped_on_load() {
        let ks = Keyspace::new(None, EvictionPolicy::Lru);
        ks.set("live", "x".into(), None);
        ks.set("dying", "x".into(), Some(Duration::milliseconds(50)));
        let mut buf = Vec::new();
        write_snapshot(&ks, &mut buf).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(80));
        let restored = Keyspace::new(None, EvictionPolicy::Lru);
        assert_eq!(read_snapshot(&restored, &mut buf.as_slice()).unwrap(), 1);
        assert!(restored.get("dying").is_err());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let bogus = serde_json::json!({
            "version": 99,
            "taken_at": Utc::now(),
            "items": []
        });
        let encoded = serde_json::to_vec(&bogus).unwrap();
        let ks = Keyspace::new(None, EvictionPolicy::Lru);
        assert!(read_snapshot(&ks, &mut encoded.as_slice()).is_err());
    }
}
