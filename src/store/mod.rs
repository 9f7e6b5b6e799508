//! Typed storage engines.
//!
//! The keyspace is the primary mapping; the remaining modules implement
//! the specialized indices it stores as tagged payloads.

pub mod docs;
pub mod geo;
pub mod hll;
pub mod keyspace;
pub mod snapshot;
pub mod sorted;

pub use docs::{Document, DocumentStore, Operator, Predicate};
pub use geo::{encode_geohash, haversine_km, GeoIndex, GeoPoint, Unit};
pub use hll::RegisterBank;
pub use keyspace::{EvictionPolicy, Item, Keyspace, KeyspaceStats};
pub use snapshot::{read_snapshot, write_snapshot};
pub use sorted::{ScoreBound, SortedIndex};
