//! Primary keyspace: `key -> typed item` with TTL, access metadata and
//! eviction.
//!
//! The map is a sharded [`DashMap`]; readers proceed concurrently and
//! writers lock only the touched shard, so there is no global keyspace
//! lock. Expiry has two paths: reads report past-expiry items as absent
//! and drop them opportunistically, and a periodic sweeper deletes the
//! rest in a single write-guarded pass per shard. Readers never observe an
//! expired payload.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::shared::pattern::GlobPattern;
use crate::store::{DocumentStore, GeoIndex, RegisterBank, SortedIndex};
use crate::types::Value;

/// Victim-selection policy when the memory budget is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the least-recently-used of a random sample.
    #[default]
    Lru,
    /// Evict the least-frequently-used of a random sample.
    Lfu,
    /// Evict a random sample member.
    Random,
}

/// Entries examined per eviction round.
const EVICTION_SAMPLE: usize = 5;

/// A stored item: payload plus lifecycle metadata.
#[derive(Debug)]
pub struct Item {
    /// Typed payload.
    pub value: Value,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last write instant.
    pub updated_at: DateTime<Utc>,
    /// Absolute expiry; `None` means the item never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Last access, unix milliseconds. Updated under shared references.
    last_access_ms: AtomicI64,
    /// Access count.
    touches: AtomicU64,
}

impl Item {
    pub(crate) fn new(value: Value, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        Self {
            value,
            created_at: now,
            updated_at: now,
            expires_at: ttl.map(|t| now + t),
            last_access_ms: AtomicI64::new(now.timestamp_millis()),
            touches: AtomicU64::new(0),
        }
    }

    /// Logically absent once the current instant passes the expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn touch(&self) {
        self.last_access_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.touches.fetch_add(1, Ordering::Relaxed);
    }

    /// Access count so far.
    pub fn touch_count(&self) -> u64 {
        self.touches.load(Ordering::Relaxed)
    }

    fn footprint(&self, key: &str) -> usize {
        key.len() + self.value.approximate_size() + 96
    }
}

impl Clone for Item {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            last_access_ms: AtomicI64::new(self.last_access_ms.load(Ordering::Relaxed)),
            touches: AtomicU64::new(self.touches.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct KeyspaceStats {
    /// Total stored keys, including expired-but-unswept entries.
    pub keys: usize,
    /// Keys carrying an expiry.
    pub expires: usize,
    /// Read hits.
    pub hits: u64,
    /// Read misses (absent or expired).
    pub misses: u64,
    /// Items dropped by expiry (either path).
    pub expired: u64,
    /// Items dropped by eviction.
    pub evictions: u64,
    /// Approximate bytes in use.
    pub memory_used: usize,
    /// Configured budget, if any.
    pub max_memory: Option<usize>,
}

/// The primary mapping.
///
/// # Examples
///
/// ```rust
/// use fincache::store::Keyspace;
///
/// let ks = Keyspace::new(None, Default::default());
/// ks.set("greeting", "hello".into(), None);
/// assert_eq!(&ks.get("greeting").unwrap()[..], b"hello");
/// assert_eq!(ks.ttl("greeting"), -1);
/// assert_eq!(ks.ttl("absent"), -2);
/// ```
#[derive(Debug)]
pub struct Keyspace {
    items: DashMap<String, Item>,
    max_memory: Option<usize>,
    policy: EvictionPolicy,
    memory_used: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
}

impl Keyspace {
    /// Create a keyspace with an optional memory budget.
    pub fn new(max_memory: Option<usize>, policy: EvictionPolicy) -> Self {
        Self {
            items: DashMap::new(),
            max_memory,
            policy,
            memory_used: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create or overwrite a key. A `None` TTL means no expiry.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let item = Item::new(value, ttl);
        let added = item.footprint(key);
        if let Some(old) = self.items.insert(key.to_string(), item) {
            self.account_remove(old.footprint(key));
        }
        self.memory_used.fetch_add(added, Ordering::Relaxed);
        self.maybe_evict();
    }

    /// Read a scalar payload rendered as bytes. Missing, expired and
    /// non-scalar keys fail with the appropriate typed error.
    pub fn get(&self, key: &str) -> Result<Bytes> {
        let now = Utc::now();
        {
            let Some(item) = self.items.get(key) else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Err(Error::NotFound);
            };
            if !item.is_expired(now) {
                item.touch();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return match &item.value {
                    Value::Str(b) => Ok(b.clone()),
                    Value::Int(n) => Ok(Bytes::from(n.to_string())),
                    Value::Float(f) => Ok(Bytes::from(crate::types::format_f64(*f))),
                    Value::Bool(b) => Ok(Bytes::from(if *b { "1" } else { "0" })),
                    _ => Err(Error::WrongType),
                };
            }
        }
        // Passive expiry path.
        self.remove_expired(key, now);
        self.misses.fetch_add(1, Ordering::Relaxed);
        Err(Error::NotFound)
    }

    /// Delete keys. Returns how many existed (expired entries count as
    /// absent).
    pub fn delete<S: AsRef<str>>(&self, keys: &[S]) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for key in keys {
            let key = key.as_ref();
            if let Some((k, item)) = self.items.remove(key) {
                self.account_remove(item.footprint(&k));
                if item.is_expired(now) {
                    self.expired.fetch_add(1, Ordering::Relaxed);
                } else {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Count how many of the given keys exist and are live.
    pub fn exists<S: AsRef<str>>(&self, keys: &[S]) -> usize {
        let now = Utc::now();
        keys.iter()
            .filter(|key| {
                self.items
                    .get(key.as_ref())
                    .is_some_and(|item| !item.is_expired(now))
            })
            .count()
    }

    /// Set or replace a key's TTL. Returns `false` for missing keys.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Utc::now();
        match self.items.get_mut(key) {
            Some(mut item) if !item.is_expired(now) => {
                item.expires_at = Some(now + ttl);
                true
            },
            _ => false,
        }
    }

    /// Remaining TTL in whole seconds: -2 absent, -1 no expiry. A live
    /// key never reports a value below 1.
    pub fn ttl(&self, key: &str) -> i64 {
        let now = Utc::now();
        match self.items.get(key) {
            Some(item) if !item.is_expired(now) => match item.expires_at {
                Some(at) => ((at - now).num_seconds()).max(1),
                None => -1,
            },
            _ => -2,
        }
    }

    /// Snapshot of live key names matching the pattern.
    pub fn keys(&self, pattern: &GlobPattern) -> Vec<String> {
        let now = Utc::now();
        self.items
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && pattern.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop everything.
    pub fn flush(&self) {
        self.items.clear();
        self.memory_used.store(0, Ordering::Relaxed);
    }

    /// Total stored entries, including expired-but-unswept ones.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the keyspace is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Active-expiry sweep: delete every expired entry in one
    /// write-guarded pass. Returns the removal count.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut dropped = 0usize;
        let mut reclaimed = 0usize;
        self.items.retain(|key, item| {
            if item.is_expired(now) {
                dropped += 1;
                reclaimed += item.footprint(key);
                false
            } else {
                true
            }
        });
        if dropped > 0 {
            self.expired.fetch_add(dropped as u64, Ordering::Relaxed);
            self.account_remove(reclaimed);
            debug!(dropped, "ttl sweep removed expired keys");
        }
        dropped
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> KeyspaceStats {
        let expires = self
            .items
            .iter()
            .filter(|entry| entry.value().expires_at.is_some())
            .count();
        KeyspaceStats {
            keys: self.items.len(),
            expires,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            memory_used: self.memory_used.load(Ordering::Relaxed),
            max_memory: self.max_memory,
        }
    }

    /// Copy out every live item. This is the snapshot read phase; it runs
    /// under shard read access only.
    pub fn export(&self) -> Vec<(String, Item)> {
        let now = Utc::now();
        self.items
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Rehydrate from a snapshot export. Existing contents are replaced.
    pub fn import(&self, entries: Vec<(String, Item)>) {
        self.flush();
        for (key, item) in entries {
            let size = item.footprint(&key);
            self.items.insert(key, item);
            self.memory_used.fetch_add(size, Ordering::Relaxed);
        }
    }

    // ---- typed accessors ----
    //
    // Each runs its closure under the entry guard of the key's shard:
    // exclusive for writers, shared for readers, never across an await.

    /// Mutate (creating if needed) the sorted index under `key`.
    pub fn with_sorted_mut<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut SortedIndex) -> Result<T>,
    ) -> Result<T> {
        self.with_typed_mut(
            key,
            || Value::Sorted(SortedIndex::new()),
            |value| match value {
                Value::Sorted(idx) => Some(idx),
                _ => None,
            },
            f,
        )
    }

    /// Read the sorted index under `key`. `Ok(None)` when the key is
    /// absent or expired.
    pub fn with_sorted<T>(&self, key: &str, f: impl FnOnce(&SortedIndex) -> T) -> Result<Option<T>> {
        self.with_typed(
            key,
            |value| match value {
                Value::Sorted(idx) => Some(idx),
                _ => None,
            },
            f,
        )
    }

    /// Mutate (creating if needed) the geo index under `key`.
    pub fn with_geo_mut<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut GeoIndex) -> Result<T>,
    ) -> Result<T> {
        self.with_typed_mut(
            key,
            || Value::Geo(GeoIndex::new()),
            |value| match value {
                Value::Geo(idx) => Some(idx),
                _ => None,
            },
            f,
        )
    }

    /// Read the geo index under `key`.
    pub fn with_geo<T>(&self, key: &str, f: impl FnOnce(&GeoIndex) -> T) -> Result<Option<T>> {
        self.with_typed(
            key,
            |value| match value {
                Value::Geo(idx) => Some(idx),
                _ => None,
            },
            f,
        )
    }

    /// Mutate (creating at the given precision if needed) the register
    /// bank under `key`.
    pub fn with_registers_mut<T>(
        &self,
        key: &str,
        default_precision: u8,
        f: impl FnOnce(&mut RegisterBank) -> Result<T>,
    ) -> Result<T> {
        self.with_typed_mut(
            key,
            || {
                Value::Registers(
                    RegisterBank::new(default_precision).expect("default precision is in range"),
                )
            },
            |value| match value {
                Value::Registers(bank) => Some(bank),
                _ => None,
            },
            f,
        )
    }

    /// Read the register bank under `key`.
    pub fn with_registers<T>(
        &self,
        key: &str,
        f: impl FnOnce(&RegisterBank) -> T,
    ) -> Result<Option<T>> {
        self.with_typed(
            key,
            |value| match value {
                Value::Registers(bank) => Some(bank),
                _ => None,
            },
            f,
        )
    }

    /// Mutate (creating if needed) the document store under `key`.
    pub fn with_documents_mut<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut DocumentStore) -> Result<T>,
    ) -> Result<T> {
        self.with_typed_mut(
            key,
            || Value::Documents(DocumentStore::new()),
            |value| match value {
                Value::Documents(store) => Some(store),
                _ => None,
            },
            f,
        )
    }

    /// Read the document store under `key`.
    pub fn with_documents<T>(
        &self,
        key: &str,
        f: impl FnOnce(&DocumentStore) -> T,
    ) -> Result<Option<T>> {
        self.with_typed(
            key,
            |value| match value {
                Value::Documents(store) => Some(store),
                _ => None,
            },
            f,
        )
    }

    fn with_typed_mut<S, T>(
        &self,
        key: &str,
        make: impl FnOnce() -> Value,
        project: impl Fn(&mut Value) -> Option<&mut S>,
        f: impl FnOnce(&mut S) -> Result<T>,
    ) -> Result<T> {
        let now = Utc::now();
        let result;
        match self.items.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    self.expired.fetch_add(1, Ordering::Relaxed);
                    let before = occupied.get().footprint(key);
                    self.account_remove(before);
                    *occupied.get_mut() = Item::new(make(), None);
                    self.memory_used
                        .fetch_add(occupied.get().footprint(key), Ordering::Relaxed);
                }
                let before = occupied.get().footprint(key);
                let item = occupied.get_mut();
                match project(&mut item.value) {
                    Some(target) => {
                        result = f(target)?;
                        item.updated_at = now;
                        item.touch();
                    },
                    None => return Err(Error::WrongType),
                }
                let after = occupied.get().footprint(key);
                self.account_resize(before, after);
            },
            Entry::Vacant(vacant) => {
                let mut item = Item::new(make(), None);
                let target = project(&mut item.value).expect("constructor builds projected variant");
                result = f(target)?;
                let size = item.footprint(key);
                vacant.insert(item);
                self.memory_used.fetch_add(size, Ordering::Relaxed);
            },
        }
        self.maybe_evict();
        Ok(result)
    }

    fn with_typed<S, T>(
        &self,
        key: &str,
        project: impl Fn(&Value) -> Option<&S>,
        f: impl FnOnce(&S) -> T,
    ) -> Result<Option<T>> {
        let now = Utc::now();
        let Some(item) = self.items.get(key) else {
            return Ok(None);
        };
        if item.is_expired(now) {
            return Ok(None);
        }
        match project(&item.value) {
            Some(target) => {
                item.touch();
                Ok(Some(f(target)))
            },
            None => Err(Error::WrongType),
        }
    }

    // ---- eviction ----

    fn maybe_evict(&self) {
        let Some(budget) = self.max_memory else {
            return;
        };
        while self.memory_used.load(Ordering::Relaxed) > budget && !self.items.is_empty() {
            let Some(victim) = self.pick_victim() else {
                return;
            };
            if let Some((key, item)) = self.items.remove(&victim) {
                self.account_remove(item.footprint(&key));
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "evicted under memory pressure");
            }
        }
    }

    /// Scan a random sample and pick the stalest entry per policy.
    fn pick_victim(&self) -> Option<String> {
        let len = self.items.len();
        if len == 0 {
            return None;
        }
        let start = rand::thread_rng().gen_range(0..len);
        let sample = self
            .items
            .iter()
            .skip(start)
            .take(EVICTION_SAMPLE)
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().last_access_ms.load(Ordering::Relaxed),
                    entry.value().touch_count(),
                )
            })
            .collect::<Vec<_>>();
        let pick = match self.policy {
            EvictionPolicy::Lru => sample.into_iter().min_by_key(|(_, at, _)| *at),
            EvictionPolicy::Lfu => sample.into_iter().min_by_key(|(_, _, touches)| *touches),
            EvictionPolicy::Random => sample.into_iter().next(),
        };
        pick.map(|(key, _, _)| key)
    }

    fn account_remove(&self, size: usize) {
        // Saturating: concurrent resize accounting may be slightly stale.
        let _ = self
            .memory_used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(size))
            });
    }

    fn account_resize(&self, before: usize, after: usize) {
        if after >= before {
            self.memory_used.fetch_add(after - before, Ordering::Relaxed);
        } else {
            self.account_remove(before - after);
        }
    }

    fn remove_expired(&self, key: &str, now: DateTime<Utc>) {
        if let Entry::Occupied(occupied) = self.items.entry(key.to_string()) {
            if occupied.get().is_expired(now) {
                let footprint = occupied.get().footprint(key);
                occupied.remove();
                self.account_remove(footprint);
                self.expired.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
