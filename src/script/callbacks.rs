//! The callback table scripts see.
//!
//! [`StoreApi`] is the fixed capability surface: keyspace get/set, the
//! sorted-index operations, and publish. The server hands scripts a
//! [`KeyspaceApi`] view over the live stores; tests substitute mocks.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::pubsub::PubSubBus;
use crate::store::Keyspace;

/// Narrow store capability exposed to the evaluator.
pub trait StoreApi: Send + Sync {
    /// Read a scalar key; `None` when absent or expired.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a scalar key.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Add or update a sorted-index member. Returns `true` when new.
    fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool>;

    /// Point score lookup.
    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// Ascending rank range, member names only.
    fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Descending rank range, member names only.
    fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Publish a payload; returns the delivery count.
    fn publish(&self, channel: &str, payload: &str) -> usize;
}

/// Live capability view over the keyspace and bus.
#[derive(Clone)]
pub struct KeyspaceApi {
    keyspace: Arc<Keyspace>,
    bus: Arc<PubSubBus>,
}

impl KeyspaceApi {
    /// Build the capability from shared store handles.
    pub fn new(keyspace: Arc<Keyspace>, bus: Arc<PubSubBus>) -> Self {
        Self { keyspace, bus }
    }
}

impl StoreApi for KeyspaceApi {
    fn get(&self, key: &str) -> Option<String> {
        match self.keyspace.get(key) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => None,
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.keyspace.set(key, value.into(), None);
        Ok(())
    }

    fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool> {
        self.keyspace.with_sorted_mut(key, |idx| idx.insert(member, score))
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        Ok(self
            .keyspace
            .with_sorted(key, |idx| idx.score(member))?
            .flatten())
    }

    fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self
            .keyspace
            .with_sorted(key, |idx| {
                idx.range(start, stop).into_iter().map(|(m, _)| m).collect()
            })?
            .unwrap_or_default())
    }

    fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self
            .keyspace
            .with_sorted(key, |idx| {
                idx.rev_range(start, stop)
                    .into_iter()
                    .map(|(m, _)| m)
                    .collect()
            })?
            .unwrap_or_default())
    }

    fn publish(&self, channel: &str, payload: &str) -> usize {
        self.bus.publish(channel, Bytes::copy_from_slice(payload.as_bytes()))
    }
}

/// In-memory mock used by engine tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MockStore {
        pub strings: Mutex<HashMap<String, String>>,
        pub sorted: Mutex<HashMap<String, Vec<(String, f64)>>>,
        pub published: Mutex<Vec<(String, String)>>,
    }

    impl StoreApi for MockStore {
        fn get(&self, key: &str) -> Option<String> {
            self.strings.lock().get(key).cloned()
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.strings.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool> {
            let mut sorted = self.sorted.lock();
            let members = sorted.entry(key.to_string()).or_default();
            if let Some(entry) = members.iter_mut().find(|(m, _)| m == member) {
                entry.1 = score;
                return Ok(false);
            }
            members.push((member.to_string(), score));
            Ok(true)
        }

        fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
            Ok(self
                .sorted
                .lock()
                .get(key)
                .and_then(|members| members.iter().find(|(m, _)| m == member).map(|(_, s)| *s)))
        }

        fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
            let mut members = self.sorted.lock().get(key).cloned().unwrap_or_default();
            members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let names: Vec<String> = members.into_iter().map(|(m, _)| m).collect();
            Ok(slice_range(&names, start, stop))
        }

        fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
            let mut names = self.zrange(key, 0, -1)?;
            names.reverse();
            Ok(slice_range(&names, start, stop))
        }

        fn publish(&self, channel: &str, payload: &str) -> usize {
            self.published
                .lock()
                .push((channel.to_string(), payload.to_string()));
            1
        }
    }

    fn slice_range(names: &[String], start: i64, stop: i64) -> Vec<String> {
        let n = names.len() as i64;
        if n == 0 {
            return Vec::new();
        }
        let lo = if start < 0 { n + start } else { start }.max(0);
        let hi = if stop < 0 { n + stop } else { stop }.min(n - 1);
        if lo > hi {
            return Vec::new();
        }
        names[lo as usize..=hi as usize].to_vec()
    }
}
