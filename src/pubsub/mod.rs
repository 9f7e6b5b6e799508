//! Publish/subscribe fan-out.
//!
//! Two routing tables: exact channel name -> subscribers, and glob pattern
//! -> subscribers. Publishing walks the channel's direct subscribers, then
//! every pattern matching the channel name. Delivery goes through each
//! subscriber's unbounded outbound queue, which preserves publish order per
//! publisher; a closed queue is an implicit unsubscribe and never aborts
//! fan-out to the remaining subscribers.
//!
//! The tables are guarded by [`parking_lot::RwLock`]; sends are
//! non-blocking, so no guard is ever held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::shared::pattern::GlobPattern;

/// Identifies one subscriber (one connection).
pub type SubscriberId = Uuid;

/// A message pushed onto a subscriber's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum PubSubMessage {
    /// Delivery for an exact-channel subscription.
    Message {
        /// Channel the payload was published to.
        channel: String,
        /// Published payload.
        payload: Bytes,
    },
    /// Delivery for a pattern subscription.
    PatternMessage {
        /// The subscribed pattern.
        pattern: String,
        /// Channel the payload was published to.
        channel: String,
        /// Published payload.
        payload: Bytes,
    },
}

/// Sender half of a subscriber's outbound queue.
pub type Outbound = mpsc::UnboundedSender<PubSubMessage>;

struct SubEntry {
    sender: Outbound,
    last_active_ms: AtomicI64,
}

impl SubEntry {
    fn new(sender: Outbound) -> Self {
        Self {
            sender,
            last_active_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn touch(&self) {
        self.last_active_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn idle_since(&self, cutoff_ms: i64) -> bool {
        self.last_active_ms.load(Ordering::Relaxed) < cutoff_ms
    }
}

struct PatternEntry {
    pattern: GlobPattern,
    subscribers: HashMap<SubscriberId, SubEntry>,
}

/// The pub/sub bus.
///
/// # Examples
///
/// ```rust
/// use fincache::pubsub::{PubSubBus, PubSubMessage};
/// use uuid::Uuid;
///
/// let bus = PubSubBus::new();
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// bus.subscribe(Uuid::new_v4(), "md", tx);
///
/// assert_eq!(bus.publish("md", "AAPL:150.25".into()), 1);
/// match rx.try_recv().unwrap() {
///     PubSubMessage::Message { channel, payload } => {
///         assert_eq!(channel, "md");
///         assert_eq!(&payload[..], b"AAPL:150.25");
///     },
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
#[derive(Default)]
pub struct PubSubBus {
    channels: RwLock<HashMap<String, HashMap<SubscriberId, SubEntry>>>,
    patterns: RwLock<HashMap<String, PatternEntry>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl PubSubBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an exact-channel subscription.
    pub fn subscribe(&self, id: SubscriberId, channel: &str, sender: Outbound) {
        self.channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .insert(id, SubEntry::new(sender));
    }

    /// Remove an exact-channel subscription. Returns `true` if present.
    pub fn unsubscribe(&self, id: SubscriberId, channel: &str) -> bool {
        let mut channels = self.channels.write();
        let Some(subs) = channels.get_mut(channel) else {
            return false;
        };
        let removed = subs.remove(&id).is_some();
        if subs.is_empty() {
            channels.remove(channel);
        }
        removed
    }

    /// Register a pattern subscription.
    pub fn psubscribe(&self, id: SubscriberId, pattern: &str, sender: Outbound) -> Result<()> {
        let compiled = GlobPattern::compile(pattern)?;
        self.patterns
            .write()
            .entry(pattern.to_string())
            .or_insert_with(|| PatternEntry {
                pattern: compiled,
                subscribers: HashMap::new(),
            })
            .subscribers
            .insert(id, SubEntry::new(sender));
        Ok(())
    }

    /// Remove a pattern subscription. Returns `true` if present.
    pub fn punsubscribe(&self, id: SubscriberId, pattern: &str) -> bool {
        let mut patterns = self.patterns.write();
        let Some(entry) = patterns.get_mut(pattern) else {
            return false;
        };
        let removed = entry.subscribers.remove(&id).is_some();
        if entry.subscribers.is_empty() {
            patterns.remove(pattern);
        }
        removed
    }

    /// Drop every subscription owned by a subscriber. Called on
    /// connection close so records disappear deterministically.
    pub fn unsubscribe_all(&self, id: SubscriberId) {
        let mut channels = self.channels.write();
        channels.retain(|_, subs| {
            subs.remove(&id);
            !subs.is_empty()
        });
        drop(channels);

        let mut patterns = self.patterns.write();
        patterns.retain(|_, entry| {
            entry.subscribers.remove(&id);
            !entry.subscribers.is_empty()
        });
    }

    /// Fan a payload out to the channel's direct subscribers and every
    /// matching pattern's subscribers. Returns the delivery count.
    pub fn publish(&self, channel: &str, payload: Bytes) -> usize {
        let mut delivered = 0usize;
        let mut dead_direct: Vec<SubscriberId> = Vec::new();
        let mut dead_pattern: Vec<(String, SubscriberId)> = Vec::new();

        {
            let channels = self.channels.read();
            if let Some(subs) = channels.get(channel) {
                for (id, entry) in subs {
                    let message = PubSubMessage::Message {
                        channel: channel.to_string(),
                        payload: payload.clone(),
                    };
                    if entry.sender.send(message).is_ok() {
                        entry.touch();
                        delivered += 1;
                    } else {
                        dead_direct.push(*id);
                    }
                }
            }
        }
        {
            let patterns = self.patterns.read();
            for (text, entry) in patterns.iter() {
                if !entry.pattern.matches(channel) {
                    continue;
                }
                for (id, sub) in &entry.subscribers {
                    let message = PubSubMessage::PatternMessage {
                        pattern: text.clone(),
                        channel: channel.to_string(),
                        payload: payload.clone(),
                    };
                    if sub.sender.send(message).is_ok() {
                        sub.touch();
                        delivered += 1;
                    } else {
                        dead_pattern.push((text.clone(), *id));
                    }
                }
            }
        }

        // Closed queues are implicit unsubscribes.
        for id in &dead_direct {
            self.unsubscribe(*id, channel);
        }
        for (pattern, id) in &dead_pattern {
            self.punsubscribe(*id, pattern);
        }
        let dropped = dead_direct.len() + dead_pattern.len();
        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            debug!(channel, dropped, "removed closed subscribers during publish");
        }
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Reclaim subscribers idle beyond `threshold` or whose queues have
    /// closed. Returns the number removed.
    pub fn sweep_idle(&self, threshold: Duration) -> usize {
        let cutoff_ms = (Utc::now() - threshold).timestamp_millis();
        let mut removed = 0usize;

        let mut channels = self.channels.write();
        channels.retain(|_, subs| {
            subs.retain(|_, entry| {
                let keep = !entry.idle_since(cutoff_ms) && !entry.sender.is_closed();
                if !keep {
                    removed += 1;
                }
                keep
            });
            !subs.is_empty()
        });
        drop(channels);

        let mut patterns = self.patterns.write();
        patterns.retain(|_, entry| {
            entry.subscribers.retain(|_, sub| {
                let keep = !sub.idle_since(cutoff_ms) && !sub.sender.is_closed();
                if !keep {
                    removed += 1;
                }
                keep
            });
            !entry.subscribers.is_empty()
        });
        drop(patterns);

        if removed > 0 {
            debug!(removed, "pub/sub idle sweep reclaimed subscribers");
        }
        removed
    }

    /// Distinct channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Distinct patterns with at least one subscriber.
    pub fn pattern_count(&self) -> usize {
        self.patterns.read().len()
    }

    /// Total successful deliveries.
    pub fn delivered_total(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PubSubBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubBus")
            .field("channels", &self.channel_count())
            .field("patterns", &self.pattern_count())
            .field("delivered", &self.delivered_total())
            .finish()
    }
}
