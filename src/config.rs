//! Server configuration.
//!
//! Configuration can be loaded from:
//! 1. A TOML file (`fincache.toml`, or the path in `FINCACHE_CONFIG`)
//! 2. Environment variables with a `FINCACHE_` prefix
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! bind_addr = "0.0.0.0"
//! port = 6379
//! http_port = 8080
//! max_memory_bytes = 268435456
//! eviction_policy = "lru"
//!
//! [cluster]
//! enabled = true
//! node_id = "node-a"
//!
//! [snapshot]
//! path = "/var/lib/fincache/dump.json"
//! interval_secs = 300
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::EvictionPolicy;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface the wire listener binds.
    pub bind_addr: String,
    /// Wire protocol port.
    pub port: u16,
    /// Administrative HTTP port.
    pub http_port: u16,
    /// Memory budget; `None` disables eviction.
    pub max_memory_bytes: Option<usize>,
    /// Eviction victim selection.
    pub eviction_policy: EvictionPolicy,
    /// Per-connection read deadline, refreshed each request.
    pub read_timeout_secs: u64,
    /// Active TTL sweep cadence.
    pub ttl_sweep_secs: u64,
    /// Idle threshold before a subscriber is reclaimed.
    pub pubsub_idle_mins: i64,
    /// Register-bank precision used when `PFADD` creates a key.
    pub hll_default_precision: u8,
    /// Bound on graceful shutdown drain.
    pub shutdown_grace_secs: u64,
    /// Script execution limits.
    pub script: ScriptLimits,
    /// Cluster participation.
    pub cluster: ClusterConfig,
    /// Periodic snapshots.
    pub snapshot: SnapshotConfig,
}

/// Script budget knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum interpreter operations per invocation.
    pub max_ops: u64,
    /// Maximum wall-clock milliseconds per invocation.
    pub max_millis: u64,
}

/// Cluster participation knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Whether this node participates in a cluster.
    pub enabled: bool,
    /// Stable node id; defaults to a generated one.
    pub node_id: Option<String>,
    /// Address advertised to peers in redirections.
    pub advertise_addr: Option<String>,
    /// Heartbeat cadence in seconds.
    pub heartbeat_secs: u64,
    /// Missed-heartbeat window before `suspected-fail`.
    pub suspect_secs: u64,
    /// Missed-heartbeat window before `fail`.
    pub fail_secs: u64,
}

/// Snapshot knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Destination file; `None` disables periodic snapshots.
    pub path: Option<PathBuf>,
    /// Snapshot cadence in seconds.
    pub interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 6379,
            http_port: 8080,
            max_memory_bytes: None,
            eviction_policy: EvictionPolicy::Lru,
            read_timeout_secs: 30,
            ttl_sweep_secs: 60,
            pubsub_idle_mins: 30,
            hll_default_precision: 14,
            shutdown_grace_secs: 10,
            script: ScriptLimits::default(),
            cluster: ClusterConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_ops: 100_000,
            max_millis: 250,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: None,
            advertise_addr: None,
            heartbeat_secs: 5,
            suspect_secs: 15,
            fail_secs: 60,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: None,
            interval_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML configuration file
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let path = std::env::var("FINCACHE_CONFIG").unwrap_or_else(|_| "fincache.toml".to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("FINCACHE_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(port) = env_parse("FINCACHE_PORT") {
            self.port = port;
        }
        if let Some(port) = env_parse("FINCACHE_HTTP_PORT") {
            self.http_port = port;
        }
        if let Some(bytes) = env_parse("FINCACHE_MAX_MEMORY_BYTES") {
            self.max_memory_bytes = Some(bytes);
        }
        if let Some(secs) = env_parse("FINCACHE_READ_TIMEOUT_SECS") {
            self.read_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("FINCACHE_TTL_SWEEP_SECS") {
            self.ttl_sweep_secs = secs;
        }
        if let Ok(value) = std::env::var("FINCACHE_CLUSTER_ENABLED") {
            self.cluster.enabled = value.eq_ignore_ascii_case("true") || value == "1";
        }
        if let Ok(id) = std::env::var("FINCACHE_NODE_ID") {
            self.cluster.node_id = Some(id);
        }
        if let Ok(path) = std::env::var("FINCACHE_SNAPSHOT_PATH") {
            self.snapshot.path = Some(PathBuf::from(path));
        }
    }

    fn validate(&self) -> Result<()> {
        if !(4..=16).contains(&self.hll_default_precision) {
            return Err(Error::Config(format!(
                "hll_default_precision {} outside [4, 16]",
                self.hll_default_precision
            )));
        }
        if self.read_timeout_secs == 0 {
            return Err(Error::Config("read_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
