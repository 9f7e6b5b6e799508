//! The wire server: shared state, listener and connection tasks.

pub mod commands;
pub mod connection;
pub mod dispatcher;
pub mod http;
pub mod info;
pub mod sweepers;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::cluster::Cluster;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::pubsub::PubSubBus;
use crate::script::{Interpreter, ScriptEngine, ScriptRegistry};
use crate::store::Keyspace;

pub use dispatcher::{CommandRegistry, ConnectionContext};

/// Monotonic server counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Accepted connections.
    pub connections_total: AtomicU64,
    /// Dispatched commands.
    pub commands_total: AtomicU64,
}

/// Shared state handed to every connection task and the HTTP surface.
pub struct AppState {
    /// Loaded configuration.
    pub config: ServerConfig,
    /// Primary keyspace.
    pub keyspace: Arc<Keyspace>,
    /// Pub/sub bus.
    pub bus: Arc<PubSubBus>,
    /// Loaded scripts.
    pub scripts: Arc<ScriptRegistry>,
    /// Script evaluator.
    pub engine: Arc<dyn ScriptEngine>,
    /// Serializes script execution against the keyspace.
    pub script_guard: tokio::sync::Mutex<()>,
    /// Cluster map.
    pub cluster: Arc<Cluster>,
    /// Process start instant.
    pub started_at: DateTime<Utc>,
    /// Counters.
    pub stats: ServerStats,
}

impl AppState {
    /// Build state from configuration, wiring the cluster map when
    /// cluster mode is enabled.
    pub fn from_config(config: ServerConfig) -> Result<Arc<Self>> {
        let keyspace = Arc::new(Keyspace::new(
            config.max_memory_bytes,
            config.eviction_policy,
        ));
        let node_id = config
            .cluster
            .enabled
            .then(|| {
                config
                    .cluster
                    .node_id
                    .clone()
                    .unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4()))
            });
        let cluster = Arc::new(Cluster::new(node_id.clone()));
        if let Some(id) = &node_id {
            let addr = config
                .cluster
                .advertise_addr
                .clone()
                .unwrap_or_else(|| config.bind_addr.clone());
            cluster.add_primary(id, &addr, config.port)?;
            cluster.rebalance()?;
        }
        Ok(Arc::new(Self {
            config,
            keyspace,
            bus: Arc::new(PubSubBus::new()),
            scripts: Arc::new(ScriptRegistry::new()),
            engine: Arc::new(Interpreter::new()),
            script_guard: tokio::sync::Mutex::new(()),
            cluster,
            started_at: Utc::now(),
            stats: ServerStats::default(),
        }))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("keys", &self.keyspace.len())
            .field("cluster_active", &self.cluster.is_active())
            .finish()
    }
}

/// The wire-protocol server.
#[derive(Debug)]
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// Build a server from configuration.
    pub fn new(config: ServerConfig) -> Result<Self> {
        Ok(Self {
            state: AppState::from_config(config)?,
        })
    }

    /// Shared state handle (used by the HTTP surface and tests).
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Run until the token is cancelled: accept connections, spawn the
    /// background sweepers and the HTTP surface, then drain within the
    /// configured grace period.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let wire_addr = format!("{}:{}", self.state.config.bind_addr, self.state.config.port);
        let listener = TcpListener::bind(&wire_addr).await?;
        info!(addr = %wire_addr, "wire listener bound");
        self.run_with_listener(listener, shutdown).await
    }

    /// Run against an already-bound listener (ephemeral ports in tests).
    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let tracker = TaskTracker::new();
        sweepers::spawn_all(&tracker, self.state.clone(), shutdown.clone());

        let http_state = self.state.clone();
        let http_shutdown = shutdown.clone();
        tracker.spawn(async move {
            if let Err(err) = http::serve(http_state, http_shutdown).await {
                error!(error = %err, "http surface failed");
            }
        });

        let registry = Arc::new(CommandRegistry::standard());
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            self.state
                                .stats
                                .connections_total
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            let state = self.state.clone();
                            let registry = registry.clone();
                            let token = shutdown.clone();
                            tracker.spawn(async move {
                                connection::serve(state, registry, stream, peer, token).await;
                            });
                        },
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                        },
                    }
                },
            }
        }

        info!("draining in-flight connections");
        tracker.close();
        let grace = std::time::Duration::from_secs(self.state.config.shutdown_grace_secs);
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!("shutdown deadline exceeded, abandoning remaining tasks");
        }
        Ok(())
    }
}

/// Test helpers shared by the in-crate unit tests.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Fresh state with default configuration.
    pub fn test_state() -> Arc<AppState> {
        AppState::from_config(ServerConfig::default()).expect("default config is valid")
    }
}
