//! Long-lived background tasks.
//!
//! TTL expiry, pub/sub idle reclamation, heartbeat escalation and periodic
//! snapshots all run on fixed cadences under the shared cancellation
//! token. None of them hold a write guard across a cadence wait, and their
//! failures are logged and counted, never surfaced to a request.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::server::AppState;
use crate::store::snapshot::write_snapshot;

/// Spawn every configured sweeper onto the tracker.
pub fn spawn_all(tracker: &TaskTracker, state: Arc<AppState>, shutdown: CancellationToken) {
    spawn_ttl_sweeper(tracker, state.clone(), shutdown.clone());
    spawn_pubsub_sweeper(tracker, state.clone(), shutdown.clone());
    if state.cluster.is_active() {
        spawn_heartbeat_ticker(tracker, state.clone(), shutdown.clone());
    }
    if state.config.snapshot.path.is_some() {
        spawn_snapshot_writer(tracker, state, shutdown);
    }
}

fn spawn_ttl_sweeper(tracker: &TaskTracker, state: Arc<AppState>, shutdown: CancellationToken) {
    let cadence = Duration::from_secs(state.config.ttl_sweep_secs.max(1));
    tracker.spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = state.keyspace.purge_expired();
                    if removed > 0 {
                        debug!(removed, "ttl sweeper pass");
                    }
                },
            }
        }
        info!("ttl sweeper stopped");
    });
}

fn spawn_pubsub_sweeper(tracker: &TaskTracker, state: Arc<AppState>, shutdown: CancellationToken) {
    let threshold = chrono::Duration::minutes(state.config.pubsub_idle_mins.max(1));
    // Sweeping at a fraction of the threshold bounds the reclaim lag.
    let cadence = Duration::from_secs((state.config.pubsub_idle_mins.max(1) as u64) * 60 / 4);
    tracker.spawn(async move {
        let mut ticker = tokio::time::interval(cadence.max(Duration::from_secs(15)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = state.bus.sweep_idle(threshold);
                    if removed > 0 {
                        debug!(removed, "pub/sub idle sweep");
                    }
                },
            }
        }
        info!("pub/sub sweeper stopped");
    });
}

fn spawn_heartbeat_ticker(tracker: &TaskTracker, state: Arc<AppState>, shutdown: CancellationToken) {
    let cadence = Duration::from_secs(state.config.cluster.heartbeat_secs.max(1));
    let grace = chrono::Duration::seconds((state.config.cluster.heartbeat_secs * 2) as i64);
    let suspect = chrono::Duration::seconds(state.config.cluster.suspect_secs as i64);
    let fail = chrono::Duration::seconds(state.config.cluster.fail_secs as i64);
    tracker.spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(id) = state.cluster.self_id() {
                        if let Err(err) = state.cluster.record_heartbeat(id) {
                            error!(error = %err, "self heartbeat failed");
                        }
                    }
                    let changes = state.cluster.escalate_missed_heartbeats(grace, suspect, fail);
                    if changes > 0 {
                        debug!(changes, "heartbeat state changes");
                    }
                },
            }
        }
        info!("heartbeat ticker stopped");
    });
}

fn spawn_snapshot_writer(tracker: &TaskTracker, state: Arc<AppState>, shutdown: CancellationToken) {
    let cadence = Duration::from_secs(state.config.snapshot.interval_secs.max(10));
    let path = state
        .config
        .snapshot
        .path
        .clone()
        .expect("caller checked path");
    tracker.spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    // Copy phase is synchronous and brief; encoding and the
                    // write happen against a temp file swapped into place.
                    let tmp = path.with_extension("tmp");
                    let result = (|| -> crate::error::Result<usize> {
                        let mut file = std::fs::File::create(&tmp)?;
                        let count = write_snapshot(&state.keyspace, &mut file)?;
                        std::fs::rename(&tmp, &path)?;
                        Ok(count)
                    })();
                    match result {
                        Ok(count) => debug!(items = count, path = %path.display(), "snapshot written"),
                        Err(err) => error!(error = %err, "snapshot failed"),
                    }
                },
            }
        }
        info!("snapshot writer stopped");
    });
}
