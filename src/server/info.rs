//! `INFO` reply construction.

use chrono::Utc;

use crate::server::AppState;

/// Keyed, line-oriented sections: `Server`, `Keyspace`, `Memory`.
pub fn build_info(state: &AppState) -> String {
    let stats = state.keyspace.stats();
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    let mut out = String::new();

    out.push_str("# Server\r\n");
    out.push_str(&format!("version:{}\r\n", env!("CARGO_PKG_VERSION")));
    out.push_str(&format!("uptime_in_seconds:{uptime}\r\n"));
    out.push_str(&format!(
        "connections_received:{}\r\n",
        state
            .stats
            .connections_total
            .load(std::sync::atomic::Ordering::Relaxed)
    ));
    out.push_str(&format!(
        "total_commands_processed:{}\r\n",
        state
            .stats
            .commands_total
            .load(std::sync::atomic::Ordering::Relaxed)
    ));
    out.push_str("\r\n# Keyspace\r\n");
    out.push_str(&format!("keys:{}\r\n", stats.keys));
    out.push_str(&format!("expires:{}\r\n", stats.expires));
    out.push_str(&format!("keyspace_hits:{}\r\n", stats.hits));
    out.push_str(&format!("keyspace_misses:{}\r\n", stats.misses));
    out.push_str(&format!("expired_keys:{}\r\n", stats.expired));

    out.push_str("\r\n# Memory\r\n");
    out.push_str(&format!("used_memory:{}\r\n", stats.memory_used));
    out.push_str(&format!(
        "maxmemory:{}\r\n",
        stats.max_memory.unwrap_or(0)
    ));
    out.push_str(&format!("evicted_keys:{}\r\n", stats.evictions));

    out
}
