//! Server binary: configuration, tracing, signals, snapshot rehydration.

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fincache::config::ServerConfig;
use fincache::server::Server;
use fincache::store::snapshot::read_snapshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::load().context("loading configuration")?;
    let server = Server::new(config.clone()).context("building server")?;

    // Best-effort rehydration from the last snapshot.
    if let Some(path) = &config.snapshot.path {
        match std::fs::File::open(path) {
            Ok(mut file) => match read_snapshot(&server.state().keyspace, &mut file) {
                Ok(count) => info!(items = count, path = %path.display(), "snapshot loaded"),
                Err(err) => warn!(error = %err, "snapshot load failed, starting empty"),
            },
            Err(_) => info!(path = %path.display(), "no snapshot to load"),
        }
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    server.run(shutdown).await.context("running server")?;
    info!("bye");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
