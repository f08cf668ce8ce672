// src/server/mod.rs

use anyhow::Result;
use tracing::info;

mod context;
mod initialization;
mod spawner;

use crate::config::Config;

/// Boots the proxy: initializes shared state, spawns the worker threads and
/// the metrics thread, then waits for a shutdown signal before beginning
/// the cooperative shutdown (§5 "Cancellation").
pub async fn run(config: Config) -> Result<()> {
    let ctx = initialization::setup(config)?;
    let spawned = spawner::spawn_all(&ctx);

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping workers");
    ctx.state.begin_shutdown();

    for worker in spawned.workers {
        let _ = worker.join();
    }
    if let Some(metrics) = spawned.metrics {
        let _ = metrics.join();
    }

    info!("corvus stopped");
    Ok(())
}

/// Process bootstrap, daemonization, and the rest of the signal-handling
/// surface are out-of-scope external collaborators (§1); this just maps the
/// two conventional termination signals onto the core's cooperative
/// `quitting` flag (§5).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
