// src/server/spawner.rs

//! Spawns the long-running pieces that sit above a single worker: the N
//! worker OS threads themselves (§4.I, §5 "Threads") and the metrics thread
//! that periodically surfaces the atomic stats counters (§5: "one... metrics
//! thread"). Statsd pumping is an out-of-scope external collaborator (§1);
//! this thread only logs, leaving actual telemetry export to that
//! collaborator.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::context::ServerContext;
use crate::core::state::ServerState;

pub struct Spawned {
    pub workers: Vec<std::thread::JoinHandle<()>>,
    pub metrics: Option<std::thread::JoinHandle<()>>,
}

pub fn spawn_all(ctx: &ServerContext) -> Spawned {
    let workers = (0..ctx.state.config.threads)
        .map(|idx| crate::worker::spawn(ctx.state.clone(), idx, ctx.bind_addr))
        .collect();

    let metrics = if ctx.state.config.stats {
        Some(spawn_metrics_thread(ctx.state.clone()))
    } else {
        None
    };

    Spawned { workers, metrics }
}

fn spawn_metrics_thread(state: Arc<ServerState>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("corvus-metrics".into())
        .spawn(move || {
            let interval = Duration::from_secs(state.config.metric_interval_secs.max(1));
            while !state.is_quitting() {
                std::thread::sleep(interval);
                if state.is_quitting() {
                    break;
                }
                info!(
                    connected_clients = state.stats.connected_clients(),
                    completed_commands = state.stats.completed_commands(),
                    recv_bytes = state.stats.recv_bytes(),
                    send_bytes = state.stats.send_bytes(),
                    "metrics tick"
                );
            }
        })
        .expect("failed to spawn metrics thread")
}
