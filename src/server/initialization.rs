// src/server/initialization.rs

//! Builds the `ServerState` shared across workers (§5) and resolves the
//! address workers bind to, before any worker thread or background task
//! starts.

use std::net::SocketAddr;

use anyhow::Result;
use tracing::info;

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::ServerState;

pub fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);

    let bind_addr: SocketAddr = ([0, 0, 0, 0], config.bind_port).into();
    let state = ServerState::initialize(config);

    Ok(ServerContext { state, bind_addr })
}

fn log_startup_info(config: &Config) {
    info!(
        "starting corvus: {} worker thread(s), bind port {}, read-strategy {:?}",
        config.threads, config.bind_port, config.read_strategy
    );
    if config.cluster {
        info!("cluster mode enabled, seed nodes: {:?}", config.nodes);
    } else {
        info!("cluster mode disabled; routing against static seed list {:?}", config.nodes);
    }
    if config.requirepass.is_some() {
        info!("a shared password is configured; clients must AUTH before issuing other commands");
    }
}
