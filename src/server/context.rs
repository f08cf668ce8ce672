// src/server/context.rs

use std::net::SocketAddr;
use std::sync::Arc;

use crate::core::state::ServerState;

/// Everything `spawner` and the shutdown-wait loop need once initialization
/// has finished.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub bind_addr: SocketAddr,
}
