// src/core/state/core.rs

//! `ServerState`: the handful of items genuinely shared across worker
//! threads (§5) — the resolved config, the slot map, the node seed list, the
//! topology updater handle, and the atomic stats counters. Everything else
//! (buffers, commands, per-client state) lives inside one worker and never
//! appears here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::config::Config;
use crate::core::cluster::{NodeConf, SlotMapHandle, TopologyHandle};
use crate::core::state::stats::StatsState;

pub struct ServerState {
    pub config: Config,
    pub slot_map: SlotMapHandle,
    pub node_conf: NodeConf,
    pub topology: TopologyHandle,
    pub stats: StatsState,
    quitting: AtomicBool,
    /// Wakes a worker's `tokio::select!` immediately on shutdown, rather
    /// than making it wait for the atomic flag's next poll (§5
    /// "Cancellation": "transitions every worker's event loop to exit on
    /// the next wakeup").
    shutdown_tx: watch::Sender<bool>,
}

impl ServerState {
    pub fn initialize(config: Config) -> Arc<Self> {
        let node_conf = NodeConf::new(config.nodes.clone());
        let slot_map = SlotMapHandle::new();
        let topology = crate::core::cluster::topology::spawn(node_conf.clone(), slot_map.clone());
        let stats = StatsState::new(config.threads);
        let (shutdown_tx, _) = watch::channel(false);

        let state = Arc::new(Self {
            config,
            slot_map,
            node_conf,
            topology,
            stats,
            quitting: AtomicBool::new(false),
            shutdown_tx,
        });

        // Kick an initial slot-map fetch so the proxy isn't routing against
        // an empty map on its first request.
        state.topology.request_update();
        state
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::Acquire)
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn begin_shutdown(&self) {
        self.quitting.store(true, Ordering::Release);
        self.topology.request_quit();
        let _ = self.shutdown_tx.send(true);
    }
}
