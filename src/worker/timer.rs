// src/worker/timer.rs

//! The idle-connection timer (§4.K): a fixed-cadence sweep of a worker's own
//! client table and shared server table, tearing down anything older than
//! the configured `client_timeout`/`server_timeout`. Runs as just another
//! `spawn_local` task on the worker's `LocalSet` — no separate thread, since
//! it only ever touches state this worker already owns exclusively.

use std::time::Duration;

use crate::worker::shared::Shared;
use crate::worker::{client_conn, server_conn};

/// 100ms is the cadence the design calls "a reasonable choice".
const TICK: Duration = Duration::from_millis(100);

pub async fn run(shared: Shared) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        sweep(&shared);
    }
}

fn sweep(shared: &Shared) {
    let (client_timeout, server_timeout) = {
        let guard = shared.borrow();
        (
            guard.state.config.client_timeout_secs,
            guard.state.config.server_timeout_secs,
        )
    };

    if client_timeout > 0 {
        let deadline = Duration::from_secs(client_timeout);
        let stale: Vec<_> = shared
            .borrow()
            .clients
            .iter()
            .filter(|(_, info)| info.last_active.elapsed() >= deadline)
            .map(|(&id, _)| id)
            .collect();
        for client_id in stale {
            client_conn::timeout(shared, client_id);
        }
    }

    if server_timeout > 0 {
        let deadline = Duration::from_secs(server_timeout);
        let stale: Vec<_> = shared
            .borrow()
            .servers
            .iter()
            .filter(|(_, conn)| conn.last_active.elapsed() >= deadline)
            .map(|(&addr, _)| addr)
            .collect();
        for addr in stale {
            server_conn::timeout_server(shared, addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::state::ServerState;
    use crate::worker::shared::new_shared;

    #[tokio::test]
    async fn sweep_is_a_noop_with_timeouts_disabled() {
        let mut config = Config::default();
        config.client_timeout_secs = 0;
        config.server_timeout_secs = 0;
        let state = ServerState::initialize(config);
        let shared = new_shared(state, 0);
        // No clients/servers registered; sweeping must not panic and must
        // leave the (empty) tables untouched.
        sweep(&shared);
        assert!(shared.borrow().clients.is_empty());
    }
}
