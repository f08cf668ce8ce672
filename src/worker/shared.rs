// src/worker/shared.rs

//! The per-worker, single-threaded shared state (§5: "all buffers, commands,
//! parsers, and queues belonging to connections owned by a worker are
//! accessed only by that worker"). Everything here lives behind an
//! `Rc<RefCell<_>>`: sound only because every task touching it is
//! `spawn_local`'d onto the same `LocalSet`, which itself is pinned to one
//! OS thread by a `current_thread` runtime (see `worker/mod.rs`). No atomics,
//! no locks — exactly the simplification the design calls the "central
//! simplification" of the concurrency model.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;

use crate::core::command::{Command, CommandArena, CommandId};
use crate::core::state::{ClientId, ClientTable, ServerState};

/// One backend connection's pipeline bookkeeping, from the perspective of
/// every other task on this worker. `waiting` is the server's FIFO
/// "written, awaiting reply" queue (§3 Command invariants) — kept here
/// rather than as a local variable inside the connection's own task so the
/// idle timer (§4.K) can fail everything on a timed-out server without the
/// connection task's cooperation.
pub struct ServerConnHandle {
    pub tx: UnboundedSender<CommandId>,
    pub waiting: VecDeque<CommandId>,
    pub last_active: Instant,
    pub abort: AbortHandle,
}

pub struct WorkerShared {
    pub state: Arc<ServerState>,
    pub worker_index: usize,
    pub clients: ClientTable,
    pub servers: HashMap<SocketAddr, ServerConnHandle>,
    pub arena: CommandArena,
    pub rng: SmallRng,
    /// Count of spawned client/server connection tasks not yet finished.
    /// `worker::run` polls this down to zero during shutdown before letting
    /// the worker thread's runtime drop the `LocalSet` (§5 "Cancellation").
    pub active_tasks: Rc<Cell<usize>>,
}

pub type Shared = Rc<RefCell<WorkerShared>>;

pub fn new_shared(state: Arc<ServerState>, worker_index: usize) -> Shared {
    Rc::new(RefCell::new(WorkerShared {
        state,
        worker_index,
        clients: ClientTable::new(),
        servers: HashMap::new(),
        arena: CommandArena::new(),
        rng: SmallRng::from_entropy(),
        active_tasks: Rc::new(Cell::new(0)),
    }))
}

impl WorkerShared {
    pub fn command(&self, id: CommandId) -> Option<&Command> {
        self.arena.get(id)
    }

    pub fn command_mut(&mut self, id: CommandId) -> Option<&mut Command> {
        self.arena.get_mut(id)
    }

    pub fn task_started(&self) {
        self.active_tasks.set(self.active_tasks.get() + 1);
    }

    pub fn task_finished(&self) {
        self.active_tasks.set(self.active_tasks.get().saturating_sub(1));
    }

    /// Drain the front of `client_id`'s reply queue for every command that
    /// has finished (successfully or not), writing its bytes out in order.
    /// Stops at the first command still in flight — this is exactly what
    /// preserves per-client reply ordering across concurrently-completing
    /// server pipelines (§5 "Ordering guarantees").
    pub fn try_flush_client(&mut self, client_id: ClientId) {
        loop {
            let Some(&front_id) = self
                .clients
                .get(client_id)
                .and_then(|c| c.cmd_queue.front())
            else {
                return;
            };
            let ready = match self.arena.get(front_id) {
                Some(cmd) => cmd.failed.is_some() || cmd.rep_raw.is_some(),
                None => true,
            };
            if !ready {
                return;
            }

            let cmd = self.arena.remove(front_id);
            if let Some(client) = self.clients.get_mut(client_id) {
                client.cmd_queue.pop_front();
            }

            let elapsed_us = cmd.created.elapsed().as_micros() as u64;
            self.state.stats.record_total_latency_us(elapsed_us);

            let threshold = self.state.config.slowlog_log_slower_than_us;
            if threshold >= 0 && elapsed_us as i64 >= threshold {
                self.state
                    .stats
                    .record_slow_command(crate::core::command::command_name(&cmd.req_raw), elapsed_us as i64);
            }

            let out = match (&cmd.failed, &cmd.rep_raw) {
                (Some(err), _) => {
                    let mut buf = bytes::BytesMut::new();
                    crate::core::protocol::resp::encode_frame(
                        &crate::core::protocol::resp::error(&err.client_message()),
                        &mut buf,
                    );
                    buf.freeze()
                }
                (None, Some(raw)) => raw.clone(),
                // `ready` guarantees one of the arms above matched.
                (None, None) => unreachable!("flushed command with no failure and no reply"),
            };

            if let Some(client) = self.clients.get(client_id) {
                self.state.stats.add_send_bytes(out.len() as u64);
                let _ = client.out_tx.send(out);
            }
            self.state.stats.command_completed();
        }
    }
}
