// src/worker/mod.rs

//! Component I (§4.I): glues the buffer/parser/command/router pieces into
//! one worker thread. Each worker is a dedicated OS thread running a
//! `current_thread` Tokio runtime and a `LocalSet` — not a task on a shared
//! multi-threaded runtime — because `WorkerShared` is an `Rc<RefCell<_>>`
//! (§5: "per-worker locality... need no locking and no atomic operations").
//! Incoming connections are distributed across workers by the kernel via
//! `SO_REUSEPORT` (§5 "Threads"), so there is no cross-thread handoff of
//! accepted sockets either.

mod client_conn;
pub mod info;
mod server_conn;
mod shared;
mod timer;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::core::state::ServerState;
use shared::new_shared;

/// Spawn one worker OS thread bound to `bind_addr` with `SO_REUSEPORT` set,
/// returning a join handle the caller waits on during shutdown.
pub fn spawn(state: Arc<ServerState>, worker_index: usize, bind_addr: SocketAddr) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("corvus-worker-{worker_index}"))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build worker runtime");
            let local = tokio::task::LocalSet::new();
            local.block_on(&runtime, run(state, worker_index, bind_addr));
        })
        .expect("failed to spawn worker thread")
}

/// Bind a listening socket with `SO_REUSEADDR`/`SO_REUSEPORT` so every
/// worker can bind the same port independently and let the kernel load
/// balance accepted connections across them.
fn bind_reuseport(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(not(windows))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

async fn run(state: Arc<ServerState>, worker_index: usize, bind_addr: SocketAddr) {
    let listener = match bind_reuseport(bind_addr) {
        Ok(l) => l,
        Err(e) => {
            warn!("worker {worker_index} failed to bind {bind_addr}: {e}");
            return;
        }
    };

    let shared = new_shared(state.clone(), worker_index);
    tokio::task::spawn_local(timer::run(shared.clone()));

    let mut shutdown_rx = state.shutdown_rx();
    info!("worker {worker_index} listening on {bind_addr}");

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!("worker {worker_index} accepted {addr}");
                        client_conn::spawn(&shared, worker_index, stream, addr);
                    }
                    Err(e) => {
                        warn!("worker {worker_index} accept failed: {e}");
                    }
                }
            }
        }
    }

    info!("worker {worker_index} shutting down, draining in-flight connections");
    // §5 "Cancellation": don't let the thread's runtime drop the `LocalSet`
    // (and abort every still-running client/server task with it) until the
    // per-connection tasks have had a chance to flush their own pending
    // replies and return on their own. Bounded so a genuinely stuck backend
    // can't hang shutdown forever.
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while shared.borrow().active_tasks.get() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            "worker {worker_index} shutdown grace period elapsed with {} connection(s) still in flight",
            shared.borrow().active_tasks.get()
        );
    }
    info!("worker {worker_index} shut down");
}
