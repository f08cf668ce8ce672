// src/worker/server_conn.rs

//! One backend connection: a strict FIFO pipeline (§4.F "Reply matching").
//! Requests routed to this address are written in arrival order; replies are
//! matched head-of-line against the shared `waiting` queue as they parse.
//!
//! Batching: every command currently buffered on the routing channel is
//! drained and written in a single `write_all` call before any of them are
//! pushed onto `waiting`, which is what actually gives this connection the
//! pipelining the design wants rather than one write syscall per command.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tracing::warn;

use crate::core::cluster::redirect::parse_redirect;
use crate::core::command::{CommandId, command_name};
use crate::core::command::fanout::{Aggregated, aggregate_mget, aggregate_mset, aggregate_sum};
use crate::core::errors::CorvusError;
use crate::core::protocol::resp::{self, ParseMode, ParseOutcome, RespFrame, encode_frame, parse_frame};
use crate::worker::shared::{Shared, ServerConnHandle, WorkerShared};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Look up (or open) the backend connection for `addr`, returning a sender a
/// client task can post a command id onto.
pub fn get_or_connect(shared: &Shared, worker_id: usize, addr: SocketAddr) -> UnboundedSender<CommandId> {
    if let Some(handle) = shared.borrow().servers.get(&addr) {
        return handle.tx.clone();
    }

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    shared.borrow().task_started();
    let shared_for_task = shared.clone();
    // `spawn_local` only schedules the task; it can't start running until we
    // yield back to the executor, so inserting the handle afterwards (with
    // the abort handle in hand) is race-free.
    let join = tokio::task::spawn_local(async move {
        run(shared_for_task, worker_id, addr, rx).await;
    });

    shared.borrow_mut().servers.insert(
        addr,
        ServerConnHandle {
            tx: tx.clone(),
            waiting: VecDeque::new(),
            last_active: Instant::now(),
            abort: join.abort_handle(),
        },
    );

    tx
}

/// Route `cmd_id` onto the backend connection for `addr`, opening one if
/// none exists yet.
pub fn dispatch(shared: &Shared, worker_id: usize, addr: SocketAddr, cmd_id: CommandId) {
    let tx = get_or_connect(shared, worker_id, addr);
    let _ = tx.send(cmd_id);
}

async fn run(shared: Shared, worker_id: usize, addr: SocketAddr, rx: UnboundedReceiver<CommandId>) {
    run_inner(shared.clone(), worker_id, addr, rx).await;
    shared.borrow().task_finished();
}

async fn run_inner(shared: Shared, worker_id: usize, addr: SocketAddr, mut rx: UnboundedReceiver<CommandId>) {
    let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(s)) => s,
        _ => {
            drain_channel_failed(&shared, &mut rx, CorvusError::ConnectFailed);
            teardown(&shared, addr, CorvusError::ConnectFailed, true);
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let (mut rh, mut wh) = stream.into_split();

    let mut read_buf = BytesMut::with_capacity(16 * 1024);
    let mut chunk = [0u8; 16 * 1024];
    let mut shutdown_rx = shared.borrow().state.shutdown_rx();
    let mut shutting_down = *shutdown_rx.borrow();
    let grace = tokio::time::sleep(Duration::from_millis(200));
    tokio::pin!(grace);

    loop {
        if shutting_down {
            let drained = shared
                .borrow()
                .servers
                .get(&addr)
                .map(|c| c.waiting.is_empty())
                .unwrap_or(true);
            if drained {
                break;
            }
        }

        tokio::select! {
            biased;

            _ = shutdown_rx.changed(), if !shutting_down => {
                shutting_down = *shutdown_rx.borrow();
            }

            _ = &mut grace, if shutting_down => {
                warn!("backend {addr} shutdown grace period elapsed with replies still pending");
                break;
            }

            maybe_id = rx.recv(), if !shutting_down => {
                let Some(first_id) = maybe_id else {
                    // Every client task dropped its sender; nothing left to serve.
                    break;
                };
                let mut batch = vec![first_id];
                while let Ok(id) = rx.try_recv() {
                    batch.push(id);
                }

                let raws: Vec<Bytes> = {
                    let mut guard = shared.borrow_mut();
                    batch
                        .iter()
                        .filter_map(|&id| {
                            guard.command_mut(id).map(|c| {
                                c.sent_at = Some(Instant::now());
                                c.req_raw.clone()
                            })
                        })
                        .collect()
                };
                if raws.is_empty() {
                    continue;
                }

                let mut out = BytesMut::with_capacity(raws.iter().map(|b| b.len()).sum());
                for raw in &raws {
                    out.extend_from_slice(raw);
                }
                if let Err(e) = wh.write_all(&out).await {
                    warn!("write to backend {addr} failed: {e}");
                    drain_channel_failed(&shared, &mut rx, CorvusError::WriteFailed);
                    teardown(&shared, addr, CorvusError::WriteFailed, false);
                    return;
                }

                let mut guard = shared.borrow_mut();
                guard.state.stats.add_recv_bytes(out.len() as u64);
                if let Some(conn) = guard.servers.get_mut(&addr) {
                    conn.last_active = Instant::now();
                    conn.waiting.extend(batch);
                }
            }

            n = rh.read(&mut chunk) => {
                match n {
                    Ok(0) | Err(_) => {
                        teardown(&shared, addr, CorvusError::ReadFailed, true);
                        return;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&chunk[..n]);
                        if let Some(conn) = shared.borrow_mut().servers.get_mut(&addr) {
                            conn.last_active = Instant::now();
                        }
                        if !process_replies(&shared, worker_id, addr, &mut read_buf) {
                            return;
                        }
                    }
                }
            }
        }
    }

    // Reached only via the rx-closed or shutdown-drain `break`s above — any
    // write/read failure above already tore this connection down and
    // returned directly. Fails whatever (if anything) is still `waiting`
    // after a grace-period timeout, then frees the address's table entry.
    teardown(&shared, addr, CorvusError::Timeout, false);
}

fn drain_channel_failed(shared: &Shared, rx: &mut UnboundedReceiver<CommandId>, err: CorvusError) {
    while let Ok(cmd_id) = rx.try_recv() {
        fail_command(shared, cmd_id, err.clone());
    }
}

/// Idle-timeout teardown (§4.K, §7 "Timeout (server idle)"): fail every
/// command still in this pipeline with `Timeout`, abort the connection's
/// task, and mark the address DISCONNECTED by removing its table entry — the
/// next request to this address reopens a fresh connection.
pub(crate) fn timeout_server(shared: &Shared, addr: SocketAddr) {
    let abort = shared.borrow().servers.get(&addr).map(|c| c.abort.clone());
    if let Some(abort) = abort {
        abort.abort();
    }
    teardown(shared, addr, CorvusError::Timeout, false);
}

/// Remove this connection's shared entry (if still present — a racing idle
/// timeout may have already taken it) and fail everything it was waiting on,
/// then optionally kick a topology refresh.
fn teardown(shared: &Shared, addr: SocketAddr, err: CorvusError, refresh: bool) {
    let conn = shared.borrow_mut().servers.remove(&addr);
    if let Some(conn) = conn {
        for cmd_id in conn.waiting {
            fail_command(shared, cmd_id, err.clone());
        }
    }
    if refresh {
        shared.borrow().state.topology.request_update();
    }
}

fn fail_command(shared: &Shared, cmd_id: CommandId, err: CorvusError) {
    let client_id = {
        let mut guard = shared.borrow_mut();
        let Some(cmd) = guard.command_mut(cmd_id) else {
            return;
        };
        cmd.mark_failed(err);
        cmd.client_id
    };
    finish_one(shared, cmd_id, client_id);
}

/// Fail `cmd_id` with `err` and roll it up to its parent / flush its client,
/// the same path a real backend reply takes. Exposed so the idle timer
/// (§4.K) and the router's immediate-`NoRoute` path can reuse the exact
/// completion logic instead of duplicating it.
pub fn fail_and_finish(shared: &Shared, cmd_id: CommandId, err: CorvusError) {
    fail_command(shared, cmd_id, err);
}

fn process_replies(shared: &Shared, worker_id: usize, addr: SocketAddr, read_buf: &mut BytesMut) -> bool {
    loop {
        let outcome = match parse_frame(read_buf, ParseMode::Reply) {
            Ok(o) => o,
            Err(_) => {
                teardown(shared, addr, CorvusError::ServerParseError, true);
                return false;
            }
        };
        let (frame, raw) = match outcome {
            ParseOutcome::Incomplete => return true,
            ParseOutcome::Complete { frame, raw } => (frame, raw),
        };
        let Some(cmd_id) = shared
            .borrow_mut()
            .servers
            .get_mut(&addr)
            .and_then(|c| c.waiting.pop_front())
        else {
            // Unsolicited reply bytes; nothing we can attach them to.
            continue;
        };

        let client_id = {
            let mut guard = shared.borrow_mut();
            let Some(cmd) = guard.command_mut(cmd_id) else {
                continue;
            };

            if let Some(sent_at) = cmd.sent_at {
                let micros = sent_at.elapsed().as_micros() as u64;
                guard.state.stats.record_remote_latency_us(micros);
                guard.state.stats.record_last_command_latency(worker_id, micros);
            }

            let redirect = match &frame {
                RespFrame::Error(text) => parse_redirect(text),
                _ => None,
            };
            if let Some(redirect) = redirect {
                let refresh = redirect.triggers_topology_refresh();
                cmd.mark_failed(redirect);
                if refresh {
                    guard.state.topology.request_update();
                }
            } else {
                cmd.rep_raw = Some(raw);
            }
            cmd.client_id
        };

        finish_one(shared, cmd_id, client_id);
    }
}

/// Roll a completed sub-command up to its parent (if any) and attempt to
/// flush its owning client's reply queue. A non-fan-out command has no
/// parent and flushes directly.
pub(crate) fn finish_one(shared: &Shared, cmd_id: CommandId, client_id: usize) {
    let parent_id = shared.borrow().command(cmd_id).and_then(|c| c.parent);

    let Some(parent_id) = parent_id else {
        finish_top_level(shared, cmd_id, client_id);
        return;
    };

    // Leave the finished sub-command in the arena — `aggregate_and_finish`
    // reads every sibling's `rep_raw`/`failed` once the last one reports in,
    // then removes them all together.
    let (parent_client_id, ready, name_upper) = {
        let mut guard = shared.borrow_mut();
        let Some(parent) = guard.command_mut(parent_id) else {
            return;
        };
        parent.done_count += 1;
        let ready = parent.fanout_complete();
        let parent_client_id = parent.client_id;
        let name_upper = if ready { command_name(&parent.req_raw) } else { String::new() };
        (parent_client_id, ready, name_upper)
    };

    if !ready {
        return;
    }

    aggregate_and_finish(parent_id, &name_upper, &mut shared.borrow_mut());
    finish_top_level(shared, parent_id, parent_client_id);
}

/// Finish a top-level command (a fan-out parent or a standalone BASIC
/// command) — the unit that actually owns a slot in its client's
/// `cmd_queue`. If the owning client disconnected while this command was
/// still in flight (§3 "Staleness"), its client-table entry is already gone,
/// so `try_flush_client` could never reach it; free the arena slot directly
/// instead so the command doesn't leak forever. Otherwise flush normally.
fn finish_top_level(shared: &Shared, cmd_id: CommandId, client_id: usize) {
    let stale = shared
        .borrow()
        .command(cmd_id)
        .map(|c| c.stale)
        .unwrap_or(false);
    if stale {
        shared.borrow_mut().arena.try_remove(cmd_id);
        return;
    }
    shared.borrow_mut().try_flush_client(client_id);
}

fn aggregate_and_finish(parent_id: CommandId, name_upper: &str, shared: &mut WorkerShared) {
    let replies: Vec<RespFrame> = {
        let Some(parent) = shared.command(parent_id) else {
            return;
        };
        parent
            .sub_cmds
            .iter()
            .filter_map(|id| shared.command(*id))
            .map(reply_frame_of)
            .collect()
    };

    let aggregated = match name_upper {
        "MGET" => aggregate_mget(replies),
        "MSET" => aggregate_mset(&replies),
        "DEL" | "EXISTS" => aggregate_sum(&replies),
        _ => replies
            .into_iter()
            .next()
            .map(Aggregated::Frame)
            .unwrap_or_else(|| Aggregated::Failed(resp::error("ERR Proxy error"))),
    };

    let sub_ids = shared.command(parent_id).map(|p| p.sub_cmds.clone()).unwrap_or_default();
    for id in sub_ids {
        shared.arena.try_remove(id);
    }

    let Some(parent) = shared.command_mut(parent_id) else {
        return;
    };
    parent.sub_cmds.clear();
    // Either branch is already a fully-formed RESP frame to forward
    // verbatim — a sub-reply error (e.g. a propagated MOVED) isn't a
    // proxy-local `CorvusError`, so it travels through `rep_raw` rather than
    // `failed`.
    let frame = match aggregated {
        Aggregated::Frame(frame) => frame,
        Aggregated::Failed(frame) => frame,
    };
    let mut buf = BytesMut::new();
    encode_frame(&frame, &mut buf);
    parent.rep_raw = Some(buf.freeze());
}

fn reply_frame_of(cmd: &crate::core::command::Command) -> RespFrame {
    if let Some(err) = &cmd.failed {
        return resp::error(&err.client_message());
    }
    if let Some(raw) = &cmd.rep_raw {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(raw);
        if let Ok(ParseOutcome::Complete { frame, .. }) = parse_frame(&mut buf, ParseMode::Reply) {
            return frame;
        }
    }
    resp::error("ERR Proxy error")
}
