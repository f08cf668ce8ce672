// src/worker/client_conn.rs

//! One client connection (§4.E, §4.F "Routing"): parses requests off the
//! socket, classifies each, and either answers locally (EXTRA), forwards it
//! to one backend (BASIC), or fans it out across several (COMPLEX).
//!
//! Every request — including ones answered locally — is given a `Command`
//! entry and pushed onto the client's `cmd_queue` before it is answered, so
//! a `PING` that lands between two in-flight `GET`s still waits its turn
//! behind them: the per-client ordering guarantee (§5) doesn't carve out an
//! exception for commands the proxy answers itself.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::core::classify::{self, Kind};
use crate::core::cluster::map::{self, Access as MapAccess};
use crate::core::cluster::slot::get_slot;
use crate::core::command::fanout::{split_del, split_eval, split_exists, split_mget, split_mset};
use crate::core::command::{Command, CommandId};
use crate::core::errors::CorvusError;
use crate::core::protocol::resp::{self, ParseMode, ParseOutcome, RespFrame, encode_frame, parse_frame};
use crate::core::state::ClientId;
use crate::worker::shared::Shared;
use crate::worker::{info, server_conn};

/// Register a new client in the worker's table and spawn the task that
/// drives it. Mirrors `server_conn::get_or_connect`'s spawn-then-record
/// ordering: the task can't run before this function returns, so recording
/// its `AbortHandle` afterwards is race-free.
pub fn spawn(shared: &Shared, worker_id: usize, stream: TcpStream, addr: SocketAddr) {
    let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
    let client_id = shared.borrow_mut().clients.insert(addr, out_tx);
    shared.borrow().state.stats.client_connected();
    shared.borrow().task_started();

    let shared_for_task = shared.clone();
    let join = tokio::task::spawn_local(async move {
        run(shared_for_task, worker_id, client_id, stream, out_rx).await;
    });

    if let Some(info) = shared.borrow_mut().clients.get_mut(client_id) {
        info.abort = Some(join.abort_handle());
    }
}

async fn run(
    shared: Shared,
    worker_id: usize,
    client_id: ClientId,
    stream: TcpStream,
    mut out_rx: UnboundedReceiver<Bytes>,
) {
    let _ = stream.set_nodelay(true);
    let (mut rh, mut wh) = stream.into_split();
    let mut read_buf = BytesMut::with_capacity(shared.borrow().state.config.bufsize);
    let mut chunk = vec![0u8; shared.borrow().state.config.bufsize];
    let mut shutdown_rx = shared.borrow().state.shutdown_rx();

    loop {
        tokio::select! {
            biased;

            maybe_out = out_rx.recv() => {
                let Some(bytes) = maybe_out else { break };
                if wh.write_all(&bytes).await.is_err() {
                    break;
                }
            }

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            n = rh.read(&mut chunk) => {
                match n {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        read_buf.extend_from_slice(&chunk[..n]);
                        if let Some(client) = shared.borrow_mut().clients.get_mut(client_id) {
                            client.touch();
                        }
                        if !drain_requests(&shared, worker_id, client_id, &mut read_buf) {
                            break;
                        }
                    }
                }
            }
        }
    }

    drain_pending_replies(&shared, client_id, &mut out_rx, &mut wh).await;
    disconnect(&shared, client_id);
    shared.borrow().task_finished();
}

/// On any exit path — socket error, parse failure, or shutdown — give
/// commands still in this client's queue a last chance to reach `out_tx`
/// before the task ends (§5: "each worker writes any pending replies, closes
/// clients, and returns"), rather than racing `disconnect`'s own staleness
/// handling and dropping an already-computed reply on the floor.
async fn drain_pending_replies(
    shared: &Shared,
    client_id: ClientId,
    out_rx: &mut UnboundedReceiver<Bytes>,
    wh: &mut (impl AsyncWrite + Unpin),
) {
    let grace = tokio::time::sleep(Duration::from_millis(200));
    tokio::pin!(grace);
    loop {
        let has_outstanding = shared
            .borrow()
            .clients
            .get(client_id)
            .map(|c| !c.cmd_queue.is_empty())
            .unwrap_or(false);
        if !has_outstanding {
            break;
        }
        tokio::select! {
            biased;
            _ = &mut grace => break,
            maybe_out = out_rx.recv() => {
                match maybe_out {
                    Some(bytes) => { let _ = wh.write_all(&bytes).await; }
                    None => break,
                }
            }
        }
    }
    while let Ok(bytes) = out_rx.try_recv() {
        let _ = wh.write_all(&bytes).await;
    }
    let _ = wh.flush().await;
}

/// Parse and dispatch every complete request currently buffered. Returns
/// `false` if the connection should be torn down (parse error).
fn drain_requests(shared: &Shared, worker_id: usize, client_id: ClientId, read_buf: &mut BytesMut) -> bool {
    loop {
        let outcome = match parse_frame(read_buf, ParseMode::Request) {
            Ok(o) => o,
            Err(_) => {
                // §7: a malformed request closes the client after one last
                // flush attempt — there is nothing to flush yet beyond
                // whatever is already in flight, so just disconnect.
                write_sync_error(shared, client_id, &CorvusError::ParseError.client_message());
                return false;
            }
        };
        let (frame, raw) = match outcome {
            ParseOutcome::Incomplete => return true,
            ParseOutcome::Complete { frame, raw } => (frame, raw),
        };
        handle_request(shared, worker_id, client_id, frame, raw);
    }
}

/// A best-effort synchronous write used only for the parse-error path, where
/// the client is about to be torn down and there's no `Command` to route
/// the reply through.
fn write_sync_error(shared: &Shared, client_id: ClientId, message: &str) {
    let mut buf = BytesMut::new();
    encode_frame(&resp::error(message), &mut buf);
    if let Some(client) = shared.borrow().clients.get(client_id) {
        let _ = client.out_tx.send(buf.freeze());
    }
}

fn handle_request(shared: &Shared, worker_id: usize, client_id: ClientId, frame: RespFrame, raw: Bytes) {
    let Some(args) = frame.as_array() else {
        return;
    };
    let Some(name) = args.first().and_then(|f| f.as_bulk_str()) else {
        return;
    };
    let name_upper = name.to_ascii_uppercase();
    let classification = classify::classify(&name_upper);

    let cmd_id = {
        let mut guard = shared.borrow_mut();
        let mut cmd = Command::new(client_id, raw);
        cmd.access = classification.access;
        let id = guard.arena.insert(cmd);
        if let Some(client) = guard.clients.get_mut(client_id) {
            client.cmd_queue.push_back(id);
        }
        id
    };

    match classification.kind {
        Kind::Extra => handle_extra(shared, client_id, cmd_id, &name_upper, args),
        Kind::Unimpl => {
            let name = String::from_utf8_lossy(name).to_string();
            fail_local(shared, client_id, cmd_id, CorvusError::UnknownCommand(name));
        }
        Kind::Basic => handle_basic(shared, worker_id, cmd_id, classification.access, args),
        Kind::Complex => handle_complex(shared, worker_id, client_id, cmd_id, &name_upper, args),
    }
}

/// Fail `cmd_id` immediately — no backend was ever involved, so there is
/// nothing for `server_conn` to roll back.
fn fail_local(shared: &Shared, client_id: ClientId, cmd_id: CommandId, err: CorvusError) {
    {
        let mut guard = shared.borrow_mut();
        if let Some(cmd) = guard.command_mut(cmd_id) {
            cmd.mark_failed(err);
        }
    }
    shared.borrow_mut().try_flush_client(client_id);
}

fn reply_local(shared: &Shared, client_id: ClientId, cmd_id: CommandId, frame: RespFrame) {
    {
        let mut guard = shared.borrow_mut();
        if let Some(cmd) = guard.command_mut(cmd_id) {
            let mut buf = BytesMut::new();
            encode_frame(&frame, &mut buf);
            cmd.rep_raw = Some(buf.freeze());
        }
    }
    shared.borrow_mut().try_flush_client(client_id);
}

fn handle_extra(shared: &Shared, client_id: ClientId, cmd_id: CommandId, name_upper: &[u8], args: &[RespFrame]) {
    match name_upper {
        b"PING" => reply_local(shared, client_id, cmd_id, resp::simple("PONG")),
        b"AUTH" => handle_auth(shared, client_id, cmd_id, args),
        b"INFO" => {
            let payload = info::render(&shared.borrow().state);
            reply_local(shared, client_id, cmd_id, resp::bulk(payload));
        }
        b"PROXY" => handle_proxy(shared, client_id, cmd_id, args),
        _ => fail_local(shared, client_id, cmd_id, CorvusError::UnknownCommand(String::from_utf8_lossy(name_upper).to_string())),
    }
}

fn handle_auth(shared: &Shared, client_id: ClientId, cmd_id: CommandId, args: &[RespFrame]) {
    let requirepass = shared.borrow().state.config.requirepass.clone();
    let Some(configured) = requirepass else {
        fail_local(shared, client_id, cmd_id, CorvusError::NoPasswordSet);
        return;
    };
    let Some(given) = args.get(1).and_then(|f| f.as_bulk_str()) else {
        fail_local(shared, client_id, cmd_id, CorvusError::InvalidPassword);
        return;
    };
    if given == configured.as_bytes() {
        if let Some(client) = shared.borrow_mut().clients.get_mut(client_id) {
            client.authenticated = true;
        }
        reply_local(shared, client_id, cmd_id, resp::simple("OK"));
    } else {
        fail_local(shared, client_id, cmd_id, CorvusError::InvalidPassword);
    }
}

fn handle_proxy(shared: &Shared, client_id: ClientId, cmd_id: CommandId, args: &[RespFrame]) {
    let sub = args
        .get(1)
        .and_then(|f| f.as_bulk_str())
        .map(|b| b.to_ascii_uppercase());
    match sub.as_deref() {
        Some(b"UPDATESLOTMAP") => {
            shared.borrow().state.topology.request_update();
            reply_local(shared, client_id, cmd_id, resp::simple("OK"));
        }
        Some(b"INFO") => {
            let payload = info::render(&shared.borrow().state);
            reply_local(shared, client_id, cmd_id, resp::bulk(payload));
        }
        _ => fail_local(shared, client_id, cmd_id, CorvusError::UnknownCommand("PROXY".into())),
    }
}

/// Authentication gate for anything that actually touches a backend (§6
/// scenario 5, §7 `NotAuthenticated`).
fn requires_auth(shared: &Shared, client_id: ClientId) -> bool {
    let guard = shared.borrow();
    if guard.state.config.requirepass.is_none() {
        return false;
    }
    !guard.clients.get(client_id).map(|c| c.authenticated).unwrap_or(false)
}

fn to_map_access(access: classify::Access) -> MapAccess {
    match access {
        classify::Access::Write | classify::Access::Unknown => MapAccess::Write,
        classify::Access::Read => MapAccess::Read,
    }
}

fn resolve_addr(shared: &Shared, key: &[u8], access: MapAccess) -> (u16, Option<SocketAddr>) {
    let slot = get_slot(&Bytes::copy_from_slice(key));
    let mut guard = shared.borrow_mut();
    let snapshot = guard.state.slot_map.snapshot();
    let strategy = guard.state.config.read_strategy;
    let addr = map::lookup(&snapshot, slot, access, strategy, &mut guard.rng);
    (slot, addr)
}

fn handle_basic(shared: &Shared, worker_id: usize, cmd_id: CommandId, access: classify::Access, args: &[RespFrame]) {
    let client_id = shared.borrow().command(cmd_id).map(|c| c.client_id);
    let Some(client_id) = client_id else { return };

    if requires_auth(shared, client_id) {
        fail_local(shared, client_id, cmd_id, CorvusError::NotAuthenticated);
        return;
    }

    let Some(key) = args.get(1).and_then(|f| f.as_bulk_str()) else {
        fail_local(shared, client_id, cmd_id, CorvusError::ParseError);
        return;
    };

    let (slot, addr) = resolve_addr(shared, key, to_map_access(access));
    if let Some(cmd) = shared.borrow_mut().command_mut(cmd_id) {
        cmd.slot = Some(slot);
    }

    match addr {
        Some(addr) => server_conn::dispatch(shared, worker_id, addr, cmd_id),
        None => {
            shared.borrow().state.topology.request_update();
            server_conn::fail_and_finish(shared, cmd_id, CorvusError::NoRoute);
        }
    }
}

fn handle_complex(
    shared: &Shared,
    worker_id: usize,
    client_id: ClientId,
    parent_id: CommandId,
    name_upper: &[u8],
    args: &[RespFrame],
) {
    if requires_auth(shared, client_id) {
        fail_local(shared, client_id, parent_id, CorvusError::NotAuthenticated);
        return;
    }

    let access = match name_upper {
        b"MGET" | b"EXISTS" => classify::Access::Read,
        _ => classify::Access::Write,
    };

    let raws_and_keys: Vec<(Bytes, Bytes)> = match name_upper {
        b"MGET" => split_mget(args).into_iter().map(|s| (s.raw, s.key)).collect(),
        b"MSET" => split_mset(args).into_iter().map(|s| (s.raw, s.key)).collect(),
        b"DEL" => split_del(args).into_iter().map(|s| (s.raw, s.key)).collect(),
        b"EXISTS" => split_exists(args).into_iter().map(|s| (s.raw, s.key)).collect(),
        b"EVAL" => {
            let raw = shared.borrow().command(parent_id).map(|c| c.req_raw.clone()).unwrap_or_default();
            split_eval(args, raw).into_iter().map(|s| (s.raw, s.key)).collect()
        }
        _ => Vec::new(),
    };

    if raws_and_keys.is_empty() {
        fail_local(shared, client_id, parent_id, CorvusError::ParseError);
        return;
    }

    // Pass 1: create every sub-command and register the full set on the
    // parent before any of them is routed, so a synchronously-failing
    // sub-command (no route) can never complete the parent before its
    // siblings even exist.
    let sub_ids: Vec<CommandId> = {
        let mut guard = shared.borrow_mut();
        raws_and_keys
            .iter()
            .map(|(raw, _)| {
                let mut cmd = Command::new(client_id, raw.clone());
                cmd.access = access;
                cmd.parent = Some(parent_id);
                guard.arena.insert(cmd)
            })
            .collect()
    };
    {
        let mut guard = shared.borrow_mut();
        if let Some(parent) = guard.command_mut(parent_id) {
            parent.sub_cmds = sub_ids.clone();
            parent.count = sub_ids.len();
        }
    }

    // Pass 2: route or fail each sub-command now that the parent can
    // tolerate one finishing immediately.
    let map_access = to_map_access(access);
    for (sub_id, (_, key)) in sub_ids.into_iter().zip(raws_and_keys.iter()) {
        let (slot, addr) = resolve_addr(shared, key, map_access);
        if let Some(cmd) = shared.borrow_mut().command_mut(sub_id) {
            cmd.slot = Some(slot);
        }
        match addr {
            Some(addr) => server_conn::dispatch(shared, worker_id, addr, sub_id),
            None => {
                shared.borrow().state.topology.request_update();
                server_conn::fail_and_finish(shared, sub_id, CorvusError::NoRoute);
            }
        }
    }
}

/// Idle-timeout teardown (§4.K, §7 "Timeout (client idle)"): abort the
/// connection's read/write task directly — a timed-out client gets a
/// "silent close", so there is no reply to flush first — then run the same
/// cleanup a normal disconnect would.
pub(crate) fn timeout(shared: &Shared, client_id: ClientId) {
    let abort = shared.borrow().clients.get(client_id).and_then(|c| c.abort.clone());
    if let Some(abort) = abort {
        abort.abort();
    }
    disconnect(shared, client_id);
}

/// Tear the client down: drop its table entry, and for any command of its
/// that's still outstanding on a server pipeline, mark it stale (§3
/// "Staleness") rather than reaching for a client record that's about to be
/// gone. Commands that had already finished but weren't yet flushed are
/// simply discarded.
fn disconnect(shared: &Shared, client_id: ClientId) {
    let mut guard = shared.borrow_mut();
    let Some(client) = guard.clients.remove(client_id) else {
        return;
    };
    guard.state.stats.client_disconnected();
    debug!("client {} disconnected", client.addr);
    for cmd_id in client.cmd_queue {
        let done = match guard.arena.get(cmd_id) {
            Some(cmd) => cmd.failed.is_some() || cmd.rep_raw.is_some(),
            None => true,
        };
        if done {
            guard.arena.try_remove(cmd_id);
        } else if let Some(cmd) = guard.arena.get_mut(cmd_id) {
            cmd.stale = true;
        }
    }
}
