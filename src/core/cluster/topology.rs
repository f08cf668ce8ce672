// src/core/cluster/topology.rs

//! The topology updater (§4.H): a dedicated OS thread that issues
//! `CLUSTER SLOTS` against a known node and republishes the slot map.
//!
//! It runs on its own `std::thread`, not inside any worker's async runtime —
//! its blocking-with-timeout socket I/O would otherwise stall a worker's
//! whole reactor. Jobs arrive over a `std::sync::mpsc` channel, which already
//! gives us the mutex+condvar FIFO the design asks for.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::map::{NodeInfo, SlotMapData, SlotMapHandle};
use super::slot::NUM_SLOTS;
use crate::core::errors::CorvusError;
use crate::core::protocol::resp::{ParseMode, ParseOutcome, RespFrame, parse_frame};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// The user's configured seed addresses (§3 NodeConf). Swapped wholesale on
/// reconfiguration; read by the updater to pick a fallback candidate.
#[derive(Clone)]
pub struct NodeConf(Arc<RwLock<Arc<Vec<SocketAddr>>>>);

impl NodeConf {
    pub fn new(seeds: Vec<SocketAddr>) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(seeds))))
    }

    pub fn seeds(&self) -> Arc<Vec<SocketAddr>> {
        self.0.read().clone()
    }

    pub fn set_seeds(&self, seeds: Vec<SocketAddr>) {
        *self.0.write() = Arc::new(seeds);
    }
}

/// A job posted to the updater.
pub enum TopologyJob {
    Update,
    Quit,
}

/// Handle used by workers to post jobs to the updater thread. Posting is
/// `try_send` so a worker never blocks on a full queue; coalescing means a
/// full queue is fine to drop into (another `UPDATE` is already pending).
#[derive(Clone)]
pub struct TopologyHandle {
    tx: SyncSender<TopologyJob>,
    dirty: Arc<AtomicBool>,
}

impl TopologyHandle {
    /// Request a refresh. Single-flight: if one is already queued or running,
    /// this is a no-op.
    pub fn request_update(&self) {
        if self
            .dirty
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.tx.try_send(TopologyJob::Update);
        }
    }

    pub fn request_quit(&self) {
        let _ = self.tx.try_send(TopologyJob::Quit);
    }
}

/// Spawn the updater thread. Returns a handle workers can post jobs to.
pub fn spawn(node_conf: NodeConf, slot_map: SlotMapHandle) -> TopologyHandle {
    let (tx, rx) = std::sync::mpsc::sync_channel::<TopologyJob>(8);
    let dirty = Arc::new(AtomicBool::new(false));
    let dirty_for_thread = dirty.clone();

    std::thread::Builder::new()
        .name("corvus-topology".into())
        .spawn(move || run(rx, dirty_for_thread, node_conf, slot_map))
        .expect("failed to spawn topology updater thread");

    TopologyHandle { tx, dirty }
}

fn run(
    rx: Receiver<TopologyJob>,
    dirty: Arc<AtomicBool>,
    node_conf: NodeConf,
    slot_map: SlotMapHandle,
) {
    // Candidate from the last successful refresh: prefer the master of slot 0.
    let mut last_good_master: Option<SocketAddr> = None;

    while let Ok(job) = rx.recv() {
        match job {
            TopologyJob::Quit => {
                info!("topology updater shutting down");
                return;
            }
            TopologyJob::Update => {
                // Mark not-dirty before doing the work so a post that arrives
                // mid-refresh schedules a follow-up rather than being lost.
                dirty.store(false, Ordering::Release);
                match refresh_once(&node_conf, &slot_map, last_good_master) {
                    Ok(new_master) => {
                        last_good_master = Some(new_master);
                        info!("slot map refreshed");
                    }
                    Err(e) => {
                        warn!("slot map refresh failed: {e}");
                    }
                }
            }
        }
    }
}

/// Three-tier fallback (§4.H step 1): the last known master of slot 0, then
/// every other master the current slot map already knows about, then the
/// configured seed list. Each tier is deduped against addresses already
/// listed by an earlier tier.
fn candidates(
    node_conf: &NodeConf,
    slot_map: &SlotMapHandle,
    last_good_master: Option<SocketAddr>,
) -> Vec<SocketAddr> {
    let mut out = Vec::new();
    if let Some(addr) = last_good_master {
        out.push(addr);
    }

    let snapshot = slot_map.snapshot();
    for node in snapshot.slots.iter().flatten() {
        if !out.contains(&node.master_addr) {
            out.push(node.master_addr);
        }
    }

    for addr in node_conf.seeds().iter().copied() {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    out
}

fn refresh_once(
    node_conf: &NodeConf,
    slot_map: &SlotMapHandle,
    last_good_master: Option<SocketAddr>,
) -> Result<SocketAddr, CorvusError> {
    let mut last_err = CorvusError::ClusterDown("no reachable seed node".into());
    for addr in candidates(node_conf, slot_map, last_good_master) {
        match fetch_slots(addr) {
            Ok(map) if map.is_complete() => {
                slot_map.publish(Arc::new(map));
                return Ok(addr);
            }
            Ok(_) => {
                last_err = CorvusError::ClusterDown("CLUSTER SLOTS returned partial map".into());
            }
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn fetch_slots(addr: SocketAddr) -> Result<SlotMapData, CorvusError> {
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    stream.write_all(b"*2\r\n$7\r\nCLUSTER\r\n$5\r\nSLOTS\r\n")?;

    let mut buf = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        match parse_frame(&mut buf, ParseMode::Reply)? {
            ParseOutcome::Complete { frame, .. } => return build_map(&frame),
            ParseOutcome::Incomplete => {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    return Err(CorvusError::ReadFailed);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

fn build_map(frame: &RespFrame) -> Result<SlotMapData, CorvusError> {
    let entries = frame.as_array().ok_or(CorvusError::ServerParseError)?;
    let mut map = SlotMapData::empty();
    for entry in entries {
        let fields = entry.as_array().ok_or(CorvusError::ServerParseError)?;
        if fields.len() < 3 {
            return Err(CorvusError::ServerParseError);
        }
        let start = as_i64(&fields[0])?;
        let end = as_i64(&fields[1])?;
        let master_addr = parse_endpoint(&fields[2])?;
        let mut replica_addrs = Vec::new();
        for replica in &fields[3..] {
            replica_addrs.push(parse_endpoint(replica)?);
        }
        let info = Arc::new(NodeInfo {
            master_addr,
            replica_addrs,
        });
        for slot in start..=end {
            if slot < 0 || slot as usize >= NUM_SLOTS {
                return Err(CorvusError::ServerParseError);
            }
            map.slots[slot as usize] = Some(info.clone());
        }
    }
    Ok(map)
}

fn as_i64(frame: &RespFrame) -> Result<i64, CorvusError> {
    match frame {
        RespFrame::Integer(n) => Ok(*n),
        _ => Err(CorvusError::ServerParseError),
    }
}

fn parse_endpoint(frame: &RespFrame) -> Result<SocketAddr, CorvusError> {
    let fields = frame.as_array().ok_or(CorvusError::ServerParseError)?;
    if fields.len() < 2 {
        return Err(CorvusError::ServerParseError);
    }
    let ip = fields[0]
        .as_bulk_str()
        .and_then(|b| std::str::from_utf8(b).ok())
        .ok_or(CorvusError::ServerParseError)?;
    let port = as_i64(&fields[1])?;
    format!("{ip}:{port}")
        .parse()
        .map_err(|_| CorvusError::ServerParseError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::resp::bulk;

    fn endpoint(ip: &str, port: i64, replicas: i64) -> RespFrame {
        let mut v = vec![bulk(ip), RespFrame::Integer(port)];
        let _ = replicas;
        v.push(bulk("node-id"));
        RespFrame::Array(Some(v))
    }

    #[test]
    fn builds_map_from_cluster_slots_reply() {
        let reply = RespFrame::Array(Some(vec![RespFrame::Array(Some(vec![
            RespFrame::Integer(0),
            RespFrame::Integer(NUM_SLOTS as i64 - 1),
            endpoint("127.0.0.1", 7001, 0),
        ]))]));
        let map = build_map(&reply).unwrap();
        assert!(map.is_complete());
        assert_eq!(
            map.slots[0].as_ref().unwrap().master_addr.port(),
            7001
        );
    }

    #[test]
    fn partial_map_is_not_complete() {
        let reply = RespFrame::Array(Some(vec![RespFrame::Array(Some(vec![
            RespFrame::Integer(0),
            RespFrame::Integer(100),
            endpoint("127.0.0.1", 7001, 0),
        ]))]));
        let map = build_map(&reply).unwrap();
        assert!(!map.is_complete());
    }
}
