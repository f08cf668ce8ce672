// src/core/state/client.rs

//! Per-worker client connection bookkeeping. Each worker owns its table
//! exclusively (§5 "per-worker locality") so a plain `HashMap` — no locking,
//! no atomics — is the correct data structure, unlike a cross-thread
//! registry would need.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;

use crate::core::command::CommandId;

pub type ClientId = usize;

#[derive(Debug)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub authenticated: bool,
    pub created: Instant,
    pub last_active: Instant,
    /// FIFO of commands parsed from this client, oldest first — the queue
    /// that enforces per-client reply ordering (§4.F).
    pub cmd_queue: std::collections::VecDeque<CommandId>,
    /// Outgoing-bytes channel to this client's writer task. Completions
    /// arriving from a server connection task reach the client's socket
    /// through here rather than through a shared lock.
    pub out_tx: UnboundedSender<Bytes>,
    /// Handle to abort the read/write task driving this connection, used by
    /// the idle timer (§4.K) to tear a timed-out client down from outside
    /// its own task. `None` only in the brief window between table
    /// insertion and the task actually being spawned.
    pub abort: Option<AbortHandle>,
}

impl ClientInfo {
    pub fn new(addr: SocketAddr, out_tx: UnboundedSender<Bytes>) -> Self {
        let now = Instant::now();
        Self {
            addr,
            authenticated: false,
            created: now,
            last_active: now,
            cmd_queue: std::collections::VecDeque::new(),
            out_tx,
            abort: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

/// A worker's private table of connected clients.
#[derive(Default)]
pub struct ClientTable {
    clients: HashMap<ClientId, ClientInfo>,
    next_id: ClientId,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addr: SocketAddr, out_tx: UnboundedSender<Bytes>) -> ClientId {
        let id = self.next_id;
        self.next_id += 1;
        self.clients.insert(id, ClientInfo::new(addr, out_tx));
        id
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientInfo> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut ClientInfo> {
        self.clients.get_mut(&id)
    }

    pub fn remove(&mut self, id: ClientId) -> Option<ClientInfo> {
        self.clients.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &ClientInfo)> {
        self.clients.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_round_trips() {
        let mut table = ClientTable::new();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let id = table.insert(addr, tx);
        assert_eq!(table.get(id).unwrap().addr, addr);
        assert!(table.remove(id).is_some());
        assert!(table.get(id).is_none());
    }
}
