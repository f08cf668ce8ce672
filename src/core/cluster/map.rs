// src/core/cluster/map.rs

//! The slot map: `slot -> {master, replicas}` for all 16,384 slots (§3, §4.G).
//!
//! Readers need a reference-counted snapshot for the duration of one routing
//! decision while the updater thread swaps in a whole new map atomically.
//! `parking_lot::RwLock<Arc<SlotMapData>>` gives exactly that: the write side
//! is a single pointer swap, the read side is a lock + `Arc::clone` (cheap,
//! uncontended in the common case since writes are rare). This is the
//! idiomatic stand-in for the source's refcounted swap-on-publish array.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use rand::rngs::SmallRng;

use super::slot::NUM_SLOTS;
use crate::config::ReadStrategy;

/// One cluster node's reachable address plus its role among its peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeInfo {
    pub master_addr: SocketAddr,
    pub replica_addrs: Vec<SocketAddr>,
}

/// An immutable, fully-populated slot table. `None` means the slot isn't
/// assigned to a node we know about.
#[derive(Debug, Default)]
pub struct SlotMapData {
    pub slots: Vec<Option<Arc<NodeInfo>>>,
}

impl SlotMapData {
    pub fn empty() -> Self {
        Self {
            slots: vec![None; NUM_SLOTS],
        }
    }

    /// A map counts as usable only once every slot is covered (§4.H: partial
    /// results are discarded).
    pub fn is_complete(&self) -> bool {
        self.slots.len() == NUM_SLOTS && self.slots.iter().all(|s| s.is_some())
    }
}

/// Shared handle to the current slot map snapshot.
#[derive(Clone)]
pub struct SlotMapHandle(Arc<RwLock<Arc<SlotMapData>>>);

impl SlotMapHandle {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(Arc::new(SlotMapData::empty()))))
    }

    /// Acquire a reference-counted snapshot for one routing decision.
    pub fn snapshot(&self) -> Arc<SlotMapData> {
        self.0.read().clone()
    }

    /// Publish a new map. Only called by the topology updater.
    pub fn publish(&self, new_map: Arc<SlotMapData>) {
        *self.0.write() = new_map;
    }
}

impl Default for SlotMapHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Access mode for a routing lookup (§4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Resolve `(slot, access)` to the node address to forward to, applying the
/// configured read-strategy. Returns `None` if the slot is unassigned.
pub fn lookup(
    map: &SlotMapData,
    slot: u16,
    access: Access,
    strategy: ReadStrategy,
    rng: &mut SmallRng,
) -> Option<SocketAddr> {
    let node = map.slots.get(slot as usize)?.as_ref()?;
    match (access, strategy) {
        (Access::Write, _) => Some(node.master_addr),
        (Access::Read, ReadStrategy::Master) => Some(node.master_addr),
        (Access::Read, ReadStrategy::ReadSlaveOnly) => {
            if node.replica_addrs.is_empty() {
                Some(node.master_addr)
            } else {
                let idx = rng.gen_range(0..node.replica_addrs.len());
                Some(node.replica_addrs[idx])
            }
        }
        (Access::Read, ReadStrategy::Both) => {
            let total = 1 + node.replica_addrs.len();
            let idx = rng.gen_range(0..total);
            if idx == 0 {
                Some(node.master_addr)
            } else {
                Some(node.replica_addrs[idx - 1])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn node(port: u16, replicas: &[u16]) -> Arc<NodeInfo> {
        Arc::new(NodeInfo {
            master_addr: format!("127.0.0.1:{port}").parse().unwrap(),
            replica_addrs: replicas
                .iter()
                .map(|p| format!("127.0.0.1:{p}").parse().unwrap())
                .collect(),
        })
    }

    #[test]
    fn write_always_goes_to_master() {
        let mut map = SlotMapData::empty();
        map.slots[0] = Some(node(7001, &[7002]));
        let mut rng = SmallRng::seed_from_u64(1);
        let addr = lookup(&map, 0, Access::Write, ReadStrategy::Both, &mut rng).unwrap();
        assert_eq!(addr.port(), 7001);
    }

    #[test]
    fn read_slave_only_falls_back_without_replicas() {
        let mut map = SlotMapData::empty();
        map.slots[0] = Some(node(7001, &[]));
        let mut rng = SmallRng::seed_from_u64(1);
        let addr = lookup(&map, 0, Access::Read, ReadStrategy::ReadSlaveOnly, &mut rng).unwrap();
        assert_eq!(addr.port(), 7001);
    }

    #[test]
    fn unassigned_slot_has_no_route() {
        let map = SlotMapData::empty();
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(lookup(&map, 5, Access::Read, ReadStrategy::Master, &mut rng).is_none());
    }

    #[test]
    fn incomplete_map_is_not_complete() {
        let mut map = SlotMapData::empty();
        map.slots[0] = Some(node(7001, &[]));
        assert!(!map.is_complete());
    }
}
