// src/core/cluster/mod.rs

//! Slot hashing, the slot map, redirection parsing, and the topology
//! updater thread that keeps the map fresh.

pub mod map;
pub mod redirect;
pub mod slot;
pub mod topology;

pub use map::{Access, NodeInfo, SlotMapData, SlotMapHandle};
pub use topology::{NodeConf, TopologyHandle, TopologyJob};
