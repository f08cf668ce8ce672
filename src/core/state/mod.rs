// src/core/state/mod.rs

//! Defines the central `ServerState` struct and the worker-local client
//! table and stats counters it coordinates.

mod client;
mod core;
mod stats;

pub use client::{ClientId, ClientInfo, ClientTable};
pub use core::ServerState;
pub use stats::StatsState;
