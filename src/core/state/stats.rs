// src/core/state/stats.rs

//! Process-wide atomic counters (§5: "exactly three items cross thread
//! boundaries... atomic counters"). Every field is a single word updated
//! with relaxed ops — no worker ever blocks on these, and readers (the
//! `INFO` handler) get a best-effort snapshot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Holds all state and logic related to proxy-wide statistics, surfaced via
/// the synthesized `INFO` reply (§6).
#[derive(Debug)]
pub struct StatsState {
    connected_clients: AtomicU64,
    completed_commands: AtomicU64,
    recv_bytes: AtomicU64,
    send_bytes: AtomicU64,
    remote_latency_micros: AtomicU64,
    remote_latency_samples: AtomicU64,
    total_latency_micros: AtomicU64,
    total_latency_samples: AtomicU64,
    /// One entry per worker thread, microseconds of the worker's most
    /// recently completed command.
    last_command_latency_us: Vec<AtomicU64>,
    slowlog: SlowLog,
}

impl StatsState {
    pub fn new(worker_count: usize) -> Self {
        Self {
            connected_clients: AtomicU64::new(0),
            completed_commands: AtomicU64::new(0),
            recv_bytes: AtomicU64::new(0),
            send_bytes: AtomicU64::new(0),
            remote_latency_micros: AtomicU64::new(0),
            remote_latency_samples: AtomicU64::new(0),
            total_latency_micros: AtomicU64::new(0),
            total_latency_samples: AtomicU64::new(0),
            last_command_latency_us: (0..worker_count).map(|_| AtomicU64::new(0)).collect(),
            slowlog: SlowLog::new(128),
        }
    }

    pub fn client_connected(&self) {
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.connected_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connected_clients(&self) -> u64 {
        self.connected_clients.load(Ordering::Relaxed)
    }

    pub fn command_completed(&self) {
        self.completed_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed_commands(&self) -> u64 {
        self.completed_commands.load(Ordering::Relaxed)
    }

    pub fn add_recv_bytes(&self, n: u64) {
        self.recv_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_send_bytes(&self, n: u64) {
        self.send_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn recv_bytes(&self) -> u64 {
        self.recv_bytes.load(Ordering::Relaxed)
    }

    pub fn send_bytes(&self) -> u64 {
        self.send_bytes.load(Ordering::Relaxed)
    }

    pub fn record_remote_latency_us(&self, micros: u64) {
        self.remote_latency_micros.fetch_add(micros, Ordering::Relaxed);
        self.remote_latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_latency_secs(&self) -> f64 {
        avg_secs(&self.remote_latency_micros, &self.remote_latency_samples)
    }

    pub fn record_total_latency_us(&self, micros: u64) {
        self.total_latency_micros.fetch_add(micros, Ordering::Relaxed);
        self.total_latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_latency_secs(&self) -> f64 {
        avg_secs(&self.total_latency_micros, &self.total_latency_samples)
    }

    pub fn record_last_command_latency(&self, worker_index: usize, micros: u64) {
        if let Some(slot) = self.last_command_latency_us.get(worker_index) {
            slot.store(micros, Ordering::Relaxed);
        }
    }

    /// Comma-separated per-worker last-command latency in microseconds, for
    /// the `last_command_latency` INFO field.
    pub fn last_command_latency_csv(&self) -> String {
        self.last_command_latency_us
            .iter()
            .map(|v| v.load(Ordering::Relaxed).to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn record_slow_command(&self, name: String, micros: i64) {
        self.slowlog.push(name, micros);
    }

    pub fn slowlog_len(&self) -> usize {
        self.slowlog.len()
    }
}

fn avg_secs(total_micros: &AtomicU64, samples: &AtomicU64) -> f64 {
    let samples = samples.load(Ordering::Relaxed);
    if samples == 0 {
        return 0.0;
    }
    let total = total_micros.load(Ordering::Relaxed);
    (total as f64 / samples as f64) / 1_000_000.0
}

/// An append-only, fixed-capacity ring buffer of slow commands. Carries the
/// `slowlog-*` configuration surface (§6) without building the full
/// aggregation/query pipeline, which is an out-of-scope external
/// collaborator (§1).
#[derive(Debug)]
struct SlowLog {
    entries: Mutex<Vec<(String, i64)>>,
    capacity: usize,
    cursor: AtomicUsize,
}

impl SlowLog {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            cursor: AtomicUsize::new(0),
        }
    }

    fn push(&self, name: String, micros: i64) {
        let mut entries = self.entries.lock();
        if entries.len() < self.capacity {
            entries.push((name, micros));
        } else {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.capacity;
            entries[idx] = (name, micros);
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Tracks the microsecond timestamp a command started at, independent of
/// `AtomicI64`'s signedness quirks when measuring elapsed time.
pub fn now_micros(start: std::time::Instant) -> u64 {
    start.elapsed().as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_clients_tracks_add_and_remove() {
        let stats = StatsState::new(4);
        stats.client_connected();
        stats.client_connected();
        stats.client_disconnected();
        assert_eq!(stats.connected_clients(), 1);
    }

    #[test]
    fn latency_average_is_zero_with_no_samples() {
        let stats = StatsState::new(4);
        assert_eq!(stats.remote_latency_secs(), 0.0);
    }

    #[test]
    fn last_command_latency_csv_has_one_entry_per_worker() {
        let stats = StatsState::new(3);
        stats.record_last_command_latency(1, 500);
        let csv = stats.last_command_latency_csv();
        let parts: Vec<_> = csv.split(',').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], "500");
    }

    #[test]
    fn slowlog_wraps_around_capacity() {
        let stats = StatsState::new(1);
        for i in 0..200 {
            stats.record_slow_command(format!("CMD{i}"), i as i64);
        }
        assert_eq!(stats.slowlog_len(), 128);
    }
}
