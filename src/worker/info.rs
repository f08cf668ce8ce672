// src/worker/info.rs

//! Renders the synthesized `INFO` reply payload (§6), folding in the
//! `PROXY INFO` admin-channel diagnostics per SPEC_FULL.md §10.5 rather than
//! building a second surface for them.

use crate::core::state::ServerState;

/// `used_cpu_sys`/`used_cpu_user` would need OS-specific process sampling
/// (e.g. `/proc/self/stat` on Linux) that pulls in a dependency this proxy
/// core doesn't otherwise need; reported as `0.00` until that's wired up.
const CPU_PLACEHOLDER: &str = "0.00";

pub fn render(state: &ServerState) -> String {
    let remotes = state
        .node_conf
        .seeds()
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut out = String::new();
    out.push_str(&format!("cluster:{}\r\n", state.config.cluster));
    out.push_str(&format!("version:{}\r\n", env!("CARGO_PKG_VERSION")));
    out.push_str(&format!("pid:{}\r\n", std::process::id()));
    out.push_str(&format!("threads:{}\r\n", state.config.threads));
    out.push_str("mem_allocator:system\r\n");
    out.push_str(&format!("used_cpu_sys:{CPU_PLACEHOLDER}\r\n"));
    out.push_str(&format!("used_cpu_user:{CPU_PLACEHOLDER}\r\n"));
    out.push_str(&format!("connected_clients:{}\r\n", state.stats.connected_clients()));
    out.push_str(&format!("completed_commands:{}\r\n", state.stats.completed_commands()));
    out.push_str(&format!("recv_bytes:{}\r\n", state.stats.recv_bytes()));
    out.push_str(&format!("send_bytes:{}\r\n", state.stats.send_bytes()));
    out.push_str(&format!("remote_latency:{:.6}\r\n", state.stats.remote_latency_secs()));
    out.push_str(&format!("total_latency:{:.6}\r\n", state.stats.total_latency_secs()));
    out.push_str(&format!("last_command_latency:{}\r\n", state.stats.last_command_latency_csv()));
    out.push_str(&format!("remotes:{remotes}\r\n"));
    out
}
