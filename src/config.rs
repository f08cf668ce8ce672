// src/config.rs

//! Loads, resolves, and validates the proxy's configuration.
//!
//! Follows a two-phase pattern: deserialize into `RawConfig` (every field
//! optional, with `serde(default)`), then resolve into a fully-populated
//! `Config` and run `validate()` — the same shape the TOML config layer this
//! was grounded on uses, trimmed to the keys this proxy actually recognizes
//! (§6).

use std::fs;
use std::net::SocketAddr;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Read routing policy (§4.G).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReadStrategy {
    Master,
    ReadSlaveOnly,
    Both,
}

impl Default for ReadStrategy {
    fn default() -> Self {
        ReadStrategy::Master
    }
}

/// The raw, partially-defaulted view of `config.toml`. Every field is
/// optional at the file level; `resolve()` fills in the rest.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub cluster: bool,
    pub bind: Option<u16>,
    #[serde(default)]
    pub node: String,
    pub thread: Option<usize>,
    #[serde(default)]
    pub loglevel: LogLevel,
    #[serde(default)]
    pub syslog: bool,
    pub statsd: Option<String>,
    pub metric_interval: Option<u64>,
    #[serde(default = "default_true")]
    pub stats: bool,
    #[serde(default, rename = "read-strategy")]
    pub read_strategy: ReadStrategy,
    #[serde(default)]
    pub requirepass: String,
    pub client_timeout: Option<u64>,
    pub server_timeout: Option<u64>,
    pub bufsize: Option<usize>,
    #[serde(default = "default_slowlog_threshold", rename = "slowlog-log-slower-than")]
    pub slowlog_log_slower_than: i64,
    #[serde(default = "default_slowlog_max_len", rename = "slowlog-max-len")]
    pub slowlog_max_len: usize,
    #[serde(default, rename = "slowlog-statsd-enabled")]
    pub slowlog_statsd_enabled: bool,
}

fn default_true() -> bool {
    true
}
fn default_slowlog_threshold() -> i64 {
    10_000
}
fn default_slowlog_max_len() -> usize {
    128
}

/// The fully resolved, validated configuration used by the rest of the
/// process.
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster: bool,
    pub bind_port: u16,
    pub nodes: Vec<SocketAddr>,
    pub threads: usize,
    pub log_level: LogLevel,
    pub syslog: bool,
    pub statsd: Option<SocketAddr>,
    pub metric_interval_secs: u64,
    pub stats: bool,
    pub read_strategy: ReadStrategy,
    pub requirepass: Option<String>,
    pub client_timeout_secs: u64,
    pub server_timeout_secs: u64,
    pub bufsize: usize,
    pub slowlog_log_slower_than_us: i64,
    pub slowlog_max_len: usize,
    pub slowlog_statsd_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        RawConfig::default().resolve().expect("default config must validate")
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        RawConfig::load(path)?.resolve()
    }
}

impl RawConfig {
    /// Load `path` as TOML, falling back to an all-defaults `RawConfig` if
    /// the file doesn't exist — matching the teacher's "config file is
    /// optional, CLI flags plus defaults are enough to boot" stance.
    pub fn load(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str(&contents).with_context(|| format!("failed to parse '{path}' as TOML"))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RawConfig::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read config file '{path}'")),
        }
    }
}

impl RawConfig {
    pub fn resolve(self) -> Result<Config> {
        let nodes = parse_node_list(&self.node)?;
        let statsd = match self.statsd {
            Some(s) if !s.is_empty() => {
                Some(s.parse().with_context(|| format!("invalid statsd address '{s}'"))?)
            }
            _ => None,
        };
        let requirepass = if self.requirepass.is_empty() {
            None
        } else {
            Some(self.requirepass)
        };

        let cfg = Config {
            cluster: self.cluster,
            bind_port: self.bind.unwrap_or(8088),
            nodes,
            threads: self.thread.unwrap_or(4),
            log_level: self.loglevel,
            syslog: self.syslog,
            statsd,
            metric_interval_secs: self.metric_interval.unwrap_or(10),
            stats: self.stats,
            read_strategy: self.read_strategy,
            requirepass,
            client_timeout_secs: self.client_timeout.unwrap_or(0),
            server_timeout_secs: self.server_timeout.unwrap_or(0),
            bufsize: self.bufsize.unwrap_or(16 * 1024),
            slowlog_log_slower_than_us: self.slowlog_log_slower_than,
            slowlog_max_len: self.slowlog_max_len,
            slowlog_statsd_enabled: self.slowlog_statsd_enabled,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_overrides(
        mut self,
        bind: Option<u16>,
        node: Option<String>,
        thread: Option<usize>,
        loglevel: Option<LogLevel>,
        requirepass: Option<String>,
    ) -> Self {
        if let Some(b) = bind {
            self.bind = Some(b);
        }
        if let Some(n) = node {
            self.node = n;
        }
        if let Some(t) = thread {
            self.thread = Some(t);
        }
        if let Some(l) = loglevel {
            self.loglevel = l;
        }
        if let Some(p) = requirepass {
            self.requirepass = p;
        }
        self
    }
}

fn parse_node_list(raw: &str) -> Result<Vec<SocketAddr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SocketAddr>()
                .with_context(|| format!("invalid node address '{s}'"))
        })
        .collect()
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(anyhow!("'thread' must be at least 1"));
        }
        if self.bufsize < 64 {
            return Err(anyhow!("'bufsize' must be at least 64 bytes"));
        }
        if self.cluster && self.nodes.is_empty() {
            return Err(anyhow!("'node' must list at least one seed address when cluster mode is enabled"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.bufsize, 16 * 1024);
        assert_eq!(cfg.read_strategy, ReadStrategy::Master);
    }

    #[test]
    fn parses_node_list() {
        let raw = RawConfig {
            cluster: true,
            node: "127.0.0.1:7001, 127.0.0.1:7002".into(),
            ..Default::default()
        };
        let cfg = raw.resolve().unwrap();
        assert_eq!(cfg.nodes.len(), 2);
    }

    #[test]
    fn rejects_zero_threads() {
        let raw = RawConfig {
            thread: Some(0),
            ..Default::default()
        };
        assert!(raw.resolve().is_err());
    }

    #[test]
    fn rejects_tiny_bufsize() {
        let raw = RawConfig {
            bufsize: Some(10),
            ..Default::default()
        };
        assert!(raw.resolve().is_err());
    }

    #[test]
    fn cluster_mode_requires_seed_nodes() {
        let raw = RawConfig {
            cluster: true,
            ..Default::default()
        };
        assert!(raw.resolve().is_err());
    }

    #[test]
    fn empty_requirepass_means_no_auth() {
        let cfg = Config::default();
        assert!(cfg.requirepass.is_none());
    }
}
