// src/main.rs

//! The main entry point for the Corvus proxy.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::filter::EnvFilter;

use corvus::config::{Config, LogLevel, RawConfig};
use corvus::server;

/// A fast, multi-threaded RESP proxy for a sharded key/value cluster.
///
/// CLI flags shadow the corresponding `config.toml` keys (§6).
#[derive(Parser, Debug)]
#[command(name = "corvus", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Listening port; overrides `bind` in the config file.
    #[arg(long)]
    bind: Option<u16>,

    /// Comma-separated seed `ip:port` list; overrides `node`.
    #[arg(long)]
    node: Option<String>,

    /// Worker thread count; overrides `thread`.
    #[arg(long)]
    thread: Option<usize>,

    /// Log level (`debug`, `info`, `warn`, `error`); overrides `loglevel`.
    #[arg(long)]
    loglevel: Option<LogLevel>,

    /// Shared auth password; overrides `requirepass`.
    #[arg(long)]
    requirepass: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let raw = RawConfig::load(&cli.config)?;
    let config: Config = raw
        .with_overrides(cli.bind, cli.node, cli.thread, cli.loglevel, cli.requirepass)
        .resolve()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter_str())),
        )
        .compact()
        .init();

    server::run(config).await
}
