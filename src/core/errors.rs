// src/core/errors.rs

//! The error taxonomy for the proxy core (§7 of the design: every failure that
//! destroys in-flight commands surfaces a concrete reply byte string).

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure mode the command pipeline
/// can hit. `thiserror` gives us `Display`/`std::error::Error` for free and
/// lets each variant own the exact wording its synthesized client reply uses.
#[derive(Error, Debug)]
pub enum CorvusError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// Malformed bytes from a client in REQUEST mode.
    #[error("ERR Proxy fail to parse command")]
    ParseError,

    /// Malformed bytes from a backend in REPLY mode.
    #[error("ERR Proxy fail to parse command")]
    ServerParseError,

    #[error("ERR Proxy error")]
    UnknownCommand(String),

    #[error("ERR Proxy fail to get server")]
    NoRoute,

    #[error("ERR Proxy error")]
    ConnectFailed,

    #[error("ERR Proxy error")]
    WriteFailed,

    #[error("ERR Proxy error")]
    ReadFailed,

    #[error("MOVED {slot} {addr}")]
    RedirectMoved { slot: u16, addr: String },

    #[error("ASK {slot} {addr}")]
    RedirectAsk { slot: u16, addr: String },

    #[error("CLUSTERDOWN {0}")]
    ClusterDown(String),

    #[error("ERR Proxy timed out")]
    Timeout,

    #[error("NOAUTH Authentication required.")]
    NotAuthenticated,

    #[error("ERR invalid password")]
    InvalidPassword,

    #[error("ERR Client sent AUTH, but no password is set")]
    NoPasswordSet,

    #[error("out of memory")]
    OutOfMemory,

    #[error("{0}")]
    Config(String),
}

impl Clone for CorvusError {
    fn clone(&self) -> Self {
        match self {
            CorvusError::Io(e) => CorvusError::Io(Arc::clone(e)),
            CorvusError::ParseError => CorvusError::ParseError,
            CorvusError::ServerParseError => CorvusError::ServerParseError,
            CorvusError::UnknownCommand(s) => CorvusError::UnknownCommand(s.clone()),
            CorvusError::NoRoute => CorvusError::NoRoute,
            CorvusError::ConnectFailed => CorvusError::ConnectFailed,
            CorvusError::WriteFailed => CorvusError::WriteFailed,
            CorvusError::ReadFailed => CorvusError::ReadFailed,
            CorvusError::RedirectMoved { slot, addr } => CorvusError::RedirectMoved {
                slot: *slot,
                addr: addr.clone(),
            },
            CorvusError::RedirectAsk { slot, addr } => CorvusError::RedirectAsk {
                slot: *slot,
                addr: addr.clone(),
            },
            CorvusError::ClusterDown(s) => CorvusError::ClusterDown(s.clone()),
            CorvusError::Timeout => CorvusError::Timeout,
            CorvusError::NotAuthenticated => CorvusError::NotAuthenticated,
            CorvusError::InvalidPassword => CorvusError::InvalidPassword,
            CorvusError::NoPasswordSet => CorvusError::NoPasswordSet,
            CorvusError::OutOfMemory => CorvusError::OutOfMemory,
            CorvusError::Config(s) => CorvusError::Config(s.clone()),
        }
    }
}

impl From<std::io::Error> for CorvusError {
    fn from(e: std::io::Error) -> Self {
        CorvusError::Io(Arc::new(e))
    }
}

impl CorvusError {
    /// The exact RESP error line written back to the client, per §6/§7.
    /// Does not include the leading `-` or trailing `\r\n` — callers append
    /// those when encoding.
    pub fn client_message(&self) -> String {
        match self {
            CorvusError::Io(_)
            | CorvusError::ConnectFailed
            | CorvusError::WriteFailed
            | CorvusError::ReadFailed
            | CorvusError::UnknownCommand(_) => "ERR Proxy error".to_string(),
            CorvusError::ParseError | CorvusError::ServerParseError => {
                "ERR Proxy fail to parse command".to_string()
            }
            CorvusError::NoRoute => "ERR Proxy fail to get server".to_string(),
            CorvusError::RedirectMoved { .. } | CorvusError::RedirectAsk { .. } => {
                "ERR Proxy redirecting error".to_string()
            }
            CorvusError::ClusterDown(msg) => format!("CLUSTERDOWN {msg}"),
            CorvusError::Timeout => "ERR Proxy timed out".to_string(),
            CorvusError::NotAuthenticated => "NOAUTH Authentication required.".to_string(),
            CorvusError::InvalidPassword => "ERR invalid password".to_string(),
            CorvusError::NoPasswordSet => {
                "ERR Client sent AUTH, but no password is set".to_string()
            }
            CorvusError::OutOfMemory => "ERR Proxy error".to_string(),
            CorvusError::Config(s) => s.clone(),
        }
    }

    /// Whether this failure should trigger a slot-map refresh job (§7).
    pub fn triggers_topology_refresh(&self) -> bool {
        matches!(
            self,
            CorvusError::NoRoute
                | CorvusError::RedirectMoved { .. }
                | CorvusError::RedirectAsk { .. }
                | CorvusError::ServerParseError
        )
    }
}
