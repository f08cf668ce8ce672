// src/core/cluster/redirect.rs

//! Parses `-MOVED`/`-ASK` redirection errors out of a backend reply (§4.F,
//! §4.G). Both trigger a slot-map refresh; the proxy surfaces the
//! redirection to the client rather than retrying transparently.

use std::net::SocketAddr;

use crate::core::errors::CorvusError;

/// If `line` (the text of a RESP error reply, without the leading `-`) is a
/// `MOVED` or `ASK` redirection, return the matching error variant.
pub fn parse_redirect(line: &[u8]) -> Option<CorvusError> {
    let text = std::str::from_utf8(line).ok()?;
    let mut parts = text.split_whitespace();
    let kind = parts.next()?;
    let slot: u16 = parts.next()?.parse().ok()?;
    let addr: SocketAddr = parts.next()?.parse().ok()?;
    match kind {
        "MOVED" => Some(CorvusError::RedirectMoved {
            slot,
            addr: addr.to_string(),
        }),
        "ASK" => Some(CorvusError::RedirectAsk {
            slot,
            addr: addr.to_string(),
        }),
        _ => None,
    }
}
