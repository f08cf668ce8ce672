// src/core/protocol/resp.rs

//! A resumable RESP parser over `bytes::BytesMut`.
//!
//! `bytes::Bytes` already gives us the "byte range" and "buffer pool" pieces
//! the design calls for: a `Bytes` handle is a reference-counted, zero-copy
//! slice into a shared backing allocation, and `BytesMut` recycles its
//! backing storage (`reserve`/`split_to`) the same way a per-worker free list
//! would. We lean on that instead of hand-rolling a buffer pool — see
//! DESIGN.md. Because the input accumulates in a single growing `BytesMut`
//! until a complete top-level item is available, the parser is naturally
//! resumable: an incomplete call mutates nothing and the next read simply
//! appends more bytes before we try again (the same discipline
//! `tokio_util::codec::Decoder` impls use).

use bytes::{Bytes, BytesMut};

use crate::core::errors::CorvusError;

/// Maximum nesting depth for arrays (§4.C).
pub const MAX_DEPTH: usize = 9;

/// A parsed RESP value. Bulk strings and array elements borrow from the
/// original buffer via `Bytes::slice`, so no payload bytes are copied.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(Bytes),
    Error(Bytes),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<RespFrame>>),
}

impl RespFrame {
    pub fn as_bulk_str(&self) -> Option<&[u8]> {
        match self {
            RespFrame::BulkString(Some(b)) => Some(b.as_ref()),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&[u8]> {
        match self {
            RespFrame::Error(b) => Some(b.as_ref()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespFrame]> {
        match self {
            RespFrame::Array(Some(v)) => Some(v),
            _ => None,
        }
    }
}

/// Whether the parser is reading a client request or a backend reply.
/// In `Request` mode the top-level item must be an array of bulk strings
/// (inline commands are rejected, §6); in `Reply` mode any top-level type is
/// accepted verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Request,
    Reply,
}

/// Result of one parse attempt.
pub enum ParseOutcome {
    /// Not enough bytes yet; `buf` is left untouched.
    Incomplete,
    /// A full top-level item was parsed and removed from `buf`.
    /// `raw` is the exact verbatim bytes of that item (for forwarding and
    /// for hashing without copying).
    Complete { frame: RespFrame, raw: Bytes },
}

const CRLF: &[u8] = b"\r\n";

/// Attempt to parse exactly one top-level RESP item out of `buf`.
///
/// On success the consumed bytes are removed from `buf` via `split_to` and
/// returned as `raw` (an O(1) `Bytes` slice sharing the same allocation).
/// On `Incomplete`, `buf` is left exactly as it was.
pub fn parse_frame(buf: &mut BytesMut, mode: ParseMode) -> Result<ParseOutcome, CorvusError> {
    let snapshot = buf.clone().freeze();
    match scan(&snapshot, 0)? {
        None => Ok(ParseOutcome::Incomplete),
        Some((frame, consumed)) => {
            if mode == ParseMode::Request && !matches!(frame, RespFrame::Array(Some(_))) {
                return Err(CorvusError::ParseError);
            }
            let raw = buf.split_to(consumed).freeze();
            Ok(ParseOutcome::Complete { frame, raw })
        }
    }
}

/// Scan one RESP item starting at offset 0 of `data`. Returns the frame and
/// the number of bytes it occupies, or `None` if `data` doesn't yet contain
/// a complete item.
fn scan(data: &Bytes, depth: usize) -> Result<Option<(RespFrame, usize)>, CorvusError> {
    if data.is_empty() {
        return Ok(None);
    }
    if depth > MAX_DEPTH {
        return Err(CorvusError::ParseError);
    }

    let tag = data[0];
    let rest = data.slice(1..);
    match tag {
        b'+' => scan_line(&rest, 1).map(|opt| {
            opt.map(|(line, used)| (RespFrame::SimpleString(line), used))
        }),
        b'-' => scan_line(&rest, 1).map(|opt| opt.map(|(line, used)| (RespFrame::Error(line), used))),
        b':' => match scan_line(&rest, 1)? {
            None => Ok(None),
            Some((line, used)) => {
                let n = parse_i64(&line)?;
                Ok(Some((RespFrame::Integer(n), used)))
            }
        },
        b'$' => scan_bulk_string(&rest, 1),
        b'*' => scan_array(&rest, 1, depth),
        _ => Err(CorvusError::ParseError),
    }
}

/// Scan a CRLF-terminated line after a 1-byte type tag. Returns the line
/// contents (without CRLF) and the total bytes consumed including the tag.
fn scan_line(rest: &Bytes, tag_len: usize) -> Result<Option<(Bytes, usize)>, CorvusError> {
    match find_crlf(rest) {
        None => Ok(None),
        Some(pos) => {
            let line = rest.slice(0..pos);
            Ok(Some((line, tag_len + pos + CRLF.len())))
        }
    }
}

fn scan_bulk_string(rest: &Bytes, tag_len: usize) -> Result<Option<(RespFrame, usize)>, CorvusError> {
    let (len_line, header_len) = match scan_line(rest, 0)? {
        None => return Ok(None),
        Some(v) => v,
    };
    let len = parse_i64(&len_line)?;
    if len < -1 {
        return Err(CorvusError::ParseError);
    }
    if len == -1 {
        return Ok(Some((RespFrame::BulkString(None), tag_len + header_len)));
    }
    let len = len as usize;
    let body_start = header_len;
    let needed = body_start + len + CRLF.len();
    if rest.len() < needed {
        return Ok(None);
    }
    if &rest[body_start + len..body_start + len + 2] != CRLF {
        return Err(CorvusError::ParseError);
    }
    let payload = rest.slice(body_start..body_start + len);
    Ok(Some((
        RespFrame::BulkString(Some(payload)),
        tag_len + needed,
    )))
}

fn scan_array(
    rest: &Bytes,
    tag_len: usize,
    depth: usize,
) -> Result<Option<(RespFrame, usize)>, CorvusError> {
    let (len_line, header_len) = match scan_line(rest, 0)? {
        None => return Ok(None),
        Some(v) => v,
    };
    let len = parse_i64(&len_line)?;
    if len < -1 {
        return Err(CorvusError::ParseError);
    }
    if len == -1 {
        return Ok(Some((RespFrame::Array(None), tag_len + header_len)));
    }
    let count = len as usize;
    let mut offset = header_len;
    let mut elems = Vec::with_capacity(count);
    for _ in 0..count {
        let remaining = rest.slice(offset..);
        match scan(&remaining, depth + 1)? {
            None => return Ok(None),
            Some((elem, used)) => {
                elems.push(elem);
                offset += used;
            }
        }
    }
    Ok(Some((RespFrame::Array(Some(elems)), tag_len + offset)))
}

fn find_crlf(data: &Bytes) -> Option<usize> {
    data.windows(2).position(|w| w == CRLF)
}

fn parse_i64(line: &Bytes) -> Result<i64, CorvusError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CorvusError::ParseError)
}

/// Encode a frame for a synthesized reply (PING/AUTH/INFO/PROXY/error
/// replies the proxy produces itself, as opposed to bytes forwarded
/// verbatim from a backend).
pub fn encode_frame(frame: &RespFrame, out: &mut BytesMut) {
    match frame {
        RespFrame::SimpleString(s) => {
            out.extend_from_slice(b"+");
            out.extend_from_slice(s);
            out.extend_from_slice(CRLF);
        }
        RespFrame::Error(e) => {
            out.extend_from_slice(b"-");
            out.extend_from_slice(e);
            out.extend_from_slice(CRLF);
        }
        RespFrame::Integer(n) => {
            out.extend_from_slice(b":");
            out.extend_from_slice(n.to_string().as_bytes());
            out.extend_from_slice(CRLF);
        }
        RespFrame::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
        RespFrame::BulkString(Some(b)) => {
            out.extend_from_slice(b"$");
            out.extend_from_slice(b.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(b);
            out.extend_from_slice(CRLF);
        }
        RespFrame::Array(None) => out.extend_from_slice(b"*-1\r\n"),
        RespFrame::Array(Some(elems)) => {
            out.extend_from_slice(b"*");
            out.extend_from_slice(elems.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            for e in elems {
                encode_frame(e, out);
            }
        }
    }
}

/// Convenience constructor for a simple `+OK\r\n`-style reply.
pub fn simple(s: &str) -> RespFrame {
    RespFrame::SimpleString(Bytes::copy_from_slice(s.as_bytes()))
}

/// Convenience constructor for an `-ERR ...\r\n`-style reply.
pub fn error(s: &str) -> RespFrame {
    RespFrame::Error(Bytes::copy_from_slice(s.as_bytes()))
}

pub fn bulk(s: impl AsRef<[u8]>) -> RespFrame {
    RespFrame::BulkString(Some(Bytes::copy_from_slice(s.as_ref())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8], mode: ParseMode) -> Vec<RespFrame> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        loop {
            match parse_frame(&mut buf, mode).unwrap() {
                ParseOutcome::Incomplete => break,
                ParseOutcome::Complete { frame, .. } => out.push(frame),
            }
        }
        out
    }

    #[test]
    fn parses_simple_get_request() {
        let input = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        let frames = parse_all(input, ParseMode::Request);
        assert_eq!(frames.len(), 1);
        let arr = frames[0].as_array().unwrap();
        assert_eq!(arr[0].as_bulk_str().unwrap(), b"GET");
        assert_eq!(arr[1].as_bulk_str().unwrap(), b"foo");
    }

    #[test]
    fn raw_span_is_verbatim() {
        let input = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n".to_vec();
        let mut buf = BytesMut::from(&input[..]);
        match parse_frame(&mut buf, ParseMode::Request).unwrap() {
            ParseOutcome::Complete { raw, .. } => assert_eq!(raw.as_ref(), &input[..]),
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn incomplete_request_leaves_buffer_untouched() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nfo"[..]);
        let before = buf.clone();
        match parse_frame(&mut buf, ParseMode::Request).unwrap() {
            ParseOutcome::Incomplete => assert_eq!(buf, before),
            ParseOutcome::Complete { .. } => panic!("expected incomplete"),
        }
    }

    #[test]
    fn rejects_inline_request() {
        let mut buf = BytesMut::from(&b"PING\r\n"[..]);
        assert!(parse_frame(&mut buf, ParseMode::Request).is_err());
    }

    #[test]
    fn null_bulk_and_array() {
        let mut buf = BytesMut::from(&b"$-1\r\n*-1\r\n"[..]);
        match parse_frame(&mut buf, ParseMode::Reply).unwrap() {
            ParseOutcome::Complete { frame, .. } => {
                assert_eq!(frame, RespFrame::BulkString(None))
            }
            _ => panic!(),
        }
        match parse_frame(&mut buf, ParseMode::Reply).unwrap() {
            ParseOutcome::Complete { frame, .. } => assert_eq!(frame, RespFrame::Array(None)),
            _ => panic!(),
        }
    }

    #[test]
    fn depth_ten_is_rejected() {
        let mut payload = b"*1\r\n:1\r\n".to_vec();
        for _ in 0..9 {
            let wrapped = [b"*1\r\n".to_vec(), payload].concat();
            payload = wrapped;
        }
        let mut buf = BytesMut::from(&payload[..]);
        assert!(parse_frame(&mut buf, ParseMode::Reply).is_err());
    }

    #[test]
    fn depth_nine_succeeds() {
        let mut payload = b"*1\r\n:1\r\n".to_vec();
        for _ in 0..8 {
            let wrapped = [b"*1\r\n".to_vec(), payload].concat();
            payload = wrapped;
        }
        let mut buf = BytesMut::from(&payload[..]);
        assert!(matches!(
            parse_frame(&mut buf, ParseMode::Reply).unwrap(),
            ParseOutcome::Complete { .. }
        ));
    }

    #[test]
    fn split_across_reads_parses_identically() {
        let input = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        for split in 1..input.len() {
            let mut buf = BytesMut::new();
            buf.extend_from_slice(&input[..split]);
            if let ParseOutcome::Complete { .. } = parse_frame(&mut buf, ParseMode::Request).unwrap() {
                panic!("unexpectedly complete at split {split}");
            }
            buf.extend_from_slice(&input[split..]);
            match parse_frame(&mut buf, ParseMode::Request).unwrap() {
                ParseOutcome::Complete { raw, .. } => assert_eq!(raw.as_ref(), &input[..]),
                ParseOutcome::Incomplete => panic!("expected complete after full input at split {split}"),
            }
        }
    }
}
