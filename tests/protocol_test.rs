//! Integration coverage for the RESP parser's boundary behaviors (§8
//! "Boundary behaviors", "Round-trips").

use bytes::BytesMut;
use corvus::core::protocol::resp::{ParseMode, ParseOutcome, parse_frame};

fn complete(input: &[u8], mode: ParseMode) -> (corvus::core::protocol::resp::RespFrame, bytes::Bytes) {
    let mut buf = BytesMut::from(input);
    match parse_frame(&mut buf, mode).unwrap() {
        ParseOutcome::Complete { frame, raw } => (frame, raw),
        ParseOutcome::Incomplete => panic!("expected a complete parse"),
    }
}

#[test]
fn bulk_string_of_exactly_bufsize_forces_a_second_buffer() {
    // §8: "A bulk string of length exactly `bufsize` parses correctly
    // (forces a second buffer)." The parser itself is buffer-agnostic (it
    // works over one growing `BytesMut`), so the property under test here
    // is that a payload exactly matching the configured default bufsize
    // still parses as one item when fed in two chunks that split exactly
    // at the bufsize boundary.
    let bufsize = 16 * 1024;
    let payload = vec![b'x'; bufsize];
    let mut input = Vec::new();
    input.extend_from_slice(format!("${bufsize}\r\n").as_bytes());
    input.extend_from_slice(&payload);
    input.extend_from_slice(b"\r\n");

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&input[..bufsize]);
    assert!(matches!(
        parse_frame(&mut buf, ParseMode::Reply).unwrap(),
        ParseOutcome::Incomplete
    ));
    buf.extend_from_slice(&input[bufsize..]);
    let (frame, raw) = match parse_frame(&mut buf, ParseMode::Reply).unwrap() {
        ParseOutcome::Complete { frame, raw } => (frame, raw),
        ParseOutcome::Incomplete => panic!("expected complete after full input"),
    };
    assert_eq!(raw.len(), input.len());
    match frame {
        corvus::core::protocol::resp::RespFrame::BulkString(Some(b)) => assert_eq!(b.len(), bufsize),
        other => panic!("expected bulk string, got {other:?}"),
    }
}

#[test]
fn request_spanning_many_small_chunks_matches_single_chunk_parse() {
    let input = b"*3\r\n$3\r\nSET\r\n$5\r\nhello\r\n$5\r\nworld\r\n";
    let (whole_frame, whole_raw) = complete(input, ParseMode::Request);

    let mut buf = BytesMut::new();
    for byte in &input[..input.len() - 1] {
        buf.extend_from_slice(&[*byte]);
        if let ParseOutcome::Complete { .. } = parse_frame(&mut buf, ParseMode::Request).unwrap() {
            panic!("completed before all bytes were fed");
        }
    }
    buf.extend_from_slice(&input[input.len() - 1..]);
    let (chunked_frame, chunked_raw) = match parse_frame(&mut buf, ParseMode::Request).unwrap() {
        ParseOutcome::Complete { frame, raw } => (frame, raw),
        ParseOutcome::Incomplete => panic!("one-byte-at-a-time feed never completed"),
    };
    assert_eq!(whole_frame, chunked_frame);
    assert_eq!(whole_raw, chunked_raw);
}

#[test]
fn multi_buffer_request_exceeding_one_chunk_succeeds() {
    // §8: "A request whose total size exceeds a single buffer succeeds."
    let big_value = "v".repeat(100_000);
    let input = format!("*3\r\n$3\r\nSET\r\n$1\r\nk\r\n${}\r\n{big_value}\r\n", big_value.len());
    let (frame, raw) = complete(input.as_bytes(), ParseMode::Request);
    assert_eq!(raw.len(), input.len());
    let arr = frame.as_array().unwrap();
    assert_eq!(arr[2].as_bulk_str().unwrap().len(), big_value.len());
}

#[test]
fn negative_length_only_valid_at_null_markers() {
    let mut buf = BytesMut::from(&b"$-2\r\n"[..]);
    assert!(parse_frame(&mut buf, ParseMode::Reply).is_err());
}
