//! Property-based coverage for the RESP parser's round-trip guarantee (§8
//! "Round-trips": "A request split across arbitrary buffer boundaries parses
//! identically to the same request in one buffer").

use bytes::BytesMut;
use corvus::core::protocol::resp::{ParseMode, ParseOutcome, parse_frame};
use proptest::prelude::*;

/// Build a well-formed `*N\r\n$len\r\n...\r\n` request out of arbitrary
/// argument bytes, so every case is a request the parser must accept.
fn encode_request(args: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Feed `input` to the parser one arbitrary-sized chunk at a time (per
/// `split_points`) and return the raw span of the first complete item.
fn parse_in_chunks(input: &[u8], split_points: &[usize]) -> bytes::Bytes {
    let mut offsets: Vec<usize> = split_points
        .iter()
        .map(|&p| p % (input.len() + 1))
        .collect();
    offsets.push(input.len());
    offsets.sort_unstable();
    offsets.dedup();

    let mut buf = BytesMut::new();
    let mut fed = 0;
    for &end in &offsets {
        buf.extend_from_slice(&input[fed..end]);
        fed = end;
        if let ParseOutcome::Complete { raw, .. } = parse_frame(&mut buf, ParseMode::Request).unwrap() {
            return raw;
        }
    }
    panic!("request never completed after feeding all {} bytes", input.len());
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn arbitrary_chunk_boundaries_parse_identically_to_one_shot(
        args in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..6),
        split_points in prop::collection::vec(any::<usize>(), 0..20),
    ) {
        let input = encode_request(&args);

        let mut whole = BytesMut::from(&input[..]);
        let whole_raw = match parse_frame(&mut whole, ParseMode::Request).unwrap() {
            ParseOutcome::Complete { raw, .. } => raw,
            ParseOutcome::Incomplete => panic!("a fully-buffered request must parse to completion"),
        };

        let chunked_raw = parse_in_chunks(&input, &split_points);
        prop_assert_eq!(whole_raw.as_ref(), chunked_raw.as_ref());
        prop_assert_eq!(chunked_raw.as_ref(), input.as_slice());
    }
}
