// src/core/command/fanout.rs

//! Splitting a COMPLEX command into independently-routed sub-commands, and
//! re-aggregating their replies (§4.F).

use bytes::{Bytes, BytesMut};

use crate::core::protocol::resp::{RespFrame, bulk, encode_frame};

/// One sub-command produced by a fan-out split: the key to hash on (for
/// routing) and the verbatim bytes to send to the chosen backend.
pub struct SubRequest {
    pub key: Bytes,
    pub raw: Bytes,
}

fn encode(frames: Vec<RespFrame>) -> Bytes {
    let arr = RespFrame::Array(Some(frames));
    let mut out = BytesMut::new();
    encode_frame(&arr, &mut out);
    out.freeze()
}

fn key_bytes(frame: &RespFrame) -> Option<Bytes> {
    frame.as_bulk_str().map(Bytes::copy_from_slice)
}

/// `MGET k1 k2 k3` -> one `GET k` per key.
pub fn split_mget(args: &[RespFrame]) -> Vec<SubRequest> {
    args[1..]
        .iter()
        .filter_map(|k| {
            let key = key_bytes(k)?;
            let raw = encode(vec![bulk("GET"), RespFrame::BulkString(Some(key.clone()))]);
            Some(SubRequest { key, raw })
        })
        .collect()
}

/// `MSET k1 v1 k2 v2` -> one `SET k v` per pair.
pub fn split_mset(args: &[RespFrame]) -> Vec<SubRequest> {
    args[1..]
        .chunks(2)
        .filter_map(|pair| {
            let (k, v) = (pair.first()?, pair.get(1)?);
            let key = key_bytes(k)?;
            let val = key_bytes(v)?;
            let raw = encode(vec![
                bulk("SET"),
                RespFrame::BulkString(Some(key.clone())),
                RespFrame::BulkString(Some(val)),
            ]);
            Some(SubRequest { key, raw })
        })
        .collect()
}

/// `DEL k1 k2` -> one `DEL k` per key.
pub fn split_del(args: &[RespFrame]) -> Vec<SubRequest> {
    split_single_key_command(args, "DEL")
}

/// `EXISTS k1 k2` -> one `EXISTS k` per key.
pub fn split_exists(args: &[RespFrame]) -> Vec<SubRequest> {
    split_single_key_command(args, "EXISTS")
}

fn split_single_key_command(args: &[RespFrame], name: &str) -> Vec<SubRequest> {
    args[1..]
        .iter()
        .filter_map(|k| {
            let key = key_bytes(k)?;
            let raw = encode(vec![bulk(name), RespFrame::BulkString(Some(key.clone()))]);
            Some(SubRequest { key, raw })
        })
        .collect()
}

/// `EVAL script numkeys key [key ...] arg...` -> a single pass-through
/// sub-command, routed on the first declared key (argument index 3, 0-based
/// — "position 4" in the design's 1-based accounting).
pub fn split_eval(args: &[RespFrame], raw: Bytes) -> Option<SubRequest> {
    let key = key_bytes(args.get(3)?)?;
    Some(SubRequest { key, raw })
}

/// Aggregation outcome: either a final reply frame, or the first failure
/// encountered among the sub-replies.
pub enum Aggregated {
    Frame(RespFrame),
    Failed(RespFrame),
}

/// `MGET`: `*N\r\n` followed by each sub-reply in order, unless any sub-reply
/// is an error, in which case that error is surfaced as-is (§4.F: a failed
/// sub-command's error becomes the whole parent's reply).
pub fn aggregate_mget(replies: Vec<RespFrame>) -> Aggregated {
    for reply in &replies {
        if let RespFrame::Error(_) = reply {
            return Aggregated::Failed(reply.clone());
        }
    }
    Aggregated::Frame(RespFrame::Array(Some(replies)))
}

/// `MSET`: `+OK` unless any sub-reply is an error, in which case that error
/// is surfaced as-is.
pub fn aggregate_mset(replies: &[RespFrame]) -> Aggregated {
    for reply in replies {
        if let RespFrame::Error(_) = reply {
            return Aggregated::Failed(reply.clone());
        }
    }
    Aggregated::Frame(crate::core::protocol::resp::simple("OK"))
}

/// `DEL`/`EXISTS`: sum of integer sub-replies, or the first error as-is.
pub fn aggregate_sum(replies: &[RespFrame]) -> Aggregated {
    let mut total: i64 = 0;
    for reply in replies {
        match reply {
            RespFrame::Integer(n) => total += n,
            RespFrame::Error(_) => return Aggregated::Failed(reply.clone()),
            _ => {}
        }
    }
    Aggregated::Frame(RespFrame::Integer(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<RespFrame> {
        words.iter().map(|w| bulk(*w)).collect()
    }

    #[test]
    fn mget_splits_one_get_per_key() {
        let subs = split_mget(&args(&["MGET", "a", "b", "c"]));
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0].key.as_ref(), b"a");
        assert_eq!(subs[0].raw.as_ref(), b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n");
    }

    #[test]
    fn mset_splits_into_pairs() {
        let subs = split_mset(&args(&["MSET", "a", "1", "b", "2"]));
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[1].key.as_ref(), b"b");
        assert_eq!(subs[1].raw.as_ref(), b"*3\r\n$3\r\nSET\r\n$1\r\nb\r\n$1\r\n2\r\n");
    }

    #[test]
    fn del_and_exists_split_per_key() {
        assert_eq!(split_del(&args(&["DEL", "a", "b"])).len(), 2);
        assert_eq!(split_exists(&args(&["EXISTS", "a", "b"])).len(), 2);
    }

    #[test]
    fn mget_aggregation_preserves_order() {
        let replies = vec![RespFrame::Integer(1), RespFrame::Integer(2), RespFrame::Integer(3)];
        match aggregate_mget(replies) {
            Aggregated::Frame(RespFrame::Array(Some(v))) => assert_eq!(v.len(), 3),
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn sum_aggregation_adds_integers() {
        let replies = vec![RespFrame::Integer(1), RespFrame::Integer(1), RespFrame::Integer(0)];
        match aggregate_sum(&replies) {
            Aggregated::Frame(RespFrame::Integer(n)) => assert_eq!(n, 2),
            _ => panic!("expected integer"),
        }
    }

    #[test]
    fn sum_aggregation_surfaces_first_error() {
        let replies = vec![
            RespFrame::Integer(1),
            RespFrame::Error(Bytes::from_static(b"ERR boom")),
        ];
        match aggregate_sum(&replies) {
            Aggregated::Failed(RespFrame::Error(e)) => assert_eq!(e.as_ref(), b"ERR boom"),
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn mset_aggregation_ok_unless_error() {
        let ok = vec![crate::core::protocol::resp::simple("OK"); 2];
        assert!(matches!(aggregate_mset(&ok), Aggregated::Frame(_)));
        let with_err = vec![
            crate::core::protocol::resp::simple("OK"),
            RespFrame::Error(Bytes::from_static(b"ERR nope")),
        ];
        assert!(matches!(aggregate_mset(&with_err), Aggregated::Failed(_)));
    }
}
