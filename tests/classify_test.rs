//! Integration coverage for the command classifier's full routing surface
//! (§4.J), beyond the handful of spot checks kept in the unit tests next to
//! the table itself.

use corvus::core::classify::{Access, Kind, classify};

#[test]
fn every_basic_read_command_classifies_as_basic_read() {
    for name in [
        "GET", "STRLEN", "TTL", "HGETALL", "LRANGE", "SMEMBERS", "ZSCORE", "SORT",
    ] {
        let c = classify(name.as_bytes());
        assert_eq!(c.kind, Kind::Basic, "{name} should be Basic");
        assert_eq!(c.access, Access::Read, "{name} should be Read");
    }
}

#[test]
fn every_basic_write_command_classifies_as_basic_write() {
    for name in ["SET", "INCR", "EXPIRE", "HSET", "LPUSH", "SADD", "ZADD"] {
        let c = classify(name.as_bytes());
        assert_eq!(c.kind, Kind::Basic, "{name} should be Basic");
        assert_eq!(c.access, Access::Write, "{name} should be Write");
    }
}

#[test]
fn complex_commands_have_the_expected_read_write_split() {
    assert_eq!(classify(b"MGET").access, Access::Read);
    assert_eq!(classify(b"EXISTS").access, Access::Read);
    assert_eq!(classify(b"MSET").access, Access::Write);
    assert_eq!(classify(b"DEL").access, Access::Write);
    assert_eq!(classify(b"EVAL").access, Access::Write);
    for name in ["MGET", "MSET", "DEL", "EXISTS", "EVAL"] {
        assert_eq!(classify(name.as_bytes()).kind, Kind::Complex);
    }
}

#[test]
fn extra_commands_are_handled_locally() {
    for name in ["PING", "INFO", "AUTH", "PROXY"] {
        assert_eq!(classify(name.as_bytes()).kind, Kind::Extra);
    }
}

#[test]
fn unimplemented_commands_never_classify_as_routable() {
    for name in ["SCAN", "KEYS", "MIGRATE", "WAIT", "BITOP", "EVALSHA"] {
        assert_eq!(classify(name.as_bytes()).kind, Kind::Unimpl);
    }
}

#[test]
fn classification_is_case_insensitive() {
    assert_eq!(classify(b"get").kind, classify(b"GET").kind);
    assert_eq!(classify(b"Get").access, classify(b"GET").access);
    assert_eq!(classify(b"MgEt").kind, Kind::Complex);
}

#[test]
fn malformed_utf8_command_name_is_unimplemented_not_a_panic() {
    let c = classify(&[0xff, 0xfe]);
    assert_eq!(c.kind, Kind::Unimpl);
    assert_eq!(c.access, Access::Unknown);
}
