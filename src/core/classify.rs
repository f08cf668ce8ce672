// src/core/classify.rs

//! The command classifier (§4.J): a static table of command name -> (kind,
//! access) driving routing decisions. Classification never inspects values,
//! only the command name and (for BASIC) the key position.

/// How a command's routing is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Single key at argument index 1, forwarded verbatim.
    Basic,
    /// Multi-key command requiring fan-out (§4.F).
    Complex,
    /// Handled locally by the proxy without touching a backend.
    Extra,
    /// Not supported; always fails with `UnknownCommand`.
    Unimpl,
}

/// Whether a command reads or writes, for read-strategy routing (§4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: Kind,
    pub access: Access,
}

const BASIC_READ: &[&str] = &[
    "GET", "BITCOUNT", "BITPOS", "GETBIT", "GETRANGE", "STRLEN", "DUMP", "PTTL", "TTL", "TYPE",
    "HEXISTS", "HGET", "HGETALL", "HKEYS", "HLEN", "HMGET", "HSTRLEN", "HVALS", "HSCAN", "LINDEX",
    "LLEN", "LRANGE", "SCARD", "SDIFF", "SINTER", "SISMEMBER", "SMEMBERS", "SRANDMEMBER",
    "SUNION", "SSCAN", "ZCARD", "ZCOUNT", "ZLEXCOUNT", "ZRANGE", "ZRANGEBYLEX", "ZRANGEBYSCORE",
    "ZRANK", "ZREVRANGE", "ZREVRANGEBYLEX", "ZREVRANGEBYSCORE", "ZREVRANK", "ZSCORE", "ZSCAN",
    "PFCOUNT", "SORT",
];

const BASIC_WRITE: &[&str] = &[
    "SET", "APPEND", "DECR", "DECRBY", "GETSET", "INCR", "INCRBY", "INCRBYFLOAT", "PSETEX",
    "SETBIT", "SETEX", "SETNX", "SETRANGE", "EXPIRE", "EXPIREAT", "PERSIST", "PEXPIRE",
    "PEXPIREAT", "RESTORE", "HDEL", "HINCRBY", "HINCRBYFLOAT", "HMSET", "HSET", "HSETNX",
    "LINSERT", "LPOP", "LPUSH", "LPUSHX", "LREM", "LSET", "LTRIM", "RPOP", "RPOPLPUSH", "RPUSH",
    "RPUSHX", "SADD", "SDIFFSTORE", "SINTERSTORE", "SMOVE", "SPOP", "SREM", "SUNIONSTORE",
    "ZADD", "ZINCRBY", "ZINTERSTORE", "ZREM", "ZREMRANGEBYLEX", "ZREMRANGEBYRANK",
    "ZREMRANGEBYSCORE", "ZUNIONSTORE", "PFADD", "PFMERGE",
];

const COMPLEX: &[&str] = &["MGET", "MSET", "DEL", "EXISTS", "EVAL"];

const EXTRA: &[&str] = &["PING", "INFO", "AUTH", "PROXY"];

const UNIMPL: &[&str] = &[
    "KEYS", "MIGRATE", "MOVE", "OBJECT", "RANDOMKEY", "RENAME", "RENAMENX", "SCAN", "WAIT",
    "BITOP", "MSETNX", "EVALSHA", "BLPOP", "BRPOP", "BRPOPLPUSH", "ECHO", "QUIT", "SELECT",
];

/// Classify a command name. Names are matched case-insensitively (the caller
/// should pass the already-uppercased name; `classify` uppercases defensively
/// in case it doesn't).
pub fn classify(name: &[u8]) -> Classification {
    let upper = name.to_ascii_uppercase();
    let upper = match std::str::from_utf8(&upper) {
        Ok(s) => s,
        Err(_) => {
            return Classification {
                kind: Kind::Unimpl,
                access: Access::Unknown,
            };
        }
    };

    if BASIC_READ.contains(&upper) {
        return Classification {
            kind: Kind::Basic,
            access: Access::Read,
        };
    }
    if BASIC_WRITE.contains(&upper) {
        return Classification {
            kind: Kind::Basic,
            access: Access::Write,
        };
    }
    if COMPLEX.contains(&upper) {
        let access = if upper == "MGET" || upper == "EXISTS" {
            Access::Read
        } else {
            Access::Write
        };
        return Classification {
            kind: Kind::Complex,
            access,
        };
    }
    if EXTRA.contains(&upper) {
        return Classification {
            kind: Kind::Extra,
            access: Access::Unknown,
        };
    }
    if UNIMPL.contains(&upper) {
        return Classification {
            kind: Kind::Unimpl,
            access: Access::Unknown,
        };
    }
    Classification {
        kind: Kind::Unimpl,
        access: Access::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_basic_read() {
        let c = classify(b"GET");
        assert_eq!(c.kind, Kind::Basic);
        assert_eq!(c.access, Access::Read);
    }

    #[test]
    fn set_is_basic_write() {
        let c = classify(b"SET");
        assert_eq!(c.kind, Kind::Basic);
        assert_eq!(c.access, Access::Write);
    }

    #[test]
    fn mget_is_complex() {
        assert_eq!(classify(b"MGET").kind, Kind::Complex);
        assert_eq!(classify(b"mget").kind, Kind::Complex);
    }

    #[test]
    fn ping_is_extra() {
        assert_eq!(classify(b"PING").kind, Kind::Extra);
    }

    #[test]
    fn scan_is_unimplemented() {
        assert_eq!(classify(b"SCAN").kind, Kind::Unimpl);
    }

    #[test]
    fn unknown_command_is_unimplemented() {
        assert_eq!(classify(b"FROBNICATE").kind, Kind::Unimpl);
    }
}
