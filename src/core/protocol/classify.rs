// src/core/protocol/classify.rs

//! Classifies a command verb as key-bearing, broadcast, or unsupported, so
//! the dispatcher knows how to extract routing keys from it.
//!
//! The exact command surface supported by the target backend isn't part of
//! this codebase; the table below is derived from the standard Redis
//! command set and is fixed at compile time. Unknown verbs default to
//! `Unsupported` rather than being guessed at.

/// How a command's arguments relate to routing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The first argument (index 1 in the frame) is the routing key.
    KeySingle,
    /// Every argument from index 1 onward is a routing key; all must hash
    /// to the same slot.
    KeyMulti,
    /// Handled locally or forwarded without slot resolution (e.g. `PING`).
    Broadcast,
    /// Not handled by this proxy; replies with an in-band error.
    Unsupported,
}

pub fn classify(verb: &[u8]) -> Classification {
    // Command verbs arrive already uppercased by the caller.
    match verb {
        b"GET" | b"SET" | b"SETNX" | b"SETEX" | b"PSETEX" | b"GETSET" | b"GETDEL" | b"APPEND"
        | b"STRLEN" | b"INCR" | b"DECR" | b"INCRBY" | b"DECRBY" | b"INCRBYFLOAT" | b"EXPIRE"
        | b"PEXPIRE" | b"EXPIREAT" | b"PEXPIREAT" | b"TTL" | b"PTTL" | b"PERSIST" | b"TYPE"
        | b"DUMP" | b"RESTORE" | b"HGET" | b"HSET" | b"HSETNX" | b"HDEL" | b"HEXISTS"
        | b"HINCRBY" | b"HINCRBYFLOAT" | b"HGETALL" | b"HKEYS" | b"HVALS" | b"HLEN"
        | b"HSCAN" | b"LPUSH" | b"RPUSH" | b"LPUSHX" | b"RPUSHX" | b"LPOP" | b"RPOP"
        | b"LLEN" | b"LRANGE" | b"LINDEX" | b"LSET" | b"LTRIM" | b"LREM" | b"SADD"
        | b"SREM" | b"SISMEMBER" | b"SMEMBERS" | b"SCARD" | b"SPOP" | b"SRANDMEMBER"
        | b"SSCAN" | b"ZADD" | b"ZREM" | b"ZSCORE" | b"ZINCRBY" | b"ZCARD" | b"ZCOUNT"
        | b"ZRANGE" | b"ZREVRANGE" | b"ZRANGEBYSCORE" | b"ZREVRANGEBYSCORE" | b"ZRANK"
        | b"ZREVRANK" | b"ZSCAN" | b"GETRANGE" | b"SETRANGE" | b"SETBIT" | b"GETBIT"
        | b"BITCOUNT" | b"OBJECT" => Classification::KeySingle,

        b"MGET" | b"MSET" | b"MSETNX" | b"DEL" | b"UNLINK" | b"EXISTS" | b"TOUCH"
        | b"SDIFF" | b"SINTER" | b"SUNION" | b"SDIFFSTORE" | b"SINTERSTORE"
        | b"SUNIONSTORE" | b"WATCH" => Classification::KeyMulti,

        b"PING" | b"ECHO" | b"SELECT" | b"QUIT" | b"HELLO" | b"AUTH" | b"COMMAND"
        | b"CLIENT" | b"ASKING" => Classification::Broadcast,

        _ => Classification::Unsupported,
    }
}

/// True for write commands that must be rejected while the cluster-wide
/// emergency read-only flag (not modeled here; reserved for the coordinator
/// to eventually drive) would be set.
pub fn is_write(verb: &[u8]) -> bool {
    !matches!(
        verb,
        b"GET" | b"MGET" | b"EXISTS" | b"TOUCH" | b"TTL" | b"PTTL" | b"TYPE" | b"STRLEN"
            | b"HGET" | b"HGETALL" | b"HKEYS" | b"HVALS" | b"HLEN" | b"HEXISTS" | b"HSCAN"
            | b"LLEN" | b"LRANGE" | b"LINDEX" | b"SISMEMBER" | b"SMEMBERS" | b"SCARD"
            | b"SRANDMEMBER" | b"SSCAN" | b"SDIFF" | b"SINTER" | b"SUNION" | b"ZSCORE"
            | b"ZCARD" | b"ZCOUNT" | b"ZRANGE" | b"ZREVRANGE" | b"ZRANGEBYSCORE"
            | b"ZREVRANGEBYSCORE" | b"ZRANK" | b"ZREVRANK" | b"ZSCAN" | b"GETRANGE"
            | b"GETBIT" | b"BITCOUNT" | b"DUMP" | b"OBJECT" | b"PING" | b"ECHO" | b"SELECT"
            | b"QUIT" | b"HELLO" | b"AUTH" | b"COMMAND" | b"CLIENT" | b"ASKING"
    )
}
