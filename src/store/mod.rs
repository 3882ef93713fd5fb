//! Store client capability
//!
//! The engine never talks to a socket directly. Everything it needs from an
//! endpoint is expressed by [`StoreClient`]: typed reads, a closed set of
//! write operations, keyspace enumeration and a handful of probes.
//!
//! Two implementations ship with the crate:
//!
//! - [`RespClient`]: a RESP2 connection to a Redis-compatible server
//! - [`MemoryStore`]: an in-process keyspace used by tests and embedders

pub mod memory;
pub mod resp;
mod value;

pub use memory::MemoryStore;
pub use resp::RespClient;
pub use value::{read_value, Value};

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors raised by a store client
#[derive(Error, Debug)]
pub enum StoreError {
    /// The server answered with an error reply
    #[error("command error: {0}")]
    Command(String),

    /// Malformed or unexpected reply
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the connection
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Returns true if the connection can no longer be trusted.
    ///
    /// Error replies are per-command and leave the connection usable; any
    /// other failure terminates the run.
    pub fn is_transport(&self) -> bool {
        !matches!(self, StoreError::Command(_))
    }
}

/// Type tag reported by `TYPE`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// String value
    String,
    /// List value
    List,
    /// Set value
    Set,
    /// Hash value
    Hash,
    /// Sorted set value
    SortedSet,
    /// Key does not exist
    None,
    /// Any type the engine cannot decode (stream, module types, ...)
    Other(String),
}

impl KeyType {
    /// Parse a `TYPE` reply
    pub fn from_reply(reply: &str) -> Self {
        match reply {
            "string" => KeyType::String,
            "list" => KeyType::List,
            "set" => KeyType::Set,
            "hash" => KeyType::Hash,
            "zset" => KeyType::SortedSet,
            "none" => KeyType::None,
            other => KeyType::Other(other.to_string()),
        }
    }

    /// Wire name of this type
    pub fn as_str(&self) -> &str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::Hash => "hash",
            KeyType::SortedSet => "zset",
            KeyType::None => "none",
            KeyType::Other(name) => name,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remaining time to live of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No expiration (or key missing)
    None,
    /// Key expires after this long
    Remaining(Duration),
}

impl Ttl {
    /// Convert a `TTL` reply in seconds. Non-positive replies mean no expiry.
    pub fn from_secs_reply(secs: i64) -> Self {
        if secs > 0 {
            Ttl::Remaining(Duration::from_secs(secs as u64))
        } else {
            Ttl::None
        }
    }

    /// Milliseconds for `RESTORE`, where `0` means no expiration
    pub fn as_restore_millis(&self) -> u64 {
        match self {
            Ttl::None => 0,
            Ttl::Remaining(d) => d.as_secs().saturating_mul(1000),
        }
    }

    /// Whole seconds remaining, if any
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Ttl::None => None,
            Ttl::Remaining(d) => Some(d.as_secs()),
        }
    }

    /// True if both TTLs are absent, or both present and at most
    /// `tolerance` apart.
    pub fn within(&self, other: &Ttl, tolerance: Duration) -> bool {
        match (self, other) {
            (Ttl::None, Ttl::None) => true,
            (Ttl::Remaining(a), Ttl::Remaining(b)) => {
                let drift = if a > b { *a - *b } else { *b - *a };
                drift <= tolerance
            }
            _ => false,
        }
    }
}

/// A single write against an endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// `SET key value`
    Set { key: Bytes, value: Bytes },
    /// `RPUSH key element...`
    RPush { key: Bytes, elements: Vec<Bytes> },
    /// `LPUSH key element...`
    LPush { key: Bytes, elements: Vec<Bytes> },
    /// `LPOP key`
    LPop { key: Bytes },
    /// `SADD key member...`
    SAdd { key: Bytes, members: Vec<Bytes> },
    /// `SREM key member...`
    SRem { key: Bytes, members: Vec<Bytes> },
    /// `HSET key field value ...`
    HSet { key: Bytes, fields: Vec<(Bytes, Bytes)> },
    /// `ZADD key score member ...`. Pairs are (score, member), the reverse
    /// of what `ZRANGE ... WITHSCORES` returns.
    ZAdd { key: Bytes, entries: Vec<(f64, Bytes)> },
    /// `EXPIRE key seconds`
    Expire { key: Bytes, ttl: Duration },
    /// `RESTORE key ttl-ms payload`
    Restore { key: Bytes, ttl_ms: u64, payload: Bytes },
}

impl WriteOp {
    /// Key this operation writes to
    pub fn key(&self) -> &Bytes {
        match self {
            WriteOp::Set { key, .. }
            | WriteOp::RPush { key, .. }
            | WriteOp::LPush { key, .. }
            | WriteOp::LPop { key }
            | WriteOp::SAdd { key, .. }
            | WriteOp::SRem { key, .. }
            | WriteOp::HSet { key, .. }
            | WriteOp::ZAdd { key, .. }
            | WriteOp::Expire { key, .. }
            | WriteOp::Restore { key, .. } => key,
        }
    }
}

/// Everything the engine needs from one endpoint.
///
/// Implementations use interior mutability so a single client can be shared
/// between the key emitter, the transfer strategy and the verifier.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Connection identity, e.g. `redis://localhost:6379/0`
    fn identity(&self) -> String;

    /// Whether the client exposes the cursor scan primitive
    fn supports_cursor_scan(&self) -> bool {
        true
    }

    /// Whether [`StoreClient::pipeline`] flushes ops in one round trip
    fn supports_pipelining(&self) -> bool {
        false
    }

    /// Health check
    async fn ping(&self) -> StoreResult<()>;

    /// Server version string (`redis_version` in `INFO`)
    async fn server_version(&self) -> StoreResult<String>;

    /// `TYPE key`
    async fn key_type(&self, key: &[u8]) -> StoreResult<KeyType>;

    /// `TTL key`
    async fn ttl(&self, key: &[u8]) -> StoreResult<Ttl>;

    /// `GET key`
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>>;

    /// `LRANGE key 0 -1`
    async fn lrange_all(&self, key: &[u8]) -> StoreResult<Vec<Bytes>>;

    /// `SMEMBERS key`
    async fn smembers(&self, key: &[u8]) -> StoreResult<Vec<Bytes>>;

    /// `HGETALL key`
    async fn hgetall(&self, key: &[u8]) -> StoreResult<Vec<(Bytes, Bytes)>>;

    /// `ZRANGE key 0 -1 WITHSCORES`, ascending, as (member, score)
    async fn zrange_with_scores(&self, key: &[u8]) -> StoreResult<Vec<(Bytes, f64)>>;

    /// `DUMP key`
    async fn dump(&self, key: &[u8]) -> StoreResult<Option<Bytes>>;

    /// `KEYS pattern`
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<Bytes>>;

    /// `SCAN cursor MATCH pattern COUNT count`. A returned cursor of `0`
    /// means the iteration is complete.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
        -> StoreResult<(u64, Vec<Bytes>)>;

    /// `DBSIZE`
    async fn dbsize(&self) -> StoreResult<u64>;

    /// `RANDOMKEY`; `None` when the keyspace is empty
    async fn random_key(&self) -> StoreResult<Option<Bytes>>;

    /// Execute a single write
    async fn execute(&self, op: WriteOp) -> StoreResult<()>;

    /// Execute several writes, in order. Stops at the first error reply.
    async fn pipeline(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        for op in ops {
            self.execute(op).await?;
        }
        Ok(())
    }
}

/// Printable, quoted form of a binary key for operator output
pub fn quoted(key: &[u8]) -> String {
    let mut out = String::with_capacity(key.len() + 2);
    out.push('"');
    for &b in key {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02X}", b)),
        }
    }
    out.push('"');
    out
}
