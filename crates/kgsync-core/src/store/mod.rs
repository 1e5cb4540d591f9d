//! Key-value store abstraction
//!
//! The store is the only coordination channel between worker processes.
//! Everything built on top of it (the distributed lock, the reliable queue,
//! the KV-backed graph store) talks to a [`KvClient`], which wraps a
//! [`StoreBackend`] with reconnect-on-failure handling.
//!
//! # Backends
//!
//! - [`MemoryStore`]: in-process store with full semantics (expiry, sets,
//!   sorted sets, streams with consumer groups and pending lists). Used by
//!   tests and single-process deployments.
//! - `RedisStore` (feature `redis`): Redis/Valkey over a multiplexed
//!   async connection.

pub mod client;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::KvClient;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store could not be reached or the connection broke mid-call
    #[error("Store transport error: {0}")]
    Transport(String),

    /// The key (or stream) does not exist
    #[error("No such key: {0}")]
    NoSuchKey(String),

    /// The consumer group does not exist on the stream
    #[error("No such consumer group '{group}' on stream '{stream}'")]
    NoSuchGroup { stream: String, group: String },

    /// The consumer group already exists on the stream
    #[error("Consumer group '{group}' already exists on stream '{stream}'")]
    GroupExists { stream: String, group: String },

    /// Operation against a key holding the wrong kind of value
    #[error("Wrong value type for key: {0}")]
    WrongType(String),

    /// Value could not be encoded or decoded
    #[error("Store serialization error: {0}")]
    Serialization(String),

    /// Anything else the backend reported
    #[error("Store command failed: {0}")]
    Command(String),
}

impl StoreError {
    /// Get error code for this store error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "E100",
            Self::NoSuchKey(_) => "E101",
            Self::NoSuchGroup { .. } => "E102",
            Self::GroupExists { .. } => "E103",
            Self::WrongType(_) => "E104",
            Self::Serialization(_) => "E105",
            Self::Command(_) => "E106",
        }
    }

    /// Connection-level failure: the caller should try again later
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Missing stream or group: "nothing to do yet", not a failure
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::NoSuchKey(_) | Self::NoSuchGroup { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "ms")]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key expires after this long
    Expires(u64),
}

impl KeyTtl {
    /// Remaining lifetime, if the key is set to expire
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Expires(ms) => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

impl fmt::Display for KeyTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Persistent => write!(f, "persistent"),
            Self::Expires(ms) => write!(f, "{:.1}s", *ms as f64 / 1000.0),
        }
    }
}

/// Identifier of a stream entry (`<millis>-<sequence>`)
///
/// Ids are strictly increasing within a stream and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parse a range bound. Accepts `-`, `+`, `<ms>` and `<ms>-<seq>`.
    ///
    /// A bare `<ms>` as a lower bound starts at sequence 0; as an upper
    /// bound it covers every sequence within that millisecond.
    pub fn parse_bound(s: &str, upper: bool) -> StoreResult<Self> {
        match s {
            "-" => Ok(Self::MIN),
            "+" => Ok(Self::MAX),
            _ if s.contains('-') => s.parse(),
            _ => {
                let ms = s
                    .parse::<u64>()
                    .map_err(|_| StoreError::Command(format!("Invalid stream ID: {}", s)))?;
                Ok(Self::new(ms, if upper { u64::MAX } else { 0 }))
            }
        }
    }
}

impl Ord for StreamId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ms, self.seq).cmp(&(other.ms, other.seq))
    }
}

impl PartialOrd for StreamId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for StreamId {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        let invalid = || StoreError::Command(format!("Invalid stream ID: {}", s));
        let (ms, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One entry read from a stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

/// One entry of a consumer group's pending-entries list
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    /// Time since the entry was last delivered
    pub idle: Duration,
    pub deliveries: u64,
}

/// Summary of a consumer group (XINFO GROUPS)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: u64,
    pub pending: u64,
    pub last_delivered_id: String,
}

/// Backend operations the client relies on
///
/// Every method reports failures as a [`StoreError`]; neutral values are
/// never used to signal errors. `compare_and_delete` must be atomic.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Short backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Whether a connection has been established
    fn is_connected(&self) -> bool;

    /// Drop the current connection (if any) and open a new one
    async fn reconnect(&self) -> StoreResult<()>;

    async fn ping(&self) -> StoreResult<()>;

    // ========== Strings ==========

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> StoreResult<()>;

    /// Set only if the key is absent; returns whether the value was written
    async fn set_nx(&self, key: &str, value: &str, expiry: Duration) -> StoreResult<bool>;

    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete the key only if its current value equals `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    // ========== Sets ==========

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>>;

    // ========== Sorted sets ==========

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;

    async fn zcount(&self, key: &str, min: f64, max: f64) -> StoreResult<u64>;

    async fn zpopmin(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>>;

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>>;

    // ========== Streams ==========

    /// Append an entry; returns the generated id
    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> StoreResult<String>;

    async fn xgroup_create(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
        mkstream: bool,
    ) -> StoreResult<()>;

    async fn xinfo_groups(&self, stream: &str) -> StoreResult<Vec<GroupInfo>>;

    /// Read entries never delivered to the group (`>`), assigning them to
    /// `consumer`. `block = None` returns immediately; `Some(d)` waits up
    /// to `d` for new entries.
    async fn xreadgroup(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        count: usize,
        block: Option<Duration>,
    ) -> StoreResult<Vec<StreamEntry>>;

    async fn xack(&self, stream: &str, group: &str, id: &str) -> StoreResult<u64>;

    async fn xpending_range(
        &self,
        stream: &str,
        group: &str,
        min: &str,
        max: &str,
        count: usize,
        consumer: Option<&str>,
    ) -> StoreResult<Vec<PendingEntry>>;

    async fn xrange(
        &self,
        stream: &str,
        min: &str,
        max: &str,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_ordering_and_parse() {
        let a: StreamId = "5-1".parse().unwrap();
        let b: StreamId = "5-2".parse().unwrap();
        let c: StreamId = "6-0".parse().unwrap();
        assert!(a < b && b < c);
        assert_eq!(a.to_string(), "5-1");
        assert!("garbage".parse::<StreamId>().is_err());
    }

    #[test]
    fn test_stream_id_bounds() {
        assert_eq!(StreamId::parse_bound("-", false).unwrap(), StreamId::MIN);
        assert_eq!(StreamId::parse_bound("+", true).unwrap(), StreamId::MAX);
        assert_eq!(
            StreamId::parse_bound("7", false).unwrap(),
            StreamId::new(7, 0)
        );
        assert_eq!(
            StreamId::parse_bound("7", true).unwrap(),
            StreamId::new(7, u64::MAX)
        );
        assert_eq!(
            StreamId::parse_bound("7-3", true).unwrap(),
            StreamId::new(7, 3)
        );
    }

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::Transport("x".into()).is_transport());
        assert!(StoreError::NoSuchKey("s".into()).is_missing());
        assert!(
            StoreError::NoSuchGroup {
                stream: "s".into(),
                group: "g".into()
            }
            .is_missing()
        );
        assert!(!StoreError::WrongType("k".into()).is_missing());
    }

    #[test]
    fn test_key_ttl_display() {
        assert_eq!(KeyTtl::Missing.to_string(), "missing");
        assert_eq!(KeyTtl::Expires(1500).to_string(), "1.5s");
        assert_eq!(
            KeyTtl::Expires(250).remaining(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(KeyTtl::Persistent.remaining(), None);
    }
}
