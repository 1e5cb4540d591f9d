//! Reconnecting store client
//!
//! [`KvClient`] is the handle every component holds. On a transport failure
//! it logs a warning, reconnects the backend once and returns the error to
//! the caller, which decides whether to retry.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{
    GroupInfo, KeyTtl, MemoryStore, PendingEntry, StoreBackend, StoreResult, StreamEntry,
};
use crate::config::{Config, StoreBackendKind, StoreConfig};
use crate::error::{Error, Result};

static GLOBAL: OnceCell<KvClient> = OnceCell::const_new();

const HEALTH_PROBE_KEY: &str = "kgsync:health:probe";

/// Shared handle to the key-value store
#[derive(Clone)]
pub struct KvClient {
    backend: Arc<dyn StoreBackend>,
}

impl fmt::Debug for KvClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvClient")
            .field("backend", &self.backend.name())
            .field("connected", &self.backend.is_connected())
            .finish()
    }
}

impl KvClient {
    /// Wrap an existing backend
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Client over a fresh in-process store
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Build a client for the configured backend
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        match config.backend {
            StoreBackendKind::Memory => Ok(Self::memory()),
            #[cfg(feature = "redis")]
            StoreBackendKind::Redis => {
                let password = config
                    .resolved_password()
                    .map_err(|e| Error::ConfigError(format!("{:#}", e)))?;
                let store =
                    super::RedisStore::connect(&config.host, config.db, password.as_deref())
                        .await?;
                info!(url = %config.redacted_url(), "Connected to store");
                Ok(Self::new(Arc::new(store)))
            }
            #[cfg(not(feature = "redis"))]
            StoreBackendKind::Redis => Err(Error::ConfigError(
                "store.backend = redis requires building with the `redis` feature".to_string(),
            )),
        }
    }

    /// Process-wide client, initialized once from the loaded configuration
    pub async fn global() -> Result<&'static KvClient> {
        GLOBAL
            .get_or_try_init(|| async {
                let config = Config::load().map_err(|e| Error::ConfigError(format!("{:#}", e)))?;
                Self::connect(&config.store).await
            })
            .await
    }

    /// Backend name for diagnostics
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Whether a connection has been established
    pub fn is_alive(&self) -> bool {
        self.backend.is_connected()
    }

    /// Log a transport failure and reconnect once before handing the error back
    async fn checked<T>(&self, op: &'static str, key: &str, res: StoreResult<T>) -> StoreResult<T> {
        if let Err(e) = &res {
            if e.is_transport() {
                warn!(op = op, key = %key, error = %e, "Store call failed, reconnecting");
                match self.backend.reconnect().await {
                    Ok(()) => debug!(backend = self.backend.name(), "Store reconnected"),
                    Err(re) => warn!(error = %re, "Store reconnect failed"),
                }
            } else {
                debug!(op = op, key = %key, error = %e, "Store call returned an error");
            }
        }
        res
    }

    /// PING followed by a short-lived set/get probe
    pub async fn health(&self) -> bool {
        if self.checked("ping", "", self.backend.ping().await).await.is_err() {
            return false;
        }
        let probe = uuid::Uuid::new_v4().to_string();
        if self
            .set(HEALTH_PROBE_KEY, &probe, Some(Duration::from_secs(3)))
            .await
            .is_err()
        {
            return false;
        }
        matches!(self.get(HEALTH_PROBE_KEY).await, Ok(Some(v)) if v == probe)
    }

    // ========== Strings ==========

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let res = self.backend.get(key).await;
        self.checked("get", key, res).await
    }

    pub async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> StoreResult<()> {
        let res = self.backend.set(key, value, expiry).await;
        self.checked("set", key, res).await
    }

    /// Store a value as JSON
    pub async fn set_obj<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiry: Option<Duration>,
    ) -> StoreResult<()> {
        let encoded = serde_json::to_string(value)?;
        self.set(key, &encoded, expiry).await
    }

    /// Read a JSON value written by [`KvClient::set_obj`]
    pub async fn get_obj<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_nx(&self, key: &str, value: &str, expiry: Duration) -> StoreResult<bool> {
        let res = self.backend.set_nx(key, value, expiry).await;
        self.checked("set_nx", key, res).await
    }

    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let res = self.backend.delete(key).await;
        self.checked("delete", key, res).await
    }

    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let res = self.backend.compare_and_delete(key, expected).await;
        self.checked("compare_and_delete", key, res).await
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        let res = self.backend.exists(key).await;
        self.checked("exists", key, res).await
    }

    pub async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let res = self.backend.ttl(key).await;
        self.checked("ttl", key, res).await
    }

    /// Unconditionally remove a lock key left behind by a crashed holder
    pub async fn clean_lock(&self, key: &str) -> StoreResult<bool> {
        let removed = self.delete(key).await?;
        if removed {
            info!(lock_key = %key, "Lock force-cleaned");
        }
        Ok(removed)
    }

    // ========== Sets ==========

    pub async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let res = self.backend.sadd(key, member).await;
        self.checked("sadd", key, res).await
    }

    pub async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let res = self.backend.srem(key, member).await;
        self.checked("srem", key, res).await
    }

    pub async fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        let res = self.backend.smembers(key).await;
        self.checked("smembers", key, res).await
    }

    // ========== Sorted sets ==========

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let res = self.backend.zadd(key, member, score).await;
        self.checked("zadd", key, res).await
    }

    pub async fn zcount(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        let res = self.backend.zcount(key, min, max).await;
        self.checked("zcount", key, res).await
    }

    pub async fn zpopmin(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
        let res = self.backend.zpopmin(key, count).await;
        self.checked("zpopmin", key, res).await
    }

    pub async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        let res = self.backend.zrangebyscore(key, min, max).await;
        self.checked("zrangebyscore", key, res).await
    }

    // ========== Streams ==========

    pub async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> StoreResult<String> {
        let res = self.backend.xadd(stream, fields).await;
        self.checked("xadd", stream, res).await
    }

    pub async fn xgroup_create(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
        mkstream: bool,
    ) -> StoreResult<()> {
        let res = self
            .backend
            .xgroup_create(stream, group, start_id, mkstream)
            .await;
        self.checked("xgroup_create", stream, res).await
    }

    /// Consumer groups registered on a stream (XINFO GROUPS)
    pub async fn stream_groups(&self, stream: &str) -> StoreResult<Vec<GroupInfo>> {
        let res = self.backend.xinfo_groups(stream).await;
        self.checked("xinfo_groups", stream, res).await
    }

    /// Summary of one consumer group, `None` if it does not exist
    pub async fn queue_info(&self, stream: &str, group: &str) -> StoreResult<Option<GroupInfo>> {
        match self.stream_groups(stream).await {
            Ok(groups) => Ok(groups.into_iter().find(|g| g.name == group)),
            Err(e) if e.is_missing() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn xreadgroup(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        count: usize,
        block: Option<Duration>,
    ) -> StoreResult<Vec<StreamEntry>> {
        let res = self
            .backend
            .xreadgroup(group, consumer, stream, count, block)
            .await;
        self.checked("xreadgroup", stream, res).await
    }

    pub async fn xack(&self, stream: &str, group: &str, id: &str) -> StoreResult<u64> {
        let res = self.backend.xack(stream, group, id).await;
        self.checked("xack", stream, res).await
    }

    pub async fn xpending_range(
        &self,
        stream: &str,
        group: &str,
        min: &str,
        max: &str,
        count: usize,
        consumer: Option<&str>,
    ) -> StoreResult<Vec<PendingEntry>> {
        let res = self
            .backend
            .xpending_range(stream, group, min, max, count, consumer)
            .await;
        self.checked("xpending_range", stream, res).await
    }

    pub async fn xrange(
        &self,
        stream: &str,
        min: &str,
        max: &str,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>> {
        let res = self.backend.xrange(stream, min, max, count).await;
        self.checked("xrange", stream, res).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        count: u32,
    }

    fn client_with_store() -> (KvClient, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (KvClient::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_health_round_trip() {
        let client = KvClient::memory();
        assert!(client.is_alive());
        assert!(client.health().await);
        assert_eq!(client.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_json_objects() {
        let client = KvClient::memory();
        let value = Payload {
            name: "kb".into(),
            count: 3,
        };
        client.set_obj("obj", &value, None).await.unwrap();
        assert_eq!(client.get_obj::<Payload>("obj").await.unwrap(), Some(value));
        assert_eq!(client.get_obj::<Payload>("absent").await.unwrap(), None);

        client.set("bad", "not json", None).await.unwrap();
        assert!(matches!(
            client.get_obj::<Payload>("bad").await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_reconnects_once() {
        let (client, store) = client_with_store();
        store.set_offline(true);

        let err = client.get("k").await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(store.reconnect_count(), 1);
        assert!(!client.health().await);
        assert!(!client.is_alive());

        store.set_offline(false);
        assert!(client.health().await);
        assert!(client.is_alive());
    }

    #[tokio::test]
    async fn test_non_transport_errors_do_not_reconnect() {
        let (client, store) = client_with_store();
        let err = client.stream_groups("missing").await.unwrap_err();
        assert!(err.is_missing());
        assert_eq!(store.reconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_queue_info() {
        let client = KvClient::memory();
        assert_eq!(client.queue_info("q", "g").await.unwrap(), None);

        client.xgroup_create("q", "g", "0", true).await.unwrap();
        let info = client.queue_info("q", "g").await.unwrap().unwrap();
        assert_eq!(info.name, "g");
        assert_eq!(info.pending, 0);
    }

    #[tokio::test]
    async fn test_clean_lock() {
        let client = KvClient::memory();
        client
            .set_nx("kb1", "token", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(client.clean_lock("kb1").await.unwrap());
        assert!(!client.exists("kb1").await.unwrap());
        assert!(!client.clean_lock("kb1").await.unwrap());
    }
}
