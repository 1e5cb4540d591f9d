//! Lock manager for knowledge-base locks
//!
//! Hands out [`DistributedLock`]s keyed by knowledge-base id with the
//! configured TTL and timeout, and exposes the operator view of a lock
//! record (who holds it, for how long) plus a forced cleanup.

use tracing::info;

use super::distributed::DistributedLock;
use super::types::{LockConfig, LockResult, LockStatus};
use crate::store::KvClient;

/// Builds and inspects locks over one store
#[derive(Debug, Clone)]
pub struct LockManager {
    client: KvClient,
    config: LockConfig,
}

impl LockManager {
    pub fn new(client: KvClient, config: LockConfig) -> Self {
        Self { client, config }
    }

    /// Manager using the graph-update lock settings
    pub fn with_defaults(client: KvClient) -> Self {
        Self::new(client, LockConfig::for_graph_updates())
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn client(&self) -> &KvClient {
        &self.client
    }

    /// Fresh lock handle for a knowledge base
    pub fn lock_for(&self, kb_id: &str) -> DistributedLock {
        DistributedLock::new(self.client.clone(), kb_id, self.config.clone())
    }

    /// Current holder and remaining TTL of a knowledge base's lock
    pub async fn status(&self, kb_id: &str) -> LockResult<LockStatus> {
        let holder = self.client.get(kb_id).await?;
        let ttl = self.client.ttl(kb_id).await?;
        Ok(LockStatus {
            key: kb_id.to_string(),
            holder,
            ttl,
        })
    }

    /// Delete the lock record regardless of holder
    ///
    /// For operators clearing a lock left by a crashed worker; a live holder
    /// loses its exclusion.
    pub async fn clean(&self, kb_id: &str) -> LockResult<bool> {
        let removed = self.client.clean_lock(kb_id).await?;
        if !removed {
            info!(lock_key = %kb_id, "No lock record to clean");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyTtl;

    #[tokio::test]
    async fn test_status_reports_holder() {
        let manager = LockManager::with_defaults(KvClient::memory());
        let status = manager.status("kb1").await.unwrap();
        assert!(!status.is_held());
        assert_eq!(status.ttl, KeyTtl::Missing);

        let mut lock = manager.lock_for("kb1");
        lock.acquire().await.unwrap();

        let status = manager.status("kb1").await.unwrap();
        assert_eq!(status.holder.as_deref(), Some(lock.token()));
        assert!(status.ttl.remaining().is_some());
    }

    #[tokio::test]
    async fn test_clean_removes_foreign_lock() {
        let manager = LockManager::with_defaults(KvClient::memory());
        let mut lock = manager.lock_for("kb1");
        lock.acquire().await.unwrap();

        assert!(manager.clean("kb1").await.unwrap());
        assert!(!manager.clean("kb1").await.unwrap());

        // The original holder's release is now a harmless no-op
        assert!(!lock.release().await);
        assert!(manager.lock_for("kb1").try_acquire().await);
    }
}
