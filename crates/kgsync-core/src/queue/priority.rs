//! Min-priority / delay queue over a sorted set
//!
//! No consumer groups and no recovery: a popped member is gone.

use chrono::{DateTime, Utc};

use crate::store::{KvClient, StoreResult};

#[derive(Debug, Clone)]
pub struct DelayQueue {
    client: KvClient,
    key: String,
}

impl DelayQueue {
    pub fn new(client: KvClient, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Add or re-score a member; returns whether it was new
    pub async fn push(&self, member: &str, score: f64) -> StoreResult<bool> {
        self.client.zadd(&self.key, member, score).await
    }

    /// Schedule a member to become due at `at`
    pub async fn schedule(&self, member: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        self.push(member, at.timestamp_millis() as f64).await
    }

    /// Remove and return the lowest-scored members
    pub async fn pop_min(&self, count: usize) -> StoreResult<Vec<(String, f64)>> {
        self.client.zpopmin(&self.key, count).await
    }

    /// Members with a score at or below `until`, lowest first, left in place
    pub async fn due(&self, until: f64) -> StoreResult<Vec<String>> {
        self.client
            .zrangebyscore(&self.key, f64::NEG_INFINITY, until)
            .await
    }

    /// Members scheduled at or before the current time
    pub async fn due_now(&self) -> StoreResult<Vec<String>> {
        self.due(Utc::now().timestamp_millis() as f64).await
    }

    pub async fn count(&self, min: f64, max: f64) -> StoreResult<u64> {
        self.client.zcount(&self.key, min, max).await
    }

    pub async fn len(&self) -> StoreResult<u64> {
        self.count(f64::NEG_INFINITY, f64::INFINITY).await
    }
}
