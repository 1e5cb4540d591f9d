//! At-least-once queue over a store stream and consumer groups

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::QueueConfig;
use super::message::{MESSAGE_FIELD, QueueMessage};
use crate::store::{GroupInfo, KvClient, StoreError, StoreResult};

/// Producer and consumer side of a stream queue
#[derive(Debug, Clone)]
pub struct ReliableQueue {
    client: KvClient,
    config: QueueConfig,
}

impl ReliableQueue {
    pub fn new(client: KvClient, config: QueueConfig) -> Self {
        Self { client, config }
    }

    pub fn with_defaults(client: KvClient) -> Self {
        Self::new(client, QueueConfig::default())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Serialize and append a message
    ///
    /// Each store failure is logged and retried up to the configured number
    /// of attempts. `false` means the message was not written.
    pub async fn produce<T: Serialize + ?Sized>(&self, stream: &str, message: &T) -> bool {
        let payload = match serde_json::to_string(message) {
            Ok(p) => p,
            Err(e) => {
                error!(stream = %stream, error = %e, "Message could not be serialized");
                return false;
            }
        };
        let fields = [(MESSAGE_FIELD.to_string(), payload)];

        let attempts = self.config.produce_attempts.max(1);
        for attempt in 1..=attempts {
            match self.client.xadd(stream, &fields).await {
                Ok(id) => {
                    debug!(stream = %stream, id = %id, "Message produced");
                    return true;
                }
                Err(e) => {
                    warn!(stream = %stream, attempt = attempt, error = %e, "Produce attempt failed");
                }
            }
        }
        error!(stream = %stream, attempts = attempts, "Message dropped after retries");
        false
    }

    /// Create the group at the stream's origin unless it already exists
    async fn ensure_group(&self, stream: &str, group: &str) -> StoreResult<()> {
        let groups = match self.client.stream_groups(stream).await {
            Ok(groups) => groups,
            Err(StoreError::NoSuchKey(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        if groups.iter().any(|g| g.name == group) {
            return Ok(());
        }
        match self.client.xgroup_create(stream, group, "0", true).await {
            Ok(()) => {
                info!(stream = %stream, group = %group, "Consumer group created");
                Ok(())
            }
            // Another consumer created it first
            Err(StoreError::GroupExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn try_consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Option<Duration>,
    ) -> StoreResult<Option<QueueMessage>> {
        self.ensure_group(stream, group).await?;
        let mut entries = self
            .client
            .xreadgroup(group, consumer, stream, 1, block)
            .await?;
        if entries.is_empty() {
            return Ok(None);
        }
        let entry = entries.swap_remove(0);
        let id = entry.id.clone();
        match QueueMessage::from_entry(self.client.clone(), stream, group, consumer, entry) {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                self.discard(stream, group, &id, &e.to_string()).await?;
                Ok(None)
            }
        }
    }

    /// Acknowledge an entry that can never become a message
    ///
    /// Returns whether the entry was still pending.
    async fn discard(
        &self,
        stream: &str,
        group: &str,
        id: &str,
        reason: &str,
    ) -> StoreResult<bool> {
        warn!(stream = %stream, group = %group, id = %id, reason = %reason, "Dropping undeliverable entry");
        Ok(self.client.xack(stream, group, id).await? > 0)
    }

    /// Read one new message for `consumer`, waiting up to `block`
    ///
    /// `None` covers timeouts, missing streams or groups, and failures
    /// (the latter logged); callers retry at a higher level.
    pub async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Option<Duration>,
    ) -> Option<QueueMessage> {
        match self.try_consume(stream, group, consumer, block).await {
            Ok(message) => message,
            Err(e) if e.is_missing() => {
                debug!(stream = %stream, group = %group, "Nothing to consume yet");
                None
            }
            Err(e) => {
                warn!(stream = %stream, group = %group, consumer = %consumer, code = e.code(), error = %e, "Consume failed");
                None
            }
        }
    }

    async fn try_recover(
        &self,
        consumer: &str,
        stream: &str,
        group: &str,
    ) -> StoreResult<Option<QueueMessage>> {
        let max = self.config.pending_scan_max.to_string();
        loop {
            let pending = self
                .client
                .xpending_range(stream, group, "0", &max, 1, Some(consumer))
                .await?;
            let Some(oldest) = pending.into_iter().next() else {
                return Ok(None);
            };

            let mut entries = self.client.xrange(stream, &oldest.id, &oldest.id, 1).await?;
            if entries.is_empty() {
                if !self
                    .discard(stream, group, &oldest.id, "entry no longer in stream")
                    .await?
                {
                    return Ok(None);
                }
                continue;
            }
            let entry = entries.swap_remove(0);
            match QueueMessage::from_entry(self.client.clone(), stream, group, consumer, entry) {
                Ok(message) => {
                    debug!(
                        stream = %stream,
                        id = %oldest.id,
                        idle_ms = oldest.idle.as_millis() as u64,
                        deliveries = oldest.deliveries,
                        "Recovered unacknowledged message"
                    );
                    return Ok(Some(message));
                }
                Err(e) => {
                    if !self.discard(stream, group, &oldest.id, &e.to_string()).await? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Oldest message delivered to `consumer` but never acknowledged
    pub async fn recover_unacked(
        &self,
        consumer: &str,
        stream: &str,
        group: &str,
    ) -> Option<QueueMessage> {
        match self.try_recover(consumer, stream, group).await {
            Ok(message) => message,
            Err(e) if e.is_missing() => None,
            Err(e) => {
                warn!(stream = %stream, group = %group, consumer = %consumer, code = e.code(), error = %e, "Unacked recovery failed");
                None
            }
        }
    }

    /// Group summary for monitoring
    pub async fn info(&self, stream: &str, group: &str) -> StoreResult<Option<GroupInfo>> {
        self.client.queue_info(stream, group).await
    }
}
