//! Delivered queue message handle

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::store::{KvClient, StoreError, StoreResult, StreamEntry};

/// Stream field holding the JSON-encoded payload
pub const MESSAGE_FIELD: &str = "message";

/// A message delivered to one consumer of a group
///
/// Stays on the group's pending list until [`QueueMessage::ack`] succeeds.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    client: KvClient,
    stream: String,
    group: String,
    consumer: String,
    id: String,
    payload: Value,
}

impl QueueMessage {
    pub(crate) fn from_entry(
        client: KvClient,
        stream: &str,
        group: &str,
        consumer: &str,
        entry: StreamEntry,
    ) -> StoreResult<Self> {
        let raw = entry.fields.get(MESSAGE_FIELD).ok_or_else(|| {
            StoreError::Serialization(format!(
                "entry {} on '{}' has no '{}' field",
                entry.id, stream, MESSAGE_FIELD
            ))
        })?;
        let payload = serde_json::from_str(raw)?;
        Ok(Self {
            client,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            id: entry.id,
            payload,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Decode the payload into a typed message
    pub fn parse<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.payload.clone())
    }

    /// Remove the message from the pending list
    ///
    /// Returns `false` when the store call fails. Acknowledging twice is
    /// harmless.
    pub async fn ack(&self) -> bool {
        match self.client.xack(&self.stream, &self.group, &self.id).await {
            Ok(acked) => {
                debug!(stream = %self.stream, group = %self.group, id = %self.id, acked = acked, "Message acknowledged");
                true
            }
            Err(e) => {
                warn!(stream = %self.stream, group = %self.group, id = %self.id, error = %e, "Message ack failed");
                false
            }
        }
    }
}
