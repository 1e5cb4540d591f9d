//! Redis/Valkey store backend
//!
//! Regular commands share one multiplexed connection. Blocking group reads
//! open their own connection so a long `BLOCK` does not stall other callers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::streams::{
    StreamId as RedisStreamId, StreamInfoGroupsReply, StreamPendingCountReply, StreamRangeReply,
    StreamReadReply,
};
use ::redis::{Client, RedisError, Script, Value};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    GroupInfo, KeyTtl, PendingEntry, StoreBackend, StoreError, StoreResult, StreamEntry,
};

/// Deletes KEYS[1] only when it still holds ARGV[1]
const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

fn score_bound(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

fn classify(e: RedisError, key: &str, group: Option<&str>) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        return StoreError::Transport(e.to_string());
    }
    match e.code() {
        Some("NOGROUP") => StoreError::NoSuchGroup {
            stream: key.to_string(),
            group: group.unwrap_or_default().to_string(),
        },
        Some("BUSYGROUP") => StoreError::GroupExists {
            stream: key.to_string(),
            group: group.unwrap_or_default().to_string(),
        },
        Some("WRONGTYPE") => StoreError::WrongType(key.to_string()),
        _ if e.to_string().to_lowercase().contains("no such key") => {
            StoreError::NoSuchKey(key.to_string())
        }
        _ => StoreError::Command(e.to_string()),
    }
}

fn field_map(id: RedisStreamId) -> StoreResult<StreamEntry> {
    let mut fields = BTreeMap::new();
    for (name, value) in id.map {
        let value: String = ::redis::from_redis_value(&value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        fields.insert(name, value);
    }
    Ok(StreamEntry { id: id.id, fields })
}

/// Store backend talking to a Redis-compatible server
pub struct RedisStore {
    client: Client,
    conn: RwLock<Option<MultiplexedConnection>>,
    connected: AtomicBool,
}

impl RedisStore {
    /// Open a client for `host:port` and establish the shared connection
    pub async fn connect(host: &str, db: u32, password: Option<&str>) -> StoreResult<Self> {
        let url = match password {
            Some(pw) => format!("redis://:{}@{}/{}", pw, host, db),
            None => format!("redis://{}/{}", host, db),
        };
        let client = Client::open(url).map_err(|e| StoreError::Command(e.to_string()))?;
        let store = Self {
            client,
            conn: RwLock::new(None),
            connected: AtomicBool::new(false),
        };
        store.reconnect().await?;
        info!(host = %host, db = db, "Redis store ready");
        Ok(store)
    }

    async fn conn(&self) -> StoreResult<MultiplexedConnection> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| StoreError::Transport("not connected".to_string()))
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> StoreResult<()> {
        let mut slot = self.conn.write().await;
        *slot = None;
        self.connected.store(false, Ordering::SeqCst);
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        *slot = Some(conn);
        self.connected.store(true, Ordering::SeqCst);
        debug!("Redis connection established");
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, "", None))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))
    }

    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(expiry) = expiry {
            cmd.arg("PX").arg(expiry.as_millis() as u64);
        }
        let _: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, expiry: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(expiry.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = ::redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))?;
        Ok(removed == 1)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let found: u64 = ::redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))?;
        Ok(found > 0)
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut conn = self.conn().await?;
        let ms: i64 = ::redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))?;
        Ok(match ms {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(ms.max(0) as u64),
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let added: u64 = ::redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = ::redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        let mut conn = self.conn().await?;
        ::redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let added: u64 = ::redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))?;
        Ok(added > 0)
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        ::redis::cmd("ZCOUNT")
            .arg(key)
            .arg(score_bound(min))
            .arg(score_bound(max))
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))
    }

    async fn zpopmin(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
        let mut conn = self.conn().await?;
        ::redis::cmd("ZPOPMIN")
            .arg(key)
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        ::redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(score_bound(min))
            .arg(score_bound(max))
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, key, None))
    }

    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> StoreResult<String> {
        let mut conn = self.conn().await?;
        let mut cmd = ::redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (name, value) in fields {
            cmd.arg(name).arg(value);
        }
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, None))
    }

    async fn xgroup_create(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
        mkstream: bool,
    ) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let mut cmd = ::redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(stream).arg(group).arg(start_id);
        if mkstream {
            cmd.arg("MKSTREAM");
        }
        let _: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, Some(group)))?;
        Ok(())
    }

    async fn xinfo_groups(&self, stream: &str) -> StoreResult<Vec<GroupInfo>> {
        let mut conn = self.conn().await?;
        let reply: StreamInfoGroupsReply = ::redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, None))?;
        Ok(reply
            .groups
            .into_iter()
            .map(|g| GroupInfo {
                name: g.name,
                consumers: g.consumers as u64,
                pending: g.pending as u64,
                last_delivered_id: g.last_delivered_id,
            })
            .collect())
    }

    async fn xreadgroup(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        count: usize,
        block: Option<Duration>,
    ) -> StoreResult<Vec<StreamEntry>> {
        let mut conn = match block {
            Some(_) => self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?,
            None => self.conn().await?,
        };
        let mut cmd = ::redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count.max(1));
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(stream).arg(">");

        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, Some(group)))?;
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        reply
            .keys
            .into_iter()
            .flat_map(|k| k.ids)
            .map(field_map)
            .collect()
    }

    async fn xack(&self, stream: &str, group: &str, id: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        ::redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, Some(group)))
    }

    async fn xpending_range(
        &self,
        stream: &str,
        group: &str,
        min: &str,
        max: &str,
        count: usize,
        consumer: Option<&str>,
    ) -> StoreResult<Vec<PendingEntry>> {
        let mut conn = self.conn().await?;
        let mut cmd = ::redis::cmd("XPENDING");
        cmd.arg(stream).arg(group).arg(min).arg(max).arg(count);
        if let Some(consumer) = consumer {
            cmd.arg(consumer);
        }
        let reply: StreamPendingCountReply = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, Some(group)))?;
        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                id: p.id,
                consumer: p.consumer,
                idle: Duration::from_millis(p.last_delivered_ms as u64),
                deliveries: p.times_delivered as u64,
            })
            .collect())
    }

    async fn xrange(
        &self,
        stream: &str,
        min: &str,
        max: &str,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>> {
        let mut conn = self.conn().await?;
        let reply: StreamRangeReply = ::redis::cmd("XRANGE")
            .arg(stream)
            .arg(min)
            .arg(max)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(e, stream, None))?;
        reply.ids.into_iter().map(field_map).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        assert_eq!(score_bound(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_bound(f64::INFINITY), "+inf");
        assert_eq!(score_bound(1.5), "1.5");
    }
}
