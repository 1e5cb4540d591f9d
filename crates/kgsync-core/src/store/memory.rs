//! In-process store backend
//!
//! Implements the full [`StoreBackend`] contract against a single mutex-
//! guarded keyspace, so every operation (including compare-and-delete and
//! consumer-group delivery) is atomic with respect to the others.
//!
//! Expiry uses the tokio clock, which keeps TTL behaviour testable under
//! `tokio::time::pause`. The store can be switched offline to exercise the
//! client's transport-failure handling.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use super::{
    GroupInfo, KeyTtl, PendingEntry, StoreBackend, StoreError, StoreResult, StreamEntry, StreamId,
};

#[derive(Debug)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
    ZSet(HashMap<String, f64>),
    Stream(Stream),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Stream {
    entries: BTreeMap<StreamId, BTreeMap<String, String>>,
    last_id: StreamId,
    groups: BTreeMap<String, ConsumerGroup>,
}

impl Stream {
    fn next_id(&self) -> StreamId {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if now_ms > self.last_id.ms {
            StreamId::new(now_ms, 0)
        } else {
            StreamId::new(self.last_id.ms, self.last_id.seq + 1)
        }
    }
}

#[derive(Debug)]
struct ConsumerGroup {
    last_delivered: StreamId,
    pending: BTreeMap<StreamId, PendingMeta>,
    consumers: BTreeSet<String>,
}

#[derive(Debug)]
struct PendingMeta {
    consumer: String,
    delivered_at: Instant,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// Drop the key if its expiry has passed
    fn purge(&mut self, key: &str, now: Instant) {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        self.purge(key, now);
        self.entries.get_mut(key)
    }

    fn string(&mut self, key: &str, now: Instant) -> StoreResult<Option<&String>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set(&mut self, key: &str, now: Instant) -> StoreResult<Option<&mut BTreeSet<String>>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set_or_insert(&mut self, key: &str, now: Instant) -> StoreResult<&mut BTreeSet<String>> {
        self.purge(key, now);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new())));
        match &mut entry.value {
            Value::Set(s) => Ok(s),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn zset(&mut self, key: &str, now: Instant) -> StoreResult<Option<&mut HashMap<String, f64>>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::ZSet(z),
                ..
            }) => Ok(Some(z)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn zset_or_insert(
        &mut self,
        key: &str,
        now: Instant,
    ) -> StoreResult<&mut HashMap<String, f64>> {
        self.purge(key, now);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::ZSet(HashMap::new())));
        match &mut entry.value {
            Value::ZSet(z) => Ok(z),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn stream(&mut self, key: &str, now: Instant) -> StoreResult<Option<&mut Stream>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Stream(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn stream_or_insert(&mut self, key: &str, now: Instant) -> StoreResult<&mut Stream> {
        self.purge(key, now);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Stream(Stream::default())));
        match &mut entry.value {
            Value::Stream(s) => Ok(s),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// Remove a collection key once its last member is gone
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|e| &e.value) {
            Some(Value::Set(s)) => s.is_empty(),
            Some(Value::ZSet(z)) => z.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }
}

fn sorted_by_score(zset: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

/// In-process key-value store
#[derive(Debug)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    /// Wakes blocked group readers when an entry is appended
    appended: Notify,
    offline: AtomicBool,
    connected: AtomicBool,
    reconnects: AtomicU32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, connected store
    pub fn new() -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::default()),
            appended: Notify::new(),
            offline: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            reconnects: AtomicU32::new(0),
        }
    }

    /// Simulate the store becoming unreachable (or reachable again)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        self.connected.store(!offline, Ordering::SeqCst);
    }

    /// Number of reconnect attempts made against this store
    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Transport("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> StoreResult<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_online()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        Ok(ks.string(key, Instant::now())?.cloned())
    }

    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> StoreResult<()> {
        self.check_online()?;
        let now = Instant::now();
        let mut ks = self.keyspace.lock().await;
        ks.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: expiry.map(|d| now + d),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, expiry: Duration) -> StoreResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let mut ks = self.keyspace.lock().await;
        ks.purge(key, now);
        if ks.entries.contains_key(key) {
            return Ok(false);
        }
        ks.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(now + expiry),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        ks.purge(key, Instant::now());
        Ok(ks.entries.remove(key).is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        let matches = ks.string(key, Instant::now())?.is_some_and(|v| v == expected);
        if matches {
            ks.entries.remove(key);
        }
        Ok(matches)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        Ok(ks.live(key, Instant::now()).is_some())
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.check_online()?;
        let now = Instant::now();
        let mut ks = self.keyspace.lock().await;
        Ok(match ks.live(key, now) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now).as_millis() as u64),
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        Ok(ks
            .set_or_insert(key, Instant::now())?
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        let removed = match ks.set(key, Instant::now())? {
            Some(set) => set.remove(member),
            None => false,
        };
        ks.drop_if_empty(key);
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        Ok(ks.set(key, Instant::now())?.cloned().unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        Ok(ks
            .zset_or_insert(key, Instant::now())?
            .insert(member.to_string(), score)
            .is_none())
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        Ok(match ks.zset(key, Instant::now())? {
            Some(z) => z.values().filter(|s| **s >= min && **s <= max).count() as u64,
            None => 0,
        })
    }

    async fn zpopmin(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        let popped = match ks.zset(key, Instant::now())? {
            Some(z) => {
                let popped: Vec<(String, f64)> =
                    sorted_by_score(z).into_iter().take(count).collect();
                for (member, _) in &popped {
                    z.remove(member);
                }
                popped
            }
            None => Vec::new(),
        };
        ks.drop_if_empty(key);
        Ok(popped)
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        Ok(match ks.zset(key, Instant::now())? {
            Some(z) => sorted_by_score(z)
                .into_iter()
                .filter(|(_, s)| *s >= min && *s <= max)
                .map(|(m, _)| m)
                .collect(),
            None => Vec::new(),
        })
    }

    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> StoreResult<String> {
        self.check_online()?;
        let id = {
            let mut ks = self.keyspace.lock().await;
            let s = ks.stream_or_insert(stream, Instant::now())?;
            let id = s.next_id();
            s.entries.insert(id, fields.iter().cloned().collect());
            s.last_id = id;
            id
        };
        self.appended.notify_waiters();
        Ok(id.to_string())
    }

    async fn xgroup_create(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
        mkstream: bool,
    ) -> StoreResult<()> {
        self.check_online()?;
        let now = Instant::now();
        let mut ks = self.keyspace.lock().await;
        let s = if mkstream {
            ks.stream_or_insert(stream, now)?
        } else {
            ks.stream(stream, now)?
                .ok_or_else(|| StoreError::NoSuchKey(stream.to_string()))?
        };
        if s.groups.contains_key(group) {
            return Err(StoreError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }
        let last_delivered = match start_id {
            "$" => s.last_id,
            other => StreamId::parse_bound(other, false)?,
        };
        s.groups.insert(
            group.to_string(),
            ConsumerGroup {
                last_delivered,
                pending: BTreeMap::new(),
                consumers: BTreeSet::new(),
            },
        );
        debug!(stream = %stream, group = %group, start = %last_delivered, "Consumer group created");
        Ok(())
    }

    async fn xinfo_groups(&self, stream: &str) -> StoreResult<Vec<GroupInfo>> {
        self.check_online()?;
        let mut ks = self.keyspace.lock().await;
        let s = ks
            .stream(stream, Instant::now())?
            .ok_or_else(|| StoreError::NoSuchKey(stream.to_string()))?;
        Ok(s.groups
            .iter()
            .map(|(name, g)| GroupInfo {
                name: name.clone(),
                consumers: g.consumers.len() as u64,
                pending: g.pending.len() as u64,
                last_delivered_id: g.last_delivered.to_string(),
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
        let limit = if count == 0 { usize::MAX } else { count };
        let deadline = block.filter(|d| !d.is_zero()).map(|d| Instant::now() + d);

        loop {
            // Registered before checking so an append between the check
            // and the wait is not missed
            let notified = self.appended.notified();
            self.check_online()?;
            {
                let now = Instant::now();
                let mut ks = self.keyspace.lock().await;
                let s = ks
                    .stream(stream, now)?
                    .ok_or_else(|| StoreError::NoSuchKey(stream.to_string()))?;
                let Stream {
                    entries, groups, ..
                } = s;
                let g = groups
                    .get_mut(group)
                    .ok_or_else(|| StoreError::NoSuchGroup {
                        stream: stream.to_string(),
                        group: group.to_string(),
                    })?;
                g.consumers.insert(consumer.to_string());

                let delivered: Vec<StreamEntry> = entries
                    .range((Excluded(g.last_delivered), Unbounded))
                    .take(limit)
                    .map(|(id, fields)| StreamEntry {
                        id: id.to_string(),
                        fields: fields.clone(),
                    })
                    .collect();

                if !delivered.is_empty() {
                    for entry in &delivered {
                        let id: StreamId = entry.id.parse()?;
                        g.pending.insert(
                            id,
                            PendingMeta {
                                consumer: consumer.to_string(),
                                delivered_at: now,
                                deliveries: 1,
                            },
                        );
                        g.last_delivered = id;
                    }
                    return Ok(delivered);
                }
            }

            match (block, deadline) {
                (None, _) => return Ok(Vec::new()),
                (Some(_), None) => notified.await,
                (Some(_), Some(deadline)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || tokio::time::timeout(remaining, notified).await.is_err()
                    {
                        return Ok(Vec::new());
                    }
                }
            }
        }
    }

    async fn xack(&self, stream: &str, group: &str, id: &str) -> StoreResult<u64> {
        self.check_online()?;
        let id: StreamId = id.parse()?;
        let mut ks = self.keyspace.lock().await;
        let Some(s) = ks.stream(stream, Instant::now())? else {
            return Ok(0);
        };
        Ok(match s.groups.get_mut(group) {
            Some(g) => u64::from(g.pending.remove(&id).is_some()),
            None => 0,
        })
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
        self.check_online()?;
        let lower = StreamId::parse_bound(min, false)?;
        let upper = StreamId::parse_bound(max, true)?;
        let now = Instant::now();
        let mut ks = self.keyspace.lock().await;
        let s = ks
            .stream(stream, now)?
            .ok_or_else(|| StoreError::NoSuchKey(stream.to_string()))?;
        let g = s.groups.get(group).ok_or_else(|| StoreError::NoSuchGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        })?;
        if lower > upper {
            return Ok(Vec::new());
        }
        Ok(g.pending
            .range(lower..=upper)
            .filter(|(_, meta)| consumer.is_none_or(|c| c == meta.consumer))
            .take(count)
            .map(|(id, meta)| PendingEntry {
                id: id.to_string(),
                consumer: meta.consumer.clone(),
                idle: now.saturating_duration_since(meta.delivered_at),
                deliveries: meta.deliveries,
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
        self.check_online()?;
        let lower = StreamId::parse_bound(min, false)?;
        let upper = StreamId::parse_bound(max, true)?;
        let mut ks = self.keyspace.lock().await;
        let Some(s) = ks.stream(stream, Instant::now())? else {
            return Ok(Vec::new());
        };
        if lower > upper {
            return Ok(Vec::new());
        }
        Ok(s.entries
            .range(lower..=upper)
            .take(count)
            .map(|(id, fields)| StreamEntry {
                id: id.to_string(),
                fields: fields.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(msg: &str) -> Vec<(String, String)> {
        vec![("message".to_string(), msg.to_string())]
    }

    #[tokio::test(start_paused = true)]
    async fn test_string_expiry() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Expires(5000));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_respects_expiry() {
        let store = MemoryStore::new();
        assert!(store.set_nx("lock", "a", Duration::from_secs(1)).await.unwrap());
        assert!(!store.set_nx("lock", "b", Duration::from_secs(1)).await.unwrap());

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(store.set_nx("lock", "b", Duration::from_secs(1)).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = MemoryStore::new();
        store.set("k", "mine", None).await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Persistent);

        assert!(!store.compare_and_delete("k", "theirs").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("mine".to_string()));

        assert!(store.compare_and_delete("k", "mine").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
        assert!(!store.compare_and_delete("k", "mine").await.unwrap());
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::new();
        assert!(store.sadd("s", "a").await.unwrap());
        assert!(!store.sadd("s", "a").await.unwrap());
        store.sadd("s", "b").await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap().len(), 2);

        assert!(store.srem("s", "a").await.unwrap());
        assert!(store.srem("s", "b").await.unwrap());
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_set_ordering() {
        let store = MemoryStore::new();
        store.zadd("z", "late", 30.0).await.unwrap();
        store.zadd("z", "early", 10.0).await.unwrap();
        store.zadd("z", "mid", 20.0).await.unwrap();

        assert_eq!(store.zcount("z", 10.0, 20.0).await.unwrap(), 2);
        assert_eq!(
            store.zrangebyscore("z", f64::NEG_INFINITY, 25.0).await.unwrap(),
            vec!["early".to_string(), "mid".to_string()]
        );

        let popped = store.zpopmin("z", 2).await.unwrap();
        assert_eq!(popped[0], ("early".to_string(), 10.0));
        assert_eq!(popped[1], ("mid".to_string(), 20.0));
        assert_eq!(store.zcount("z", f64::NEG_INFINITY, f64::INFINITY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert!(matches!(
            store.sadd("k", "m").await,
            Err(StoreError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_group_delivery_and_ack() {
        let store = MemoryStore::new();
        let first = store.xadd("q", &fields("1")).await.unwrap();
        let second = store.xadd("q", &fields("2")).await.unwrap();
        assert!(first.parse::<StreamId>().unwrap() < second.parse::<StreamId>().unwrap());

        store.xgroup_create("q", "g", "0", true).await.unwrap();
        assert!(matches!(
            store.xgroup_create("q", "g", "0", true).await,
            Err(StoreError::GroupExists { .. })
        ));

        let read = store.xreadgroup("g", "c1", "q", 1, None).await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].id, first);

        let pending = store
            .xpending_range("q", "g", "-", "+", 10, Some("c1"))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first);
        assert!(
            store
                .xpending_range("q", "g", "-", "+", 10, Some("c2"))
                .await
                .unwrap()
                .is_empty()
        );

        assert_eq!(store.xack("q", "g", &first).await.unwrap(), 1);
        assert_eq!(store.xack("q", "g", &first).await.unwrap(), 0);

        let info = store.xinfo_groups("q").await.unwrap();
        assert_eq!(info[0].pending, 0);
        assert_eq!(info[0].consumers, 1);
        assert_eq!(info[0].last_delivered_id, first);
    }

    #[tokio::test]
    async fn test_missing_stream_and_group() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.xinfo_groups("nope").await,
            Err(StoreError::NoSuchKey(_))
        ));
        store.xadd("q", &fields("1")).await.unwrap();
        assert!(matches!(
            store.xreadgroup("g", "c", "q", 1, None).await,
            Err(StoreError::NoSuchGroup { .. })
        ));
        assert!(store.xrange("nope", "-", "+", 1).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_read_times_out() {
        let store = MemoryStore::new();
        store.xgroup_create("q", "g", "0", true).await.unwrap();
        let read = store
            .xreadgroup("g", "c", "q", 1, Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_read_wakes_on_append() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.xgroup_create("q", "g", "$", true).await.unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .xreadgroup("g", "c", "q", 1, Some(Duration::from_secs(30)))
                    .await
            })
        };
        tokio::task::yield_now().await;
        store.xadd("q", &fields("hello")).await.unwrap();

        let read = reader.await.unwrap().unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].fields["message"], "hello");
    }

    #[tokio::test]
    async fn test_offline_and_reconnect() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(!store.is_connected());
        assert!(store.get("k").await.unwrap_err().is_transport());
        assert!(store.reconnect().await.is_err());

        store.set_offline(false);
        assert!(store.is_connected());
        store.reconnect().await.unwrap();
        assert!(store.is_connected());
        assert_eq!(store.reconnect_count(), 2);
    }
}
