//! Search index fed with graph-derived records

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// Index holding a tenant's records
pub fn index_name(tenant_id: &str) -> String {
    format!("kgsync_{}", tenant_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Entity,
    Relation,
    CommunityReport,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity => write!(f, "entity"),
            Self::Relation => write!(f, "relation"),
            Self::CommunityReport => write!(f, "community_report"),
        }
    }
}

/// One indexed record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub kb_id: String,
    pub kind: RecordKind,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl IndexRecord {
    pub fn new(id: impl Into<String>, kb_id: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            id: id.into(),
            kb_id: kb_id.into(),
            kind,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// String values of a field, whether stored as a string or an array
    fn field_strings(&self, name: &str) -> Vec<&str> {
        match self.fields.get(name) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Selects records of a knowledge base
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFilter {
    pub kb_id: String,
    pub kind: Option<RecordKind>,
    /// Field whose value must be one of the given strings
    pub field: Option<(String, BTreeSet<String>)>,
}

impl IndexFilter {
    pub fn new(kb_id: impl Into<String>) -> Self {
        Self {
            kb_id: kb_id.into(),
            kind: None,
            field: None,
        }
    }

    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn field_in<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field = Some((field.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn matches(&self, record: &IndexRecord) -> bool {
        if record.kb_id != self.kb_id {
            return false;
        }
        if self.kind.is_some_and(|k| k != record.kind) {
            return false;
        }
        match &self.field {
            Some((name, values)) => record
                .field_strings(name)
                .into_iter()
                .any(|v| values.contains(v)),
            None => true,
        }
    }
}

/// Document index operations used by the pipelines
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Delete matching records; returns how many were removed
    async fn delete(&self, filter: &IndexFilter, index: &str) -> Result<u64>;

    /// Insert records, replacing any with the same id
    async fn insert(&self, records: Vec<IndexRecord>, index: &str) -> Result<()>;
}

/// In-process index
#[derive(Debug, Default)]
pub struct MemoryIndex {
    indices: RwLock<HashMap<String, BTreeMap<String, IndexRecord>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of an index matching `filter`, ordered by id
    pub async fn search(&self, filter: &IndexFilter, index: &str) -> Vec<IndexRecord> {
        let indices = self.indices.read().await;
        indices
            .get(index)
            .map(|records| {
                records
                    .values()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn len(&self, index: &str) -> usize {
        self.indices.read().await.get(index).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    async fn delete(&self, filter: &IndexFilter, index: &str) -> Result<u64> {
        let mut indices = self.indices.write().await;
        let Some(records) = indices.get_mut(index) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|_, r| !filter.matches(r));
        let removed = (before - records.len()) as u64;
        debug!(index = %index, kb_id = %filter.kb_id, removed, "Deleted index records");
        Ok(removed)
    }

    async fn insert(&self, records: Vec<IndexRecord>, index: &str) -> Result<()> {
        let mut indices = self.indices.write().await;
        let target = indices.entry(index.to_string()).or_default();
        let count = records.len();
        for record in records {
            target.insert(record.id.clone(), record);
        }
        debug!(index = %index, count, "Inserted index records");
        Ok(())
    }
}
