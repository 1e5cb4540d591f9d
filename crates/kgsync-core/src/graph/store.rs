//! Persistence of a knowledge base's graph and its document-id set

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::model::KnowledgeGraph;
use crate::error::Result;
use crate::store::KvClient;

/// A persisted graph together with the documents it was built from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSnapshot {
    pub graph: KnowledgeGraph,
    pub doc_ids: BTreeSet<String>,
}

/// Load/save of the graph keyed by tenant and knowledge base
///
/// The document-id set only grows: `save` unions the given ids into what
/// is already recorded.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// `None` when nothing has been persisted yet
    async fn load(&self, tenant_id: &str, kb_id: &str) -> Result<Option<GraphSnapshot>>;

    async fn save(
        &self,
        tenant_id: &str,
        kb_id: &str,
        graph: &KnowledgeGraph,
        doc_ids: &BTreeSet<String>,
    ) -> Result<()>;
}

/// In-process graph store
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graphs: RwLock<HashMap<(String, String), GraphSnapshot>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn load(&self, tenant_id: &str, kb_id: &str) -> Result<Option<GraphSnapshot>> {
        let graphs = self.graphs.read().await;
        Ok(graphs
            .get(&(tenant_id.to_string(), kb_id.to_string()))
            .cloned())
    }

    async fn save(
        &self,
        tenant_id: &str,
        kb_id: &str,
        graph: &KnowledgeGraph,
        doc_ids: &BTreeSet<String>,
    ) -> Result<()> {
        let mut graphs = self.graphs.write().await;
        let entry = graphs
            .entry((tenant_id.to_string(), kb_id.to_string()))
            .or_default();
        entry.graph = graph.clone();
        entry.doc_ids.extend(doc_ids.iter().cloned());
        Ok(())
    }
}

/// Graph store on the shared key-value store
///
/// The graph is one JSON node-link value; document ids live in a set next
/// to it.
#[derive(Debug, Clone)]
pub struct KvGraphStore {
    client: KvClient,
}

impl KvGraphStore {
    pub fn new(client: KvClient) -> Self {
        Self { client }
    }

    pub fn graph_key(tenant_id: &str, kb_id: &str) -> String {
        format!("kgsync:graph:{}:{}", tenant_id, kb_id)
    }

    pub fn docs_key(tenant_id: &str, kb_id: &str) -> String {
        format!("kgsync:graph:{}:{}:docs", tenant_id, kb_id)
    }
}

#[async_trait]
impl GraphStore for KvGraphStore {
    async fn load(&self, tenant_id: &str, kb_id: &str) -> Result<Option<GraphSnapshot>> {
        let key = Self::graph_key(tenant_id, kb_id);
        let Some(graph) = self.client.get_obj::<KnowledgeGraph>(&key).await? else {
            return Ok(None);
        };
        let doc_ids = self
            .client
            .smembers(&Self::docs_key(tenant_id, kb_id))
            .await?;
        debug!(key = %key, nodes = graph.node_count(), edges = graph.edge_count(), docs = doc_ids.len(), "Graph loaded");
        Ok(Some(GraphSnapshot { graph, doc_ids }))
    }

    async fn save(
        &self,
        tenant_id: &str,
        kb_id: &str,
        graph: &KnowledgeGraph,
        doc_ids: &BTreeSet<String>,
    ) -> Result<()> {
        let key = Self::graph_key(tenant_id, kb_id);
        self.client.set_obj(&key, graph, None).await?;
        let docs_key = Self::docs_key(tenant_id, kb_id);
        for doc_id in doc_ids {
            self.client.sadd(&docs_key, doc_id).await?;
        }
        debug!(key = %key, nodes = graph.node_count(), docs = doc_ids.len(), "Graph saved");
        Ok(())
    }
}
