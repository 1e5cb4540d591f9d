//! Incremental graph update from a batch of document chunks

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::progress::{ProgressCallback, ProgressEvent};
use super::{PipelineDeps, report_failure};
use crate::collab::{Chunk, DEFAULT_ENTITY_TYPES, Extraction, Extractor};
use crate::error::Result;
use crate::graph::{EdgeData, GraphStats, KnowledgeGraph, NodeData, merge, metrics};

/// One batch of chunks for a knowledge base
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub tenant_id: String,
    pub kb_id: String,
    pub chunks: Vec<Chunk>,
    pub language: String,
    pub entity_types: Vec<String>,
}

impl UpdateRequest {
    pub fn new(tenant_id: impl Into<String>, kb_id: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            kb_id: kb_id.into(),
            chunks,
            language: "English".to_string(),
            entity_types: DEFAULT_ENTITY_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_entity_types(mut self, entity_types: Vec<String>) -> Self {
        self.entity_types = entity_types;
        self
    }

    /// Distinct documents the chunks come from
    pub fn doc_ids(&self) -> BTreeSet<String> {
        self.chunks.iter().map(|c| c.doc_id.clone()).collect()
    }
}

/// Result of a successful update
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub stats: GraphStats,
    /// Size of the stored document-id set after the update
    pub documents: usize,
    /// Whether a previously stored graph was merged
    pub merged: bool,
    pub elapsed: Duration,
}

/// Build a graph from one extraction batch
///
/// A recurring entity overwrites the earlier one; a recurring relation
/// overwrites the earlier edge. Relation endpoints the batch never
/// described get an untyped node.
pub fn build_graph(extraction: &Extraction) -> Result<KnowledgeGraph> {
    let mut graph = KnowledgeGraph::new();

    for entity in &extraction.entities {
        let mut data = NodeData::new(entity.entity_type.clone())
            .with_description(entity.description.clone());
        data.source_id = entity.source_id.clone();
        graph.add_node(entity.name.clone(), data);
    }

    for relation in &extraction.relations {
        for endpoint in [&relation.from, &relation.to] {
            if !graph.contains_node(endpoint) {
                let mut data = NodeData::default();
                data.source_id = relation.source_id.clone();
                graph.add_node(endpoint.clone(), data);
            }
        }
        let mut data = EdgeData::new(relation.weight).with_description(relation.description.clone());
        data.keywords = relation.keywords.iter().cloned().collect();
        data.source_id = relation.source_id.clone();
        graph.add_edge(&relation.from, &relation.to, data)?;
    }

    Ok(graph)
}

/// Extract, then merge into the stored graph under the knowledge base's lock
pub struct GraphUpdatePipeline {
    deps: PipelineDeps,
    extractor: Arc<dyn Extractor>,
}

impl GraphUpdatePipeline {
    pub fn new(deps: PipelineDeps, extractor: Arc<dyn Extractor>) -> Self {
        Self { deps, extractor }
    }

    pub async fn run(
        &self,
        request: UpdateRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<UpdateOutcome> {
        let kb_id = request.kb_id.clone();
        let result = self.execute(request, progress.clone()).await;
        if let Err(e) = &result {
            report_failure("update", &kb_id, progress.as_ref(), e);
        }
        result
    }

    async fn execute(
        &self,
        request: UpdateRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<UpdateOutcome> {
        let started = Instant::now();
        let doc_ids = request.doc_ids();
        info!(
            kb_id = %request.kb_id,
            chunks = request.chunks.len(),
            documents = doc_ids.len(),
            extractor = self.extractor.name(),
            "Starting graph update"
        );

        let ctx = self
            .deps
            .context(&request.tenant_id, &request.kb_id, progress.clone());
        let extraction = self
            .extractor
            .extract(&request.chunks, &request.language, &request.entity_types, &ctx)
            .await?;
        info!(
            kb_id = %request.kb_id,
            entities = extraction.entities.len(),
            relations = extraction.relations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Extraction finished"
        );

        let fresh = build_graph(&extraction)?;
        ctx.report(ProgressEvent::message(format!(
            "Extracted {} entities and {} relations.",
            extraction.entities.len(),
            extraction.relations.len()
        )));

        let lock = self.deps.locks.lock_for(&request.kb_id);
        let request = &request;
        let (stats, documents, merged) = lock
            .scoped(move || async move { self.merge_and_persist(request, fresh, doc_ids).await })
            .await?;

        let elapsed = started.elapsed();
        info!(
            kb_id = %request.kb_id,
            nodes = stats.nodes,
            edges = stats.edges,
            documents,
            total_ms = elapsed.as_millis() as u64,
            "Graph update complete"
        );
        ctx.report(ProgressEvent::message(format!(
            "Knowledge graph updated: {}.",
            stats
        )));
        Ok(UpdateOutcome {
            stats,
            documents,
            merged,
            elapsed,
        })
    }

    /// Critical section: load, merge, recompute, save
    async fn merge_and_persist(
        &self,
        request: &UpdateRequest,
        fresh: KnowledgeGraph,
        mut doc_ids: BTreeSet<String>,
    ) -> Result<(GraphStats, usize, bool)> {
        let (tenant_id, kb_id) = (request.tenant_id.as_str(), request.kb_id.as_str());

        let fetch_started = Instant::now();
        let previous = self.deps.graphs.load(tenant_id, kb_id).await?;
        info!(
            kb_id = %kb_id,
            found = previous.is_some(),
            elapsed_ms = fetch_started.elapsed().as_millis() as u64,
            "Fetched stored graph"
        );

        let merged = previous.is_some();
        let mut graph = match previous {
            Some(snapshot) => {
                let merge_started = Instant::now();
                debug!(
                    kb_id = %kb_id,
                    old_nodes = snapshot.graph.node_count(),
                    old_edges = snapshot.graph.edge_count(),
                    new_nodes = fresh.node_count(),
                    new_edges = fresh.edge_count(),
                    "Merging graphs"
                );
                let graph = merge(snapshot.graph, fresh);
                doc_ids.extend(snapshot.doc_ids);
                info!(
                    kb_id = %kb_id,
                    nodes = graph.node_count(),
                    edges = graph.edge_count(),
                    elapsed_ms = merge_started.elapsed().as_millis() as u64,
                    "Merged with stored graph"
                );
                graph
            }
            None => fresh,
        };
        info!(kb_id = %kb_id, node_types = ?graph.type_distribution(), "Node type distribution");

        let rank_started = Instant::now();
        metrics::recompute(&mut graph, &self.deps.metrics);
        info!(
            kb_id = %kb_id,
            elapsed_ms = rank_started.elapsed().as_millis() as u64,
            "Recomputed rank and neighbour paths"
        );

        let save_started = Instant::now();
        self.deps
            .graphs
            .save(tenant_id, kb_id, &graph, &doc_ids)
            .await?;
        info!(
            kb_id = %kb_id,
            documents = doc_ids.len(),
            elapsed_ms = save_started.elapsed().as_millis() as u64,
            "Persisted graph"
        );

        Ok((graph.stats(), doc_ids.len(), merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{ExtractedEntity, ExtractedRelation};

    fn entity(name: &str, kind: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.into(),
            entity_type: kind.into(),
            description: String::new(),
            source_id: BTreeSet::new(),
        }
    }

    fn relation(from: &str, to: &str, weight: f64) -> ExtractedRelation {
        ExtractedRelation {
            from: from.into(),
            to: to.into(),
            weight,
            description: String::new(),
            keywords: vec!["k".into()],
            source_id: BTreeSet::new(),
        }
    }

    #[test]
    fn test_build_graph_overwrites_recurrences() {
        let extraction = Extraction {
            entities: vec![entity("A", "person"), entity("A", "executive"), entity("B", "org")],
            relations: vec![relation("A", "B", 1.0), relation("B", "A", 4.0)],
        };
        let graph = build_graph(&extraction).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.node("A").unwrap().entity_type, "executive");
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edge("A", "B").unwrap().weight, 4.0);
        assert!(graph.edge("A", "B").unwrap().keywords.contains("k"));
    }

    #[test]
    fn test_build_graph_adds_missing_endpoints() {
        let extraction = Extraction {
            entities: vec![entity("A", "person")],
            relations: vec![relation("A", "C", 1.0)],
        };
        let graph = build_graph(&extraction).unwrap();
        assert!(graph.contains_node("C"));
        assert_eq!(graph.node("C").unwrap().entity_type, "");
    }

    #[test]
    fn test_build_graph_rejects_negative_weight() {
        let extraction = Extraction {
            entities: vec![entity("A", "x"), entity("B", "x")],
            relations: vec![relation("A", "B", -1.0)],
        };
        let err = build_graph(&extraction).unwrap_err();
        assert_eq!(err.code(), "E400");
    }

    #[test]
    fn test_request_doc_ids() {
        let request = UpdateRequest::new(
            "t",
            "kb",
            vec![Chunk::new("d1", "a"), Chunk::new("d1", "b"), Chunk::new("d2", "c")],
        );
        assert_eq!(request.doc_ids().len(), 2);
        assert_eq!(request.entity_types.len(), DEFAULT_ENTITY_TYPES.len());
    }
}
