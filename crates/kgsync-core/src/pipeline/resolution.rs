//! Entity resolution over the stored graph

use std::sync::Arc;

use tracing::{error, info, warn};

use super::progress::{ProgressCallback, ProgressEvent};
use super::{PipelineDeps, report_failure};
use crate::collab::{CollabContext, EntityResolver, IndexFilter, RecordKind, index_name};
use crate::error::Result;
use crate::graph::{GraphStats, metrics};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutcome {
    pub removed_entities: Vec<String>,
    pub stats: GraphStats,
    /// Index records dropped for the removed entities
    pub index_records_deleted: u64,
}

pub struct ResolutionPipeline {
    deps: PipelineDeps,
    resolver: Arc<dyn EntityResolver>,
}

impl ResolutionPipeline {
    pub fn new(deps: PipelineDeps, resolver: Arc<dyn EntityResolver>) -> Self {
        Self { deps, resolver }
    }

    /// Resolve duplicates in the stored graph
    ///
    /// `Ok(None)` when there is no stored graph (or it has no nodes); the
    /// failure is reported on the progress callback and nothing is written.
    pub async fn run(
        &self,
        tenant_id: &str,
        kb_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Option<ResolutionOutcome>> {
        let result = self.execute(tenant_id, kb_id, progress.clone()).await;
        if let Err(e) = &result {
            report_failure("resolution", kb_id, progress.as_ref(), e);
        }
        result
    }

    async fn execute(
        &self,
        tenant_id: &str,
        kb_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Option<ResolutionOutcome>> {
        let ctx = self.deps.context(tenant_id, kb_id, progress);
        let lock = self.deps.locks.lock_for(kb_id);
        let ctx_ref = &ctx;
        let resolved = lock
            .scoped(move || async move { self.resolve_locked(ctx_ref).await })
            .await?;

        let Some((removed_entities, stats)) = resolved else {
            return Ok(None);
        };

        let index_records_deleted = if removed_entities.is_empty() {
            0
        } else {
            self.cleanup_index(tenant_id, kb_id, &removed_entities)
                .await?
        };

        Ok(Some(ResolutionOutcome {
            removed_entities,
            stats,
            index_records_deleted,
        }))
    }

    async fn resolve_locked(&self, ctx: &CollabContext) -> Result<Option<(Vec<String>, GraphStats)>> {
        let (tenant_id, kb_id) = (ctx.tenant_id.as_str(), ctx.kb_id.as_str());
        let snapshot = self
            .deps
            .graphs
            .load(tenant_id, kb_id)
            .await?
            .filter(|s| !s.graph.is_empty());
        let Some(snapshot) = snapshot else {
            error!(kb_id = %kb_id, "Failed to fetch the graph");
            ctx.report(ProgressEvent::fetch_failed("Failed to fetch the graph."));
            return Ok(None);
        };
        ctx.report(ProgressEvent::message("Fetch the existing graph."));

        let resolution = self.resolver.resolve(snapshot.graph, ctx).await?;
        let removed = resolution.removed_entities;
        let message = format!("Graph resolution is done. Remove {} nodes.", removed.len());
        info!(kb_id = %kb_id, resolver = self.resolver.name(), removed = removed.len(), "{}", message);
        ctx.report(ProgressEvent::message(message));

        let mut graph = resolution.graph;
        metrics::recompute(&mut graph, &self.deps.metrics);
        self.deps
            .graphs
            .save(tenant_id, kb_id, &graph, &snapshot.doc_ids)
            .await?;
        Ok(Some((removed, graph.stats())))
    }

    /// Drop index records that reference removed entities
    ///
    /// Runs after the lock is released and is not atomic with the graph
    /// save; a failure here leaves stale records behind.
    async fn cleanup_index(&self, tenant_id: &str, kb_id: &str, removed: &[String]) -> Result<u64> {
        let index = index_name(tenant_id);
        let filters = [
            IndexFilter::new(kb_id)
                .kind(RecordKind::Relation)
                .field_in("from_entity", removed.iter().cloned()),
            IndexFilter::new(kb_id)
                .kind(RecordKind::Relation)
                .field_in("to_entity", removed.iter().cloned()),
            IndexFilter::new(kb_id)
                .kind(RecordKind::Entity)
                .field_in("entity", removed.iter().cloned()),
        ];

        let mut deleted = 0;
        for filter in &filters {
            match self.deps.index.delete(filter, &index).await {
                Ok(n) => deleted += n,
                Err(e) => {
                    warn!(kb_id = %kb_id, index = %index, error = %e, "Index cleanup failed after graph save");
                    return Err(e);
                }
            }
        }
        info!(kb_id = %kb_id, removed = removed.len(), deleted, "Cleaned index records of removed entities");
        Ok(deleted)
    }
}
