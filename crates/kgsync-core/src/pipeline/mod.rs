//! Graph pipelines run under the per-knowledge-base lock
//!
//! - [`GraphUpdatePipeline`]: extract, merge into the stored graph, recompute
//!   metrics, persist
//! - [`ResolutionPipeline`]: collapse duplicate entities, then drop index
//!   records that point at removed entities
//! - [`CommunityPipeline`]: detect communities and index one report each
//!
//! All read-modify-write work on a knowledge base's graph happens while its
//! lock is held. Index maintenance runs after release.

pub mod community;
pub mod progress;
pub mod resolution;
pub mod update;

use std::sync::Arc;

use tracing::error;

pub use community::{CommunityOutcome, CommunityPipeline};
pub use progress::{FETCH_FAILED, PIPELINE_FAILED, ProgressCallback, ProgressEvent, ProgressLog};
pub use resolution::{ResolutionOutcome, ResolutionPipeline};
pub use update::{GraphUpdatePipeline, UpdateOutcome, UpdateRequest, build_graph};

use crate::collab::{CollabContext, DocumentIndex, Embedder, MemoryIndex, SimpleTokenizer, Tokenizer};
use crate::error::Error;
use crate::graph::{GraphStore, KvGraphStore, MetricsConfig};
use crate::lock::LockManager;
use crate::store::KvClient;

/// Services shared by every pipeline
#[derive(Clone)]
pub struct PipelineDeps {
    pub locks: LockManager,
    pub graphs: Arc<dyn GraphStore>,
    pub index: Arc<dyn DocumentIndex>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub metrics: MetricsConfig,
    pub embedder: Option<Arc<dyn Embedder>>,
}

impl PipelineDeps {
    pub fn new(
        locks: LockManager,
        graphs: Arc<dyn GraphStore>,
        index: Arc<dyn DocumentIndex>,
    ) -> Self {
        Self {
            locks,
            graphs,
            index,
            tokenizer: Arc::new(SimpleTokenizer),
            metrics: MetricsConfig::default(),
            embedder: None,
        }
    }

    /// Graph on the store, in-process index, default lock settings
    pub fn on_store(client: KvClient) -> Self {
        Self::new(
            LockManager::with_defaults(client.clone()),
            Arc::new(KvGraphStore::new(client)),
            Arc::new(MemoryIndex::new()),
        )
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub(crate) fn context(
        &self,
        tenant_id: &str,
        kb_id: &str,
        progress: Option<ProgressCallback>,
    ) -> CollabContext {
        CollabContext::new(tenant_id, kb_id)
            .with_embedder(self.embedder.clone())
            .with_progress(progress)
    }
}

/// Log a failed run and surface it on the progress callback
pub(crate) fn report_failure(
    pipeline: &str,
    kb_id: &str,
    progress: Option<&ProgressCallback>,
    err: &Error,
) {
    error!(pipeline, kb_id = %kb_id, code = err.code(), error = %err, "Pipeline failed");
    progress::notify(
        progress,
        ProgressEvent::error(PIPELINE_FAILED, format!("[{}] {}", err.code(), err)),
    );
}
