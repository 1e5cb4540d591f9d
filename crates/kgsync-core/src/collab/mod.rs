//! External collaborators plugged into the graph pipelines
//!
//! The pipelines own locking, merging, metrics and persistence. Everything
//! model-driven sits behind the traits here:
//!
//! - [`Extractor`]: chunks of text to entities and relations
//! - [`EntityResolver`]: collapses duplicate entities in a graph
//! - [`CommunityReporter`]: groups entities and writes a report per group
//! - [`DocumentIndex`]: the search index fed with entity, relation and
//!   community records
//! - [`Tokenizer`] and [`Embedder`]: text services used while indexing
//!
//! Each trait ships with a small deterministic implementation used by the
//! CLI and tests.

mod community;
mod extract;
mod index;
mod resolve;
mod text;

use std::fmt;
use std::sync::Arc;

pub use community::{
    CommunityReport, CommunityReporter, CommunityStructure, ComponentReporter, Finding,
    node_communities,
};
pub use extract::{
    Chunk, DEFAULT_ENTITY_TYPES, ExtractedEntity, ExtractedRelation, Extraction, Extractor,
    PrecomputedExtractor,
};
pub use index::{DocumentIndex, IndexFilter, IndexRecord, MemoryIndex, RecordKind, index_name};
pub use resolve::{EntityResolver, NameResolver, Resolution};
pub use text::{Embedder, SimpleTokenizer, Tokenizer};

use crate::pipeline::progress::{ProgressCallback, ProgressEvent, notify};

/// What a collaborator knows about the run it is part of
#[derive(Clone)]
pub struct CollabContext {
    pub tenant_id: String,
    pub kb_id: String,
    pub embedder: Option<Arc<dyn Embedder>>,
    progress: Option<ProgressCallback>,
}

impl CollabContext {
    pub fn new(tenant_id: impl Into<String>, kb_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            kb_id: kb_id.into(),
            embedder: None,
            progress: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn Embedder>>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }

    /// Forward an event to the run's progress callback
    pub fn report(&self, event: ProgressEvent) {
        notify(self.progress.as_ref(), event);
    }
}

impl fmt::Debug for CollabContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollabContext")
            .field("tenant_id", &self.tenant_id)
            .field("kb_id", &self.kb_id)
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_string()))
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
