//! Kgsync Core Library
//!
//! Concurrent maintenance of per-knowledge-base graphs over a shared
//! key-value store:
//! - Store client (memory and Redis backends, reconnect on transport failure)
//! - Distributed lock (token + TTL, compare-and-delete release, RAII guard)
//! - Reliable queue (stream consumer groups, unacked recovery, delay queue)
//! - Knowledge graph model, merge, PageRank and n-hop metrics
//! - Collaborator traits (extraction, resolution, community reports, index)
//! - Update, resolution and community pipelines
//! - Task worker

pub mod collab;
pub mod config;
pub mod error;
pub mod graph;
pub mod lock;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod worker;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::collab::{Chunk, CommunityReporter, DocumentIndex, EntityResolver, Extractor};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::graph::{GraphStore, KnowledgeGraph};
    pub use crate::lock::{DistributedLock, LockManager};
    pub use crate::pipeline::{
        CommunityPipeline, GraphUpdatePipeline, PipelineDeps, ProgressEvent, ResolutionPipeline,
        UpdateRequest,
    };
    pub use crate::queue::ReliableQueue;
    pub use crate::store::KvClient;
    pub use crate::worker::{GraphTask, TaskWorker};
}
