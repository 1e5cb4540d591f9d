//! Knowledge graph model, merge, derived metrics and persistence

pub mod merge;
pub mod metrics;
pub mod model;
pub mod store;

pub use merge::merge;
pub use metrics::MetricsConfig;
pub use model::{
    EdgeData, EdgeKey, GraphError, GraphResult, GraphStats, HopPath, KnowledgeGraph, NodeData,
};
pub use store::{GraphSnapshot, GraphStore, KvGraphStore, MemoryGraphStore};
