//! Error types for kgsync

use thiserror::Error;

use crate::graph::GraphError;
use crate::lock::LockError;
use crate::store::StoreError;

/// Result type alias using kgsync's Error
pub type Result<T> = std::result::Result<T, Error>;

/// kgsync error types
#[derive(Error, Debug)]
pub enum Error {
    // Store errors (E100-E199)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    // Graph errors (E400-E499)
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("No persisted graph for tenant '{tenant_id}', knowledge base '{kb_id}'")]
    MissingGraph { tenant_id: String, kb_id: String },

    // Queue errors (E500-E599)
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Collaborator errors (E700-E799)
    #[error("Collaborator '{name}' failed: {message}")]
    Collaborator { name: String, message: String },

    #[error("Document index error: {0}")]
    Index(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a failure raised by an external collaborator
    pub fn collaborator(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(e) => e.code(),
            Self::Lock(e) => e.code(),
            Self::Graph(_) => "E400",
            Self::MissingGraph { .. } => "E401",
            Self::Queue(_) => "E500",
            Self::Serialization(_) => "E501",
            Self::ConfigError(_) => "E600",
            Self::Collaborator { .. } => "E700",
            Self::Index(_) => "E701",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Whether retrying the whole operation later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transport(),
            Self::Lock(e) => e.is_retryable(),
            _ => false,
        }
    }
}
