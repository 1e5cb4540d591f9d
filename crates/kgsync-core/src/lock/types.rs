//! Lock types and error definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::backoff::BackoffPolicy;
use crate::store::{KeyTtl, StoreError};

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LockError {
    /// Lock acquisition timed out
    #[error(
        "Lock timeout: '{key}' is held by {} (waited {waited_ms}ms)",
        .holder.as_deref().unwrap_or("an unknown holder")
    )]
    Timeout {
        key: String,
        holder: Option<String>,
        waited_ms: u64,
    },

    /// Release attempted without holding the lock
    #[error("Lock not held: {0}")]
    NotHeld(String),

    /// The stored token no longer matches ours (expired and reassigned)
    #[error(
        "Lock token mismatch on '{key}': ours is {expected}, store holds {}",
        .actual.as_deref().unwrap_or("nothing")
    )]
    TokenMismatch {
        key: String,
        expected: String,
        actual: Option<String>,
    },

    /// Store failure while acquiring or releasing
    #[error("Lock store error: {0}")]
    Store(#[from] StoreError),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "E300",
            Self::NotHeld(_) => "E301",
            Self::TokenMismatch { .. } => "E302",
            Self::Store(_) => "E303",
        }
    }

    /// Whether acquiring again later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Store(e) => e.is_transport(),
            _ => false,
        }
    }
}

/// Lifecycle of a [`DistributedLock`](super::DistributedLock)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Unlocked,
    Acquiring,
    Held,
    /// Acquisition gave up at its deadline
    Failed,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::Acquiring => write!(f, "acquiring"),
            Self::Held => write!(f, "held"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Configuration for distributed locks
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfig {
    /// How long the lock record lives before passive expiry
    pub ttl: Duration,

    /// How long `acquire` keeps retrying
    pub timeout: Duration,

    /// Sleep policy between attempts
    pub backoff: BackoffPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(40 * 60),
            timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl LockConfig {
    /// Settings used around a graph fetch-merge-persist cycle
    pub fn for_graph_updates() -> Self {
        Self::default().with_ttl(Duration::from_secs(30 * 60))
    }

    /// Set the acquisition timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the record TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Snapshot of a lock record as seen in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockStatus {
    pub key: String,
    /// Token of the current holder
    pub holder: Option<String>,
    pub ttl: KeyTtl,
}

impl LockStatus {
    pub fn is_held(&self) -> bool {
        self.holder.is_some()
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.holder {
            Some(holder) => write!(f, "{}: held by {} (ttl {})", self.key, holder, self.ttl),
            None => write!(f, "{}: available", self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_codes() {
        let timeout_err = LockError::Timeout {
            key: "kb1".to_string(),
            holder: None,
            waited_ms: 10,
        };
        assert_eq!(timeout_err.code(), "E300");
        assert!(timeout_err.to_string().contains("unknown holder"));
        assert!(timeout_err.is_retryable());

        let mismatch = LockError::TokenMismatch {
            key: "kb1".to_string(),
            expected: "a".to_string(),
            actual: Some("b".to_string()),
        };
        assert_eq!(mismatch.code(), "E302");
        assert!(!mismatch.is_retryable());

        let store = LockError::from(StoreError::Transport("down".into()));
        assert_eq!(store.code(), "E303");
        assert!(store.is_retryable());
    }

    #[test]
    fn test_lock_config_builder() {
        let config = LockConfig::default()
            .with_timeout(Duration::from_secs(60))
            .with_ttl(Duration::from_secs(120));

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.ttl, Duration::from_secs(120));
        assert_eq!(LockConfig::default().ttl, Duration::from_secs(2400));
        assert_eq!(LockConfig::for_graph_updates().ttl, Duration::from_secs(1800));
    }

    #[test]
    fn test_lock_status_display() {
        let status = LockStatus {
            key: "kb1".into(),
            holder: Some("tok".into()),
            ttl: KeyTtl::Expires(1500),
        };
        assert!(status.is_held());
        assert_eq!(status.to_string(), "kb1: held by tok (ttl 1.5s)");
        assert_eq!(LockState::Failed.to_string(), "failed");
    }
}
