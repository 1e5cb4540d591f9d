//! RAII guard for a held distributed lock
//!
//! Prefer the explicit async [`LockGuard::release`]. A guard dropped while
//! still holding the lock (panic, early return, cancelled future) spawns a
//! release on the current tokio runtime; without a runtime the record is
//! left to expire at its TTL.

use std::fmt;

use tokio::runtime::Handle;
use tracing::warn;

use super::distributed::DistributedLock;

/// Owns a [`DistributedLock`] for as long as it is held
#[derive(Debug)]
pub struct LockGuard {
    lock: Option<DistributedLock>,
}

impl LockGuard {
    pub(crate) fn new(lock: DistributedLock) -> Self {
        Self { lock: Some(lock) }
    }

    /// Key of the held lock
    pub fn key(&self) -> &str {
        self.lock.as_ref().map(|l| l.key()).unwrap_or_default()
    }

    /// Token currently stored under the key
    pub fn token(&self) -> &str {
        self.lock.as_ref().map(|l| l.token()).unwrap_or_default()
    }

    pub fn is_held(&self) -> bool {
        self.lock.as_ref().is_some_and(|l| l.is_held())
    }

    /// Release now; returns whether the record was deleted
    pub async fn release(mut self) -> bool {
        match self.lock.take() {
            Some(mut lock) => lock.release().await,
            None => false,
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(mut lock) = self.lock.take() else {
            return;
        };
        if !lock.is_held() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                warn!(lock_key = %lock.key(), "Lock guard dropped while held, releasing in background");
                handle.spawn(async move {
                    lock.release().await;
                });
            }
            Err(_) => {
                warn!(lock_key = %lock.key(), "Lock guard dropped outside a runtime, record will expire at TTL");
            }
        }
    }
}

impl fmt::Display for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lock[{}]", self.key())
    }
}
