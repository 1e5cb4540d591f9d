//! Store-backed mutual exclusion keyed by knowledge base
//!
//! A lock is a string record `key -> token` written with set-if-absent and a
//! TTL. Only the holder whose token matches may delete it, and the check and
//! delete happen in one atomic store operation.

use std::future::Future;

use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::guard::LockGuard;
use super::types::{LockConfig, LockError, LockResult, LockState};
use crate::store::{KeyTtl, KvClient};

/// A single lock handle for one key
#[derive(Debug)]
pub struct DistributedLock {
    client: KvClient,
    key: String,
    token: String,
    config: LockConfig,
    state: LockState,
}

impl DistributedLock {
    pub fn new(client: KvClient, key: impl Into<String>, config: LockConfig) -> Self {
        Self {
            client,
            key: key.into(),
            token: Uuid::new_v4().to_string(),
            config,
            state: LockState::Unlocked,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Token written to the store while held
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn is_held(&self) -> bool {
        self.state == LockState::Held
    }

    /// Acquire, reporting only success or failure
    pub async fn try_acquire(&mut self) -> bool {
        self.acquire().await.is_ok()
    }

    /// Retry set-if-absent until it succeeds or the timeout elapses
    ///
    /// Makes at least one attempt, even with a zero timeout. Store failures
    /// are retried like contention; if the last attempt failed at the store,
    /// that error is returned instead of a timeout.
    pub async fn acquire(&mut self) -> LockResult<()> {
        if self.is_held() {
            debug!(lock_key = %self.key, "Lock already held by this handle");
            return Ok(());
        }

        self.state = LockState::Acquiring;
        self.token = Uuid::new_v4().to_string();

        let start = Instant::now();
        let deadline = start + self.config.timeout;
        let mut attempt: u32 = 0;
        let mut holder: Option<String> = None;

        debug!(
            lock_key = %self.key,
            timeout_ms = self.config.timeout.as_millis() as u64,
            ttl_secs = self.config.ttl.as_secs(),
            "Attempting to acquire lock"
        );

        loop {
            attempt += 1;
            let last_error = match self
                .client
                .set_nx(&self.key, &self.token, self.config.ttl)
                .await
            {
                Ok(true) => {
                    self.state = LockState::Held;
                    info!(
                        lock_key = %self.key,
                        attempt = attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Lock acquired"
                    );
                    return Ok(());
                }
                Ok(false) => {
                    holder = self.client.get(&self.key).await.ok().flatten();
                    let ttl = self
                        .client
                        .ttl(&self.key)
                        .await
                        .unwrap_or(KeyTtl::Missing);
                    debug!(
                        lock_key = %self.key,
                        holder = holder.as_deref().unwrap_or("-"),
                        ttl_remaining = %ttl,
                        attempt = attempt,
                        "Lock held elsewhere"
                    );
                    None
                }
                Err(e) => {
                    warn!(lock_key = %self.key, attempt = attempt, error = %e, "Lock attempt failed");
                    Some(e)
                }
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.state = LockState::Failed;
                let waited_ms = start.elapsed().as_millis() as u64;
                error!(
                    lock_key = %self.key,
                    holder = holder.as_deref().unwrap_or("-"),
                    attempts = attempt,
                    waited_ms = waited_ms,
                    "Failed to acquire lock"
                );
                return Err(match last_error {
                    Some(e) => LockError::Store(e),
                    None => LockError::Timeout {
                        key: self.key.clone(),
                        holder,
                        waited_ms,
                    },
                });
            }
            sleep(self.config.backoff.interval(remaining)).await;
        }
    }

    /// Release, logging instead of failing
    ///
    /// Returns whether the record was deleted. Releasing a lock that was
    /// never acquired (or already released) is a no-op.
    pub async fn release(&mut self) -> bool {
        match self.release_checked().await {
            Ok(()) => true,
            Err(LockError::NotHeld(_)) => {
                debug!(lock_key = %self.key, state = %self.state, "Release skipped, lock not held");
                false
            }
            Err(e) => {
                warn!(lock_key = %self.key, code = e.code(), error = %e, "Lock release did not delete the record");
                false
            }
        }
    }

    /// Release with the outcome as a typed result
    ///
    /// The handle ends up `Unlocked` whatever the outcome.
    pub async fn release_checked(&mut self) -> LockResult<()> {
        if !self.is_held() {
            return Err(LockError::NotHeld(self.key.clone()));
        }

        let result = self.client.compare_and_delete(&self.key, &self.token).await;
        self.state = LockState::Unlocked;

        match result {
            Ok(true) => {
                info!(lock_key = %self.key, "Lock released");
                Ok(())
            }
            Ok(false) => {
                let actual = self.client.get(&self.key).await.ok().flatten();
                Err(LockError::TokenMismatch {
                    key: self.key.clone(),
                    expected: self.token.clone(),
                    actual,
                })
            }
            Err(e) => Err(LockError::Store(e)),
        }
    }

    /// Acquire and hand ownership to a guard
    pub async fn lock(mut self) -> LockResult<LockGuard> {
        self.acquire().await?;
        Ok(LockGuard::new(self))
    }

    /// Run `f` while holding the lock
    ///
    /// The lock is released on every exit path: after `f` returns (`Ok` or
    /// `Err`), and in the background if this future is dropped mid-flight.
    /// Acquisition failure returns before `f` runs.
    pub async fn scoped<F, Fut, T, E>(self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.lock().await?;
        let result = f().await;
        guard.release().await;
        result
    }
}
