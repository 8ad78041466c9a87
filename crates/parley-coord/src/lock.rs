// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Distributed locks over the shared [`KvStore`].
//!
//! A lock is a key holding a random token. Only the holder of that token can
//! release or extend it, and an abandoned lock frees itself when its TTL
//! lapses. Failing to acquire is an ordinary outcome (`Ok(None)`), not an
//! error. Store failures are errors and propagate.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parley_config::model::LockConfig;
use parley_core::{KvStore, ParleyError};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Key of the lock guarding job creation for one inbound message.
pub fn job_creation_key(inbox_id: i64, message_id: &str) -> String {
    format!("lock:job-create:{inbox_id}:{message_id}")
}

/// Key of the lock guarding processing of one inbound message.
pub fn job_processing_key(inbox_id: i64, message_id: &str) -> String {
    format!("lock:job-process:{inbox_id}:{message_id}")
}

/// Proof of lock ownership returned by a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    key: String,
    token: String,
    ttl: Duration,
}

impl LockToken {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Acquires, extends and releases locks in the shared store.
#[derive(Clone)]
pub struct LockService {
    kv: Arc<dyn KvStore>,
    retry_count: u32,
    retry_delay: Duration,
    retry_jitter: Duration,
}

impl LockService {
    pub fn new(kv: Arc<dyn KvStore>, config: &LockConfig) -> Self {
        Self {
            kv,
            retry_count: config.retry_count,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            retry_jitter: Duration::from_millis(config.retry_jitter_ms),
        }
    }

    /// Single attempt, no retry.
    pub async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, ParleyError> {
        let token = Uuid::new_v4().to_string();
        if self.kv.set_if_absent(key, &token, ttl).await? {
            debug!(key, ttl_ms = ttl.as_millis() as u64, "lock acquired");
            Ok(Some(LockToken {
                key: key.to_string(),
                token,
                ttl,
            }))
        } else {
            Ok(None)
        }
    }

    /// Attempts acquisition, retrying `retry_count` times with jittered delay.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, ParleyError> {
        for attempt in 0..=self.retry_count {
            if let Some(token) = self.try_acquire(key, ttl).await? {
                return Ok(Some(token));
            }
            if attempt < self.retry_count {
                tokio::time::sleep(self.retry_pause()).await;
            }
        }
        debug!(key, "lock unavailable");
        Ok(None)
    }

    /// Keeps retrying until the lock is acquired or `max_wait` has passed.
    ///
    /// Used for short critical sections where the caller would rather wait
    /// than drop its work.
    pub async fn acquire_patiently(
        &self,
        key: &str,
        ttl: Duration,
        max_wait: Duration,
    ) -> Result<Option<LockToken>, ParleyError> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if let Some(token) = self.try_acquire(key, ttl).await? {
                return Ok(Some(token));
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(key, "lock wait exhausted");
                return Ok(None);
            }
            tokio::time::sleep(self.retry_pause()).await;
        }
    }

    /// Releases the lock if the token still owns it. Returns whether it did.
    ///
    /// Errors are logged: a lock that cannot be released expires on its own.
    pub async fn release(&self, token: LockToken) -> bool {
        match self.kv.delete_if_equals(&token.key, &token.token).await {
            Ok(true) => {
                debug!(key = %token.key, "lock released");
                true
            }
            Ok(false) => {
                warn!(key = %token.key, "lock expired before release");
                false
            }
            Err(e) => {
                warn!(key = %token.key, error = %e, "lock release failed");
                false
            }
        }
    }

    /// Resets the lock's TTL if the token still owns it.
    pub async fn extend(&self, token: &LockToken) -> Result<bool, ParleyError> {
        self.kv
            .expire_if_equals(&token.key, &token.token, token.ttl)
            .await
    }

    /// Runs `f` while holding the lock at `key`.
    ///
    /// Returns `Ok(None)` without running `f` when the lock is held elsewhere.
    /// While `f` runs the lock is extended every half TTL so long work keeps
    /// ownership. The lock is released whether or not `f` succeeds.
    pub async fn with_lock<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        f: F,
    ) -> Result<Option<T>, ParleyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(token) = self.acquire(key, ttl).await? else {
            return Ok(None);
        };

        let stop = CancellationToken::new();
        let extender = tokio::spawn(keep_alive(self.clone(), token.clone(), stop.clone()));

        let output = f().await;

        stop.cancel();
        let _ = extender.await;
        self.release(token).await;
        Ok(Some(output))
    }

    fn retry_pause(&self) -> Duration {
        let jitter_ms = self.retry_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.retry_delay + Duration::from_millis(jitter)
    }
}

async fn keep_alive(locks: LockService, token: LockToken, stop: CancellationToken) {
    let period = (token.ttl / 2).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {
                match locks.extend(&token).await {
                    Ok(true) => debug!(key = %token.key, "lock extended"),
                    Ok(false) => {
                        warn!(key = %token.key, "lock lost while held");
                        return;
                    }
                    Err(e) => warn!(key = %token.key, error = %e, "lock extension failed"),
                }
            }
        }
    }
}
