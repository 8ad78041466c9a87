// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Short-window message buffering.
//!
//! End users often send a burst (several photos, a sentence split across
//! messages). The [`BufferService`] collects a burst per
//! (inbox, conversation, end user) in the shared store and turns it into a
//! single queue job once the thread has been quiet for the debounce window.
//!
//! The entry itself lives in the shared [`KvStore`] so any replica can flush
//! it. Debounce timers are per replica: each arrival cancels and rearms the
//! local timer for its key. A timer that fires on a replica which did not
//! see the latest arrival notices the entry is not yet quiet and rearms for
//! the remainder. Entries whose timer died with a replica are picked up by
//! [`BufferService::recover_stale`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parley_config::model::BufferConfig;
use parley_core::types::{IngestJob, JobId};
use parley_core::{Clock, JobQueue, KvStore, NormalizedMessage, ParleyError};
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lock::{LockService, LockToken};

const BUFFER_PREFIX: &str = "buffer:";
const ENTRY_LOCK_TTL: Duration = Duration::from_secs(5);
const ENTRY_LOCK_WAIT: Duration = Duration::from_secs(2);

/// Shared-store key of the buffer for a message's thread.
pub fn buffer_key(message: &NormalizedMessage) -> String {
    format!(
        "{BUFFER_PREFIX}{}:{}:{}",
        message.inbox_id, message.conversation_id, message.contact_address
    )
}

/// A message waiting in a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub message: NormalizedMessage,
    pub arrived_at: DateTime<Utc>,
}

/// The persisted buffer for one thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferEntry {
    pub messages: Vec<BufferedMessage>,
    /// Set while a flush owns the leading `in_flight` messages.
    #[serde(default)]
    pub processing: bool,
    #[serde(default)]
    pub in_flight: usize,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_arrival: Option<DateTime<Utc>>,
}

impl BufferEntry {
    /// Drops the oldest messages beyond `max`, never touching in-flight ones.
    fn enforce_cap(&mut self, max: usize) -> usize {
        let protected = if self.processing { self.in_flight } else { 0 };
        let mut dropped = 0;
        while self.messages.len() > max && self.messages.len() > protected {
            self.messages.remove(protected);
            dropped += 1;
        }
        dropped
    }
}

/// Result of [`BufferService::add_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferOutcome {
    pub buffered: bool,
    pub buffer_size: usize,
}

enum Claim {
    Empty,
    Busy,
    NotQuiet(Duration),
    Ready(Vec<NormalizedMessage>),
}

struct Timer {
    generation: u64,
    handle: AbortHandle,
}

struct Inner {
    kv: Arc<dyn KvStore>,
    queue: Arc<dyn JobQueue>,
    locks: LockService,
    clock: Arc<dyn Clock>,
    window: Duration,
    max_messages: usize,
    ttl: Duration,
    timers: DashMap<String, Timer>,
    next_generation: AtomicU64,
}

/// Debounces bursts of messages into single queue jobs.
#[derive(Clone)]
pub struct BufferService {
    inner: Arc<Inner>,
}

impl BufferService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        queue: Arc<dyn JobQueue>,
        locks: LockService,
        clock: Arc<dyn Clock>,
        config: &BufferConfig,
    ) -> Self {
        let window = Duration::from_millis(config.window_ms);
        Self {
            inner: Arc::new(Inner {
                kv,
                queue,
                locks,
                clock,
                window,
                max_messages: config.max_messages.max(1),
                ttl: window + Duration::from_millis(config.ttl_slack_ms),
                timers: DashMap::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Number of debounce timers armed on this replica.
    pub fn armed_timers(&self) -> usize {
        self.inner.timers.len()
    }

    /// Appends `message` to its thread's buffer and rearms the debounce timer.
    pub async fn add_message(
        &self,
        message: NormalizedMessage,
    ) -> Result<BufferOutcome, ParleyError> {
        let key = buffer_key(&message);
        let guard = self.lock_entry(&key).await?;
        let result = self.append(&key, message).await;
        self.inner.locks.release(guard).await;
        let buffer_size = result?;

        self.arm(key, self.inner.window);
        Ok(BufferOutcome {
            buffered: true,
            buffer_size,
        })
    }

    async fn append(&self, key: &str, message: NormalizedMessage) -> Result<usize, ParleyError> {
        let mut entry = self.load(key).await?.unwrap_or_default();
        let now = self.inner.clock.now();
        entry.messages.push(BufferedMessage {
            message,
            arrived_at: now,
        });
        entry.last_arrival = Some(now);
        let dropped = entry.enforce_cap(self.inner.max_messages);
        if dropped > 0 {
            warn!(key, dropped, "buffer full, dropped oldest messages");
        }
        self.store(key, &entry).await?;
        debug!(key, size = entry.messages.len(), "message buffered");
        Ok(entry.messages.len())
    }

    /// Flushes the buffer at `key` if it has been quiet for the window.
    ///
    /// Returns the id of the enqueued job, or `None` when there was nothing to
    /// flush, another flush owns the entry, or the entry is not quiet yet (in
    /// which case a local timer is armed for the remainder).
    pub async fn flush(&self, key: &str) -> Result<Option<JobId>, ParleyError> {
        self.flush_inner(key, false).await
    }

    async fn flush_inner(&self, key: &str, force: bool) -> Result<Option<JobId>, ParleyError> {
        let guard = self.lock_entry(key).await?;
        let claim = self.claim(key, force).await;
        self.inner.locks.release(guard).await;

        let batch = match claim? {
            Claim::Empty | Claim::Busy => return Ok(None),
            Claim::NotQuiet(remaining) => {
                self.arm(key.to_string(), remaining);
                return Ok(None);
            }
            Claim::Ready(batch) => batch,
        };

        let size = batch.len();
        let job = IngestJob {
            message: batch[0].clone(),
            batch,
            enqueued_at: self.inner.clock.now(),
        };

        match self.inner.queue.enqueue(&job).await {
            Ok(job_id) => {
                info!(key, job_id, batch = size, "buffer flushed");
                self.settle(key, true).await?;
                Ok(Some(job_id))
            }
            Err(e) => {
                warn!(key, error = %e, "buffer flush could not enqueue, will retry");
                if let Err(settle_err) = self.settle(key, false).await {
                    warn!(key, error = %settle_err, "buffer release after failed flush failed");
                }
                self.arm(key.to_string(), self.inner.window);
                Err(e)
            }
        }
    }

    async fn claim(&self, key: &str, force: bool) -> Result<Claim, ParleyError> {
        let Some(mut entry) = self.load(key).await? else {
            return Ok(Claim::Empty);
        };
        if entry.messages.is_empty() {
            self.inner.kv.delete(key).await?;
            return Ok(Claim::Empty);
        }

        let now = self.inner.clock.now();
        if entry.processing {
            let stale = entry
                .claimed_at
                .is_none_or(|at| at + to_chrono(self.inner.ttl) <= now);
            if !stale {
                return Ok(Claim::Busy);
            }
            warn!(key, "reclaiming buffer abandoned mid-flush");
        }

        if !force
            && let Some(last) = entry.last_arrival
        {
            let quiet_at = last + to_chrono(self.inner.window);
            if quiet_at > now {
                let remaining = (quiet_at - now).to_std().unwrap_or(self.inner.window);
                return Ok(Claim::NotQuiet(remaining));
            }
        }

        entry.messages.sort_by_key(|m| m.arrived_at);
        entry.processing = true;
        entry.in_flight = entry.messages.len();
        entry.claimed_at = Some(now);
        self.store(key, &entry).await?;
        Ok(Claim::Ready(
            entry.messages.into_iter().map(|m| m.message).collect(),
        ))
    }

    /// Ends a flush. On success the flushed messages are dropped; anything that
    /// arrived meanwhile stays buffered and gets a fresh timer.
    async fn settle(&self, key: &str, flushed: bool) -> Result<(), ParleyError> {
        let guard = self.lock_entry(key).await?;
        let result = self.release_claim(key, flushed).await;
        self.inner.locks.release(guard).await;

        if result? && flushed {
            self.arm(key.to_string(), self.inner.window);
        }
        Ok(())
    }

    /// Returns whether messages remain buffered.
    async fn release_claim(&self, key: &str, flushed: bool) -> Result<bool, ParleyError> {
        let Some(mut entry) = self.load(key).await? else {
            return Ok(false);
        };
        if flushed {
            let n = entry.in_flight.min(entry.messages.len());
            entry.messages.drain(..n);
        }
        entry.processing = false;
        entry.in_flight = 0;
        entry.claimed_at = None;
        if entry.messages.is_empty() {
            self.inner.kv.delete(key).await?;
            Ok(false)
        } else {
            self.store(key, &entry).await?;
            Ok(true)
        }
    }

    /// Flushes buffers in the shared store that no local timer is tracking.
    ///
    /// Covers entries orphaned by a replica that stopped between an arrival and
    /// its timer firing. Entries still inside their window get a local timer.
    pub async fn recover_stale(&self) -> Result<usize, ParleyError> {
        let keys = self.inner.kv.keys_with_prefix(BUFFER_PREFIX).await?;
        let mut flushed = 0;
        for key in keys {
            if self.inner.timers.contains_key(&key) {
                continue;
            }
            match self.flush(&key).await {
                Ok(Some(_)) => flushed += 1,
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "stale buffer flush failed"),
            }
        }
        if flushed > 0 {
            info!(flushed, "recovered orphaned buffers");
        }
        Ok(flushed)
    }

    /// Flushes every buffer with a local timer immediately. Used on shutdown.
    pub async fn drain(&self) -> usize {
        let keys: Vec<String> = self.inner.timers.iter().map(|t| t.key().clone()).collect();
        let mut flushed = 0;
        for key in keys {
            if let Some((_, timer)) = self.inner.timers.remove(&key) {
                timer.handle.abort();
            }
            match self.flush_inner(&key, true).await {
                Ok(Some(_)) => flushed += 1,
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "buffer drain failed"),
            }
        }
        flushed
    }

    /// Runs [`recover_stale`](Self::recover_stale) every `period` until cancelled.
    pub async fn run_sweeper(self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("buffer sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.recover_stale().await {
                        warn!(error = %e, "buffer sweep failed");
                    }
                }
            }
        }
    }

    fn arm(&self, key: String, delay: Duration) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let this = self.clone();
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_ours = this
                .inner
                .timers
                .remove_if(&timer_key, |_, t| t.generation == generation)
                .is_some();
            if !still_ours {
                return;
            }
            // Detached so a rearm racing with this point cannot abort a flush midway.
            tokio::spawn(async move {
                if let Err(e) = this.flush(&timer_key).await {
                    warn!(key = %timer_key, error = %e, "buffer flush failed");
                }
            });
        })
        .abort_handle();

        if let Some(previous) = self.inner.timers.insert(key, Timer { generation, handle }) {
            previous.handle.abort();
        }
    }

    async fn lock_entry(&self, key: &str) -> Result<LockToken, ParleyError> {
        self.inner
            .locks
            .acquire_patiently(&format!("lock:{key}"), ENTRY_LOCK_TTL, ENTRY_LOCK_WAIT)
            .await?
            .ok_or(ParleyError::Timeout {
                duration: ENTRY_LOCK_WAIT,
            })
    }

    async fn load(&self, key: &str) -> Result<Option<BufferEntry>, ParleyError> {
        let Some(raw) = self.inner.kv.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable buffer entry");
                self.inner.kv.delete(key).await?;
                Ok(None)
            }
        }
    }

    /// A claimed entry outlives its claim by one more TTL, so a replica can
    /// still reclaim it after the flushing one dies.
    async fn store(&self, key: &str, entry: &BufferEntry) -> Result<(), ParleyError> {
        let raw = serde_json::to_string(entry)?;
        let ttl = if entry.processing {
            self.inner.ttl * 2
        } else {
            self.inner.ttl
        };
        self.inner.kv.set(key, &raw, ttl).await
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(3650))
}
