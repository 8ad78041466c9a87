// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`JobQueue`] backed by the `job_queue` table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_config::model::QueueConfig;
use parley_core::types::{FailDisposition, IngestJob, JobId, QueuedJob};
use parley_core::{Clock, JobQueue, ParleyError};
use tracing::{debug, warn};

use crate::database::Database;
use crate::queries::queue::{self, FailedRow, QueueStats};

pub struct SqliteJobQueue {
    db: Database,
    clock: Arc<dyn Clock>,
    name: String,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    visibility_timeout: Duration,
}

impl SqliteJobQueue {
    pub fn new(db: Database, clock: Arc<dyn Clock>, config: &QueueConfig) -> Self {
        Self {
            db,
            clock,
            name: config.name.clone(),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
        }
    }

    /// Retry delay after the `attempts`-th failure: base doubled per attempt, capped.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(20);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }

    pub async fn stats(&self) -> Result<QueueStats, ParleyError> {
        queue::stats(&self.db, &self.name).await
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(3650))
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: &IngestJob) -> Result<JobId, ParleyError> {
        let payload = serde_json::to_string(job)?;
        let id = queue::enqueue(
            &self.db,
            &self.name,
            &payload,
            self.max_attempts,
            self.clock.now(),
        )
        .await?;
        debug!(job_id = id, queue = %self.name, batch = job.batch.len(), "job enqueued");
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, ParleyError> {
        loop {
            let now = self.clock.now();
            let locked_until = now + to_chrono(self.visibility_timeout);
            let Some(row) = queue::dequeue(&self.db, &self.name, now, locked_until).await? else {
                return Ok(None);
            };
            match serde_json::from_str::<IngestJob>(&row.payload) {
                Ok(job) => {
                    return Ok(Some(QueuedJob {
                        id: row.id,
                        job,
                        attempts: row.attempts,
                    }));
                }
                Err(e) => {
                    warn!(job_id = row.id, error = %e, "undecodable job payload, dead-lettering");
                    queue::bury(&self.db, row.id, &e.to_string(), now).await?;
                }
            }
        }
    }

    async fn ack(&self, id: JobId) -> Result<(), ParleyError> {
        queue::ack(&self.db, id, self.clock.now()).await
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<FailDisposition, ParleyError> {
        let now = self.clock.now();
        let current = queue::status_of(&self.db, id)
            .await?
            .ok_or_else(|| ParleyError::NotFound {
                entity: "job",
                id: id.to_string(),
            })?;
        let retry_at = now + to_chrono(self.backoff(current.1 + 1));

        match queue::fail(&self.db, id, error, now, retry_at).await? {
            FailedRow::Retry { attempts, .. } => Ok(FailDisposition::Retrying { attempts, retry_at }),
            FailedRow::Dead { attempts } => {
                warn!(job_id = id, attempts, error, "job dead-lettered");
                Ok(FailDisposition::DeadLettered { attempts })
            }
        }
    }

    async fn pending_count(&self) -> Result<u64, ParleyError> {
        Ok(self.stats().await?.pending)
    }
}
