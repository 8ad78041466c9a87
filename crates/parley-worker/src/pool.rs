// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded pool of queue consumers.
//!
//! Each consumer loops dequeue → process → ack/fail, sleeping for the poll
//! interval when the queue is empty. Cancellation is observed between jobs,
//! so a job that has started always runs to completion.

use std::sync::Arc;
use std::time::Duration;

use parley_config::model::QueueConfig;
use parley_core::types::{FailDisposition, QueuedJob};
use parley_core::{JobQueue, ParleyError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::worker::{IngestionWorker, WorkOutcome};

/// What the pool did with one dequeued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Acked(WorkOutcome),
    Retrying { attempts: u32 },
    DeadLettered { attempts: u32 },
    /// A permanent failure; retrying cannot help, so the job was acked.
    Dropped,
}

#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    worker: Arc<IngestionWorker>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, worker: Arc<IngestionWorker>, config: &QueueConfig) -> Self {
        Self {
            queue,
            worker,
            concurrency: config.concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Dequeues and runs a single job. Returns `None` when the queue is empty.
    pub async fn process_next(&self) -> Result<Option<JobResult>, ParleyError> {
        let Some(queued) = self.queue.dequeue().await? else {
            return Ok(None);
        };
        self.run_job(queued).await.map(Some)
    }

    async fn run_job(&self, queued: QueuedJob) -> Result<JobResult, ParleyError> {
        let QueuedJob { id, job, attempts } = queued;
        match self.worker.process(&job).await {
            Ok(outcome) => {
                self.queue.ack(id).await?;
                Ok(JobResult::Acked(outcome))
            }
            Err(e) if e.is_transient() => match self.queue.fail(id, &e.to_string()).await? {
                FailDisposition::Retrying { attempts, retry_at } => {
                    warn!(job_id = id, attempts, %retry_at, error = %e, "job failed, will retry");
                    Ok(JobResult::Retrying { attempts })
                }
                FailDisposition::DeadLettered { attempts } => {
                    error!(job_id = id, attempts, error = %e, "job dead-lettered");
                    Ok(JobResult::DeadLettered { attempts })
                }
            },
            Err(e) => {
                error!(job_id = id, attempts, error = %e, "job failed permanently, dropping");
                self.queue.ack(id).await?;
                Ok(JobResult::Dropped)
            }
        }
    }

    /// Runs `concurrency` consumers until `cancel` fires, then waits for
    /// in-flight jobs to finish.
    pub async fn run(self, cancel: CancellationToken) {
        info!(consumers = self.concurrency, "worker pool started");
        let mut consumers = JoinSet::new();
        for index in 0..self.concurrency {
            consumers.spawn(self.clone().consume(index, cancel.clone()));
        }
        while let Some(joined) = consumers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "queue consumer panicked");
            }
        }
        info!("worker pool drained");
    }

    async fn consume(self, index: usize, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(consumer = index, error = %e, "queue poll failed"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
