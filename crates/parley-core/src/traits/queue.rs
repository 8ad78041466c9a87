// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable, at-least-once job transport.

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::types::{FailDisposition, IngestJob, JobId, QueuedJob};

/// At-least-once job queue with retry/backoff and dead-lettering.
///
/// A dequeued job stays invisible to other consumers until it is acked,
/// failed, or its visibility timeout lapses (crashed consumer).
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn enqueue(&self, job: &IngestJob) -> Result<JobId, ParleyError>;

    /// Claims the oldest visible job, or returns `None` when nothing is ready.
    async fn dequeue(&self) -> Result<Option<QueuedJob>, ParleyError>;

    async fn ack(&self, id: JobId) -> Result<(), ParleyError>;

    /// Records a failed attempt, scheduling a retry or dead-lettering the job.
    async fn fail(&self, id: JobId, error: &str) -> Result<FailDisposition, ParleyError>;

    /// Number of jobs waiting to be processed.
    async fn pending_count(&self) -> Result<u64, ParleyError>;
}
