// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion worker: runs one queued job under the job-processing lock.

use std::sync::Arc;
use std::time::Duration;

use parley_config::model::LockConfig;
use parley_coord::{DedupService, LockService, job_processing_key};
use parley_core::ParleyError;
use parley_core::types::{IngestJob, NormalizedMessage};
use tracing::{debug, info, warn};

use crate::handler::{HandleOutcome, MessageHandler};
use crate::inbox::InboxDirectory;

/// Result of running one job. Every variant acks the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Processed(HandleOutcome),
    AlreadyProcessed,
    /// Another consumer holds the processing lock for this message.
    SkippedAlreadyProcessing,
    /// The inbox was removed or deactivated after the job was queued.
    InboxNotConfigured,
}

pub struct IngestionWorker {
    inboxes: Arc<InboxDirectory>,
    dedup: DedupService,
    locks: LockService,
    handler: MessageHandler,
    processing_ttl: Duration,
}

impl IngestionWorker {
    pub fn new(
        inboxes: Arc<InboxDirectory>,
        dedup: DedupService,
        locks: LockService,
        handler: MessageHandler,
        config: &LockConfig,
    ) -> Self {
        Self {
            inboxes,
            dedup,
            locks,
            handler,
            processing_ttl: Duration::from_millis(config.job_processing_ttl_ms),
        }
    }

    /// Processes a job at most once per dedup window.
    ///
    /// The processing lock is held (and extended) for the whole turn and
    /// released afterwards whatever the result. Handler errors are returned
    /// so the queue can retry.
    pub async fn process(&self, job: &IngestJob) -> Result<WorkOutcome, ParleyError> {
        let message = &job.message;
        if self.already_processed(message).await {
            return Ok(WorkOutcome::AlreadyProcessed);
        }

        let key = processing_key(message);
        let outcome = self
            .locks
            .with_lock(&key, self.processing_ttl, || self.process_locked(job))
            .await?;
        match outcome {
            Some(result) => result,
            None => {
                debug!(key, "skipped, already processing");
                Ok(WorkOutcome::SkippedAlreadyProcessing)
            }
        }
    }

    async fn process_locked(&self, job: &IngestJob) -> Result<WorkOutcome, ParleyError> {
        let message = &job.message;
        // A consumer may have finished between the first check and the lock.
        if self.already_processed(message).await {
            return Ok(WorkOutcome::AlreadyProcessed);
        }

        let Some(inbox) = self.inboxes.resolve(message.inbox_id).await? else {
            warn!(
                inbox_id = message.inbox_id,
                message_id = ?message.message_id,
                "inbox not configured, dropping job"
            );
            return Ok(WorkOutcome::InboxNotConfigured);
        };

        let outcome = self.handler.handle(job, &inbox).await?;
        self.mark_batch_processed(job).await;
        info!(
            inbox_id = message.inbox_id,
            conversation_id = message.conversation_id,
            message_id = ?message.message_id,
            batch = job.batch.len(),
            "message processed"
        );
        Ok(WorkOutcome::Processed(outcome))
    }

    async fn already_processed(&self, message: &NormalizedMessage) -> bool {
        let Some((inbox_id, message_id)) = message.dedup_identity() else {
            return false;
        };
        if self.dedup.is_processed(inbox_id, Some(message_id)).await {
            debug!(inbox_id, message_id, "already processed");
            return true;
        }
        false
    }

    async fn mark_batch_processed(&self, job: &IngestJob) {
        self.mark(&job.message).await;
        for m in job
            .batch
            .iter()
            .filter(|m| m.message_id != job.message.message_id)
        {
            self.mark(m).await;
        }
    }

    async fn mark(&self, message: &NormalizedMessage) {
        if let Err(e) = self
            .dedup
            .mark_processed(message.inbox_id, message.message_id.as_deref())
            .await
        {
            warn!(
                inbox_id = message.inbox_id,
                message_id = ?message.message_id,
                error = %e,
                "failed to mark message processed"
            );
        }
    }
}

/// Lock key for a job. Messages without an id are serialized per thread.
fn processing_key(message: &NormalizedMessage) -> String {
    match message.dedup_identity() {
        Some((inbox_id, message_id)) => job_processing_key(inbox_id, message_id),
        None => format!(
            "lock:job-process:{}:thread:{}:{}",
            message.inbox_id, message.conversation_id, message.contact_address
        ),
    }
}
