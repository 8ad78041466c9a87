// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admission of normalized inbound messages.
//!
//! A message is admitted at most once per dedup window: the processed
//! marker rejects redeliveries of handled messages, and the job-creation
//! lock rejects concurrent deliveries of one that is still queued. Admitted
//! messages are either buffered (inboxes with buffering) or enqueued directly.

use std::sync::Arc;
use std::time::Duration;

use parley_config::model::LockConfig;
use parley_coord::{BufferService, DedupService, LockService, job_creation_key};
use parley_core::types::{IngestJob, JobId, NormalizedMessage};
use parley_core::{Clock, JobQueue, ParleyError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::inbox::InboxDirectory;

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Admission {
    /// The message was handled within the dedup window.
    AlreadyProcessed,
    /// Another delivery of the message is being admitted or is queued.
    InFlight,
    Buffered { buffer_size: usize },
    Enqueued { job_id: JobId },
}

#[derive(Clone)]
pub struct IngressService {
    inboxes: Arc<InboxDirectory>,
    dedup: DedupService,
    locks: LockService,
    buffer: BufferService,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    creation_ttl: Duration,
}

impl IngressService {
    pub fn new(
        inboxes: Arc<InboxDirectory>,
        dedup: DedupService,
        locks: LockService,
        buffer: BufferService,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        config: &LockConfig,
    ) -> Self {
        Self {
            inboxes,
            dedup,
            locks,
            buffer,
            queue,
            clock,
            creation_ttl: Duration::from_millis(config.job_creation_ttl_ms),
        }
    }

    /// Admits a message. Fails with `NotFound` when its inbox is not
    /// configured or inactive.
    ///
    /// Once the message is buffered or enqueued the job-creation lock is left
    /// to expire, so redeliveries that race the first one inside its TTL are
    /// dropped. When admission fails the lock is released and a redelivery
    /// is admitted normally.
    pub async fn admit(&self, message: NormalizedMessage) -> Result<Admission, ParleyError> {
        let inbox = self
            .inboxes
            .resolve(message.inbox_id)
            .await?
            .ok_or_else(|| ParleyError::NotFound {
                entity: "inbox",
                id: message.inbox_id.to_string(),
            })?;
        if inbox.tenant.id != message.tenant_id {
            return Err(ParleyError::Validation(format!(
                "inbox {} does not belong to tenant {}",
                message.inbox_id, message.tenant_id
            )));
        }

        let mut creation_lock = None;
        if let Some((inbox_id, message_id)) = message.dedup_identity() {
            if self.dedup.is_processed(inbox_id, Some(message_id)).await {
                debug!(inbox_id, message_id, "message already processed");
                return Ok(Admission::AlreadyProcessed);
            }
            let key = job_creation_key(inbox_id, message_id);
            match self.locks.try_acquire(&key, self.creation_ttl).await? {
                Some(token) => creation_lock = Some(token),
                None => {
                    debug!(inbox_id, message_id, "message already being admitted");
                    return Ok(Admission::InFlight);
                }
            }
        }

        let admitted = self.hand_off(message, inbox.inbox.buffer_enabled).await;
        if let Err(e) = &admitted
            && let Some(token) = creation_lock
        {
            warn!(key = token.key(), error = %e, "admission failed, releasing job-creation lock");
            self.locks.release(token).await;
        }
        admitted
    }

    async fn hand_off(
        &self,
        message: NormalizedMessage,
        buffered: bool,
    ) -> Result<Admission, ParleyError> {
        if buffered {
            let outcome = self.buffer.add_message(message).await?;
            return Ok(Admission::Buffered {
                buffer_size: outcome.buffer_size,
            });
        }

        let job = IngestJob::single(message, self.clock.now());
        let job_id = self.queue.enqueue(&job).await?;
        info!(
            job_id,
            inbox_id = job.message.inbox_id,
            conversation_id = job.message.conversation_id,
            "message enqueued"
        );
        Ok(Admission::Enqueued { job_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_test_utils::{TENANT_ID, TestHarness};

    fn message(inbox_id: i64, id: &str) -> NormalizedMessage {
        NormalizedMessage {
            tenant_id: TENANT_ID,
            inbox_id,
            conversation_id: 100,
            contact_address: "+15550001".into(),
            message_id: Some(id.into()),
            content: "hello".into(),
            attachments: Vec::new(),
            contact_name: Some("Ada".into()),
            received_at: Utc::now(),
        }
    }

    fn ingress(harness: &TestHarness) -> IngressService {
        IngressService::new(
            Arc::new(InboxDirectory::new(harness.db.clone())),
            harness.dedup.clone(),
            harness.locks.clone(),
            harness.buffer.clone(),
            harness.queue.clone(),
            harness.clock.clone(),
            &harness.config.lock,
        )
    }

    #[tokio::test]
    async fn enqueues_once_per_message() {
        let harness = TestHarness::builder().with_inbox(7, false).build().await.unwrap();
        let ingress = ingress(&harness);

        let first = ingress.admit(message(7, "m1")).await.unwrap();
        assert!(matches!(first, Admission::Enqueued { .. }));
        let second = ingress.admit(message(7, "m1")).await.unwrap();
        assert_eq!(second, Admission::InFlight);
        assert_eq!(harness.queue.enqueued().await.len(), 1);
    }

    #[tokio::test]
    async fn processed_messages_are_rejected() {
        let harness = TestHarness::builder().with_inbox(7, false).build().await.unwrap();
        harness.dedup.mark_processed(7, Some("m1")).await.unwrap();

        let outcome = ingress(&harness).admit(message(7, "m1")).await.unwrap();
        assert_eq!(outcome, Admission::AlreadyProcessed);
        assert!(harness.queue.enqueued().await.is_empty());
    }

    #[tokio::test]
    async fn messages_without_identity_always_enqueue() {
        let harness = TestHarness::builder().with_inbox(7, false).build().await.unwrap();
        let ingress = ingress(&harness);
        let mut anonymous = message(7, "ignored");
        anonymous.message_id = None;

        ingress.admit(anonymous.clone()).await.unwrap();
        ingress.admit(anonymous).await.unwrap();
        assert_eq!(harness.queue.enqueued().await.len(), 2);
    }

    #[tokio::test]
    async fn buffered_inboxes_do_not_enqueue_immediately() {
        let harness = TestHarness::builder().with_inbox(3, true).build().await.unwrap();
        let ingress = ingress(&harness);

        let outcome = ingress.admit(message(3, "img1")).await.unwrap();
        assert_eq!(outcome, Admission::Buffered { buffer_size: 1 });
        assert!(harness.queue.enqueued().await.is_empty());
    }

    #[tokio::test]
    async fn failed_enqueue_leaves_redelivery_admissible() {
        let harness = TestHarness::builder().with_inbox(7, false).build().await.unwrap();
        let ingress = ingress(&harness);
        harness.queue.refuse_enqueues(1).await;

        let err = ingress.admit(message(7, "m1")).await.unwrap_err();
        assert!(matches!(err, ParleyError::Queue { .. }));
        let retried = ingress.admit(message(7, "m1")).await.unwrap();
        assert!(matches!(retried, Admission::Enqueued { .. }));
        assert_eq!(harness.queue.enqueued().await.len(), 1);

        let duplicate = ingress.admit(message(7, "m1")).await.unwrap();
        assert_eq!(duplicate, Admission::InFlight);
    }

    #[tokio::test]
    async fn unknown_inbox_is_not_found() {
        let harness = TestHarness::builder().with_inbox(7, false).build().await.unwrap();
        let err = ingress(&harness).admit(message(8, "m1")).await.unwrap_err();
        assert!(matches!(err, ParleyError::NotFound { entity: "inbox", .. }));
    }

    #[tokio::test]
    async fn tenant_mismatch_is_rejected() {
        let harness = TestHarness::builder().with_inbox(7, false).build().await.unwrap();
        let mut foreign = message(7, "m1");
        foreign.tenant_id = TENANT_ID + 1;
        let err = ingress(&harness).admit(foreign).await.unwrap_err();
        assert!(matches!(err, ParleyError::Validation(_)));
    }
}
