// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory [`JobQueue`] with immediate retries.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use parley_core::types::{FailDisposition, IngestJob, JobId, QueuedJob};
use parley_core::{JobQueue, ParleyError};

#[derive(Default)]
struct State {
    next_id: JobId,
    pending: VecDeque<(JobId, IngestJob, u32)>,
    in_flight: HashMap<JobId, (IngestJob, u32)>,
    acked: Vec<JobId>,
    dead: Vec<(JobId, IngestJob)>,
    enqueued: Vec<IngestJob>,
    refused_enqueues: u32,
}

/// A queue that keeps everything in memory. Failed jobs go back to the end
/// of the line without delay until `max_attempts` is reached.
#[derive(Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
    max_attempts: u32,
}

impl MemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Every job ever enqueued, in order.
    pub async fn enqueued(&self) -> Vec<IngestJob> {
        self.state.lock().await.enqueued.clone()
    }

    /// Makes the next `count` enqueues fail with a queue error.
    pub async fn refuse_enqueues(&self, count: u32) {
        self.state.lock().await.refused_enqueues = count;
    }

    pub async fn acked(&self) -> Vec<JobId> {
        self.state.lock().await.acked.clone()
    }

    pub async fn dead_letters(&self) -> Vec<IngestJob> {
        self.state
            .lock()
            .await
            .dead
            .iter()
            .map(|(_, job)| job.clone())
            .collect()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: &IngestJob) -> Result<JobId, ParleyError> {
        let mut state = self.state.lock().await;
        if state.refused_enqueues > 0 {
            state.refused_enqueues -= 1;
            return Err(ParleyError::Queue {
                message: "queue unavailable".into(),
            });
        }
        state.next_id += 1;
        let id = state.next_id;
        state.pending.push_back((id, job.clone(), 0));
        state.enqueued.push(job.clone());
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, ParleyError> {
        let mut state = self.state.lock().await;
        let Some((id, job, attempts)) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.in_flight.insert(id, (job.clone(), attempts));
        Ok(Some(QueuedJob { id, job, attempts }))
    }

    async fn ack(&self, id: JobId) -> Result<(), ParleyError> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&id);
        state.acked.push(id);
        Ok(())
    }

    async fn fail(&self, id: JobId, _error: &str) -> Result<FailDisposition, ParleyError> {
        let mut state = self.state.lock().await;
        let (job, attempts) = state.in_flight.remove(&id).ok_or(ParleyError::NotFound {
            entity: "job",
            id: id.to_string(),
        })?;
        let attempts = attempts + 1;
        if attempts >= self.max_attempts {
            state.dead.push((id, job));
            Ok(FailDisposition::DeadLettered { attempts })
        } else {
            state.pending.push_back((id, job, attempts));
            Ok(FailDisposition::Retrying {
                attempts,
                retry_at: Utc::now(),
            })
        }
    }

    async fn pending_count(&self) -> Result<u64, ParleyError> {
        Ok(self.state.lock().await.pending.len() as u64)
    }
}
