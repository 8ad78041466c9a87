// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Register-before-execute ledger of trigger firings.
//!
//! A firing is claimed by inserting its (conversation, trigger, bot session)
//! row; the unique constraint guarantees that only one replica wins. The
//! winner then calls the bot engine and records the outcome.

use chrono::{DateTime, Utc};
use parley_config::TriggerFailurePolicy;
use parley_config::model::SchedulerConfig;
use parley_core::ParleyError;
use parley_storage::Database;
use parley_storage::queries::triggers::{self, ClaimPolicy, ExecutionKey, ExecutionRecord};

pub fn claim_policy(config: &SchedulerConfig) -> ClaimPolicy {
    match config.failure_policy {
        TriggerFailurePolicy::PermanentSkip => ClaimPolicy::PermanentSkip,
        TriggerFailurePolicy::Retry => ClaimPolicy::Retry {
            max_attempts: config.max_attempts.max(1),
        },
    }
}

#[derive(Clone)]
pub struct TriggerLedger {
    db: Database,
    policy: ClaimPolicy,
}

impl TriggerLedger {
    pub fn new(db: Database, config: &SchedulerConfig) -> Self {
        Self {
            db,
            policy: claim_policy(config),
        }
    }

    /// Whether the caller won the right to fire. Losing is not an error.
    pub async fn claim(&self, key: &ExecutionKey, now: DateTime<Utc>) -> Result<bool, ParleyError> {
        triggers::claim(&self.db, key, self.policy, now).await
    }

    pub async fn succeeded(&self, key: &ExecutionKey, now: DateTime<Utc>) -> Result<(), ParleyError> {
        triggers::finish(&self.db, key, None, now).await
    }

    pub async fn failed(
        &self,
        key: &ExecutionKey,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ParleyError> {
        triggers::finish(&self.db, key, Some(error), now).await
    }

    pub async fn get(&self, key: &ExecutionKey) -> Result<Option<ExecutionRecord>, ParleyError> {
        triggers::execution(&self.db, key).await
    }
}
