// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Processed-message markers.
//!
//! A marker is written only after a message has been handled end to end, so
//! a crash mid-processing leaves the message eligible for redelivery. Reads
//! fail open: when the identity is missing or the store is unreachable the
//! message is treated as new.

use std::sync::Arc;
use std::time::Duration;

use parley_config::model::DedupConfig;
use parley_core::{KvStore, ParleyError};
use tracing::{debug, warn};

/// Key of the processed marker for a message.
pub fn processed_key(inbox_id: i64, message_id: &str) -> String {
    format!("processed:{inbox_id}:{message_id}")
}

fn identity(message_id: Option<&str>) -> Option<&str> {
    message_id.map(str::trim).filter(|id| !id.is_empty())
}

#[derive(Clone)]
pub struct DedupService {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl DedupService {
    pub fn new(kv: Arc<dyn KvStore>, config: &DedupConfig) -> Self {
        Self {
            kv,
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    /// Whether the message was already handled within the marker TTL.
    pub async fn is_processed(&self, inbox_id: i64, message_id: Option<&str>) -> bool {
        let Some(message_id) = identity(message_id) else {
            return false;
        };
        match self.kv.get(&processed_key(inbox_id, message_id)).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(inbox_id, message_id, error = %e, "dedup lookup failed, treating message as new");
                false
            }
        }
    }

    /// Records that the message was handled. A missing identity is a no-op.
    pub async fn mark_processed(
        &self,
        inbox_id: i64,
        message_id: Option<&str>,
    ) -> Result<(), ParleyError> {
        let Some(message_id) = identity(message_id) else {
            return Ok(());
        };
        self.kv
            .set(&processed_key(inbox_id, message_id), "1", self.ttl)
            .await?;
        debug!(inbox_id, message_id, "message marked processed");
        Ok(())
    }
}
