// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock outbound channel that captures every send.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use parley_core::types::{InboxContext, OutboundContent, ProviderMessageId};
use parley_core::{MessagingChannel, ParleyError};

/// A message captured by [`MockChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub inbox_id: i64,
    pub to: String,
    pub content: OutboundContent,
    pub sent_at: Instant,
}

impl SentMessage {
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            OutboundContent::Text { text } => Some(text),
            OutboundContent::Media { .. } => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct MockChannel {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// While set, every send fails with a retryable error.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }
}

#[async_trait]
impl MessagingChannel for MockChannel {
    async fn send(
        &self,
        inbox: &InboxContext,
        to: &str,
        content: &OutboundContent,
    ) -> Result<ProviderMessageId, ParleyError> {
        if *self.failing.lock().await {
            return Err(ParleyError::Channel {
                message: "mock channel unavailable".into(),
                source: None,
            });
        }
        let mut sent = self.sent.lock().await;
        sent.push(SentMessage {
            inbox_id: inbox.inbox.id,
            to: to.to_string(),
            content: content.clone(),
            sent_at: Instant::now(),
        });
        Ok(ProviderMessageId(format!("wamid-{}", sent.len())))
    }
}
