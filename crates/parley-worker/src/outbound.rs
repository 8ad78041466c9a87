// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Paced delivery of bot replies on the messaging channel.

use std::sync::Arc;
use std::time::Duration;

use parley_config::model::OutboundConfig;
use parley_core::types::{BotMessage, InboxContext, OutboundContent, ProviderMessageId};
use parley_core::{MessagingChannel, ParleyError};
use tracing::{debug, warn};

/// A reply that reached the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub content: OutboundContent,
    pub provider_id: ProviderMessageId,
}

/// Sends the messages of one bot turn in order.
///
/// Consecutive messages are spaced by the bot's own wait hint when it gives
/// one, capped at `max_wait`, and by `message_delay` otherwise.
#[derive(Clone)]
pub struct OutboundSender {
    channel: Arc<dyn MessagingChannel>,
    message_delay: Duration,
    max_wait: Duration,
}

impl OutboundSender {
    pub fn new(channel: Arc<dyn MessagingChannel>, config: &OutboundConfig) -> Self {
        Self {
            channel,
            message_delay: Duration::from_millis(config.message_delay_ms),
            max_wait: Duration::from_millis(config.max_wait_ms),
        }
    }

    /// Pause before the message at `index`.
    pub fn pause_before(&self, index: usize, message: &BotMessage) -> Duration {
        match message.wait_ms {
            Some(ms) => Duration::from_millis(ms).min(self.max_wait),
            None if index == 0 => Duration::ZERO,
            None => self.message_delay,
        }
    }

    /// Delivers `messages` to `to`, stopping at the first channel error.
    ///
    /// An inbox without channel credentials delivers nothing and is not an
    /// error: the turn still counts as handled.
    pub async fn deliver(
        &self,
        inbox: &InboxContext,
        to: &str,
        messages: &[BotMessage],
    ) -> Result<Vec<Delivered>, ParleyError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        if !inbox.has_channel_credentials() {
            warn!(
                inbox_id = inbox.inbox.id,
                dropped = messages.len(),
                "inbox has no channel credentials, replies not sent"
            );
            return Ok(Vec::new());
        }

        let mut delivered = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            let pause = self.pause_before(index, message);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let provider_id = self.channel.send(inbox, to, &message.content).await?;
            debug!(inbox_id = inbox.inbox.id, provider_id = %provider_id.0, index, "reply sent");
            delivered.push(Delivered {
                content: message.content.clone(),
                provider_id,
            });
        }
        Ok(delivered)
    }
}
