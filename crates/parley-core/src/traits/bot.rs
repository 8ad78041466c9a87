// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversational-flow engine client.

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::types::{Attachment, ChatTurn, StartChatRequest};

/// Client for the bot engine that owns flow state.
///
/// Implementations must return [`ParleyError::BotSessionNotFound`] when the
/// engine no longer recognizes a session token, so callers can recover by
/// starting a fresh flow.
#[async_trait]
pub trait BotEngine: Send + Sync + 'static {
    async fn start_chat(
        &self,
        bot_id: &str,
        request: StartChatRequest,
    ) -> Result<ChatTurn, ParleyError>;

    async fn continue_chat(
        &self,
        session_id: &str,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<ChatTurn, ParleyError>;

    /// Sends a named command (a trigger name) into a running flow.
    async fn send_command(&self, session_id: &str, command: &str)
    -> Result<ChatTurn, ParleyError>;
}
