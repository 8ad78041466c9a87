// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation platform (webhook source) client.

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::types::{ConversationSnapshot, InboxContext};

/// Reads conversation state from, and posts notes back to, the conversation platform.
#[async_trait]
pub trait ConversationPlatform: Send + Sync + 'static {
    async fn get_conversation(
        &self,
        inbox: &InboxContext,
        account_id: i64,
        conversation_id: i64,
    ) -> Result<ConversationSnapshot, ParleyError>;

    async fn post_message(
        &self,
        inbox: &InboxContext,
        account_id: i64,
        conversation_id: i64,
        content: &str,
        is_private: bool,
    ) -> Result<(), ParleyError>;
}
