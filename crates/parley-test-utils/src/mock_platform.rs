// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock conversation platform with settable conversation snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use parley_core::types::{ConversationSnapshot, ConversationStatus, InboxContext};
use parley_core::{ConversationPlatform, ParleyError};

/// A note posted through [`MockPlatform::post_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedNote {
    pub account_id: i64,
    pub conversation_id: i64,
    pub content: String,
    pub is_private: bool,
}

#[derive(Default)]
struct State {
    conversations: HashMap<i64, ConversationSnapshot>,
    notes: Vec<PostedNote>,
    lookups: usize,
    fail_posts: bool,
}

#[derive(Clone, Default)]
pub struct MockPlatform {
    state: Arc<Mutex<State>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_conversation(&self, conversation_id: i64, snapshot: ConversationSnapshot) {
        self.state
            .lock()
            .await
            .conversations
            .insert(conversation_id, snapshot);
    }

    /// Shorthand for an open, unassigned conversation last active at `last_activity_at`.
    pub async fn set_open(&self, conversation_id: i64, last_activity_at: DateTime<Utc>) {
        self.set_conversation(
            conversation_id,
            ConversationSnapshot {
                status: ConversationStatus::Open,
                assignee_id: None,
                team_id: None,
                last_activity_at,
            },
        )
        .await;
    }

    pub async fn notes(&self) -> Vec<PostedNote> {
        self.state.lock().await.notes.clone()
    }

    pub async fn lookup_count(&self) -> usize {
        self.state.lock().await.lookups
    }

    pub async fn set_fail_posts(&self, fail: bool) {
        self.state.lock().await.fail_posts = fail;
    }
}

#[async_trait]
impl ConversationPlatform for MockPlatform {
    async fn get_conversation(
        &self,
        _inbox: &InboxContext,
        _account_id: i64,
        conversation_id: i64,
    ) -> Result<ConversationSnapshot, ParleyError> {
        let mut state = self.state.lock().await;
        state.lookups += 1;
        state
            .conversations
            .get(&conversation_id)
            .cloned()
            .ok_or(ParleyError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            })
    }

    async fn post_message(
        &self,
        _inbox: &InboxContext,
        account_id: i64,
        conversation_id: i64,
        content: &str,
        is_private: bool,
    ) -> Result<(), ParleyError> {
        let mut state = self.state.lock().await;
        if state.fail_posts {
            return Err(ParleyError::Platform {
                message: "mock platform unavailable".into(),
                source: None,
            });
        }
        state.notes.push(PostedNote {
            account_id,
            conversation_id,
            content: content.to_string(),
            is_private,
        });
        Ok(())
    }
}
