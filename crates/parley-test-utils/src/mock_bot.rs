// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock bot engine for deterministic testing.
//!
//! `MockBotEngine` records every call and answers from a FIFO of scripted
//! turns. When the script is empty it echoes the input as a single text
//! message. Tokens can be marked unknown to exercise stale-session recovery.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley_core::types::{Attachment, BotMessage, ChatTurn, OutboundContent, StartChatRequest};
use parley_core::{BotEngine, ParleyError};

/// One recorded bot-engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCall {
    Start {
        bot_id: String,
        request: StartChatRequest,
    },
    Continue {
        session_id: String,
        text: String,
    },
    Command {
        session_id: String,
        command: String,
    },
}

#[derive(Default)]
struct State {
    calls: Vec<BotCall>,
    script: VecDeque<ChatTurn>,
    unknown_sessions: HashSet<String>,
    transient_failures: u32,
    started: u32,
}

#[derive(Clone, Default)]
pub struct MockBotEngine {
    state: Arc<Mutex<State>>,
}

impl MockBotEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a turn to return from the next call.
    pub async fn push_turn(&self, turn: ChatTurn) {
        self.state.lock().await.script.push_back(turn);
    }

    /// Makes the engine report `session_id` as unknown from now on.
    pub async fn forget_session(&self, session_id: &str) {
        self.state
            .lock()
            .await
            .unknown_sessions
            .insert(session_id.to_string());
    }

    /// The next `n` calls fail with a retryable error.
    pub async fn fail_next(&self, n: u32) {
        self.state.lock().await.transient_failures = n;
    }

    pub async fn calls(&self) -> Vec<BotCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    /// Builds a turn carrying plain text messages.
    pub fn text_turn(session_id: &str, texts: &[&str]) -> ChatTurn {
        ChatTurn {
            session_id: session_id.to_string(),
            result_id: Some(format!("result-{session_id}")),
            messages: texts
                .iter()
                .map(|t| BotMessage {
                    content: OutboundContent::Text {
                        text: (*t).to_string(),
                    },
                    wait_ms: None,
                })
                .collect(),
            input: None,
        }
    }

    async fn respond(
        &self,
        call: BotCall,
        session_id: Option<&str>,
        echo: &str,
    ) -> Result<ChatTurn, ParleyError> {
        let mut state = self.state.lock().await;
        state.calls.push(call);
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(ParleyError::BotEngine {
                message: "mock bot engine unavailable".into(),
                source: None,
            });
        }
        if let Some(id) = session_id
            && state.unknown_sessions.contains(id)
        {
            return Err(ParleyError::BotSessionNotFound {
                session_id: id.to_string(),
            });
        }
        if let Some(turn) = state.script.pop_front() {
            return Ok(turn);
        }
        let id = match session_id {
            Some(id) => id.to_string(),
            None => {
                state.started += 1;
                format!("bot-session-{}", state.started)
            }
        };
        Ok(Self::text_turn(&id, &[&format!("echo: {echo}")]))
    }
}

#[async_trait]
impl BotEngine for MockBotEngine {
    async fn start_chat(
        &self,
        bot_id: &str,
        request: StartChatRequest,
    ) -> Result<ChatTurn, ParleyError> {
        let echo = request.message.clone().unwrap_or_default();
        self.respond(
            BotCall::Start {
                bot_id: bot_id.to_string(),
                request,
            },
            None,
            &echo,
        )
        .await
    }

    async fn continue_chat(
        &self,
        session_id: &str,
        text: &str,
        _attachments: &[Attachment],
    ) -> Result<ChatTurn, ParleyError> {
        self.respond(
            BotCall::Continue {
                session_id: session_id.to_string(),
                text: text.to_string(),
            },
            Some(session_id),
            text,
        )
        .await
    }

    async fn send_command(
        &self,
        session_id: &str,
        command: &str,
    ) -> Result<ChatTurn, ParleyError> {
        self.respond(
            BotCall::Command {
                session_id: session_id.to_string(),
                command: command.to_string(),
            },
            Some(session_id),
            command,
        )
        .await
    }
}
