// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use parley_config::model::BotEngineConfig;
use parley_core::types::{Attachment, ChatTurn, StartChatRequest};
use parley_core::{BotEngine, ParleyError};
use serde::Serialize;
use tracing::debug;

use super::{build_client, read_json, trim_base};

/// Bot engine client.
///
/// - `POST {base}/bots/{bot_id}/startChat` with a [`StartChatRequest`]
/// - `POST {base}/sessions/{id}/continueChat` with `{text, attachments}`
/// - `POST {base}/sessions/{id}/command` with `{command}`
///
/// Every call answers with a [`ChatTurn`]. A 404 on a session route means the
/// engine forgot the session.
#[derive(Debug, Clone)]
pub struct HttpBotEngine {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct ContinueBody<'a> {
    text: &'a str,
    attachments: &'a [Attachment],
}

#[derive(Serialize)]
struct CommandBody<'a> {
    command: &'a str,
}

impl HttpBotEngine {
    pub fn new(config: &BotEngineConfig) -> Result<Self, ParleyError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: trim_base(&config.base_url),
            api_token: config.api_token.clone().filter(|t| !t.is_empty()),
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: String,
        body: &B,
        session_id: Option<&str>,
    ) -> Result<ChatTurn, ParleyError> {
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| ParleyError::BotEngine {
            message: format!("HTTP request failed: {e}"),
            source: Some(Box::new(e)),
        })?;
        debug!(url = %url, status = %response.status(), "bot engine responded");

        match read_json::<ChatTurn>(response).await {
            Ok(Ok(turn)) => Ok(turn),
            Ok(Err(rejected)) => match session_id {
                Some(id) if rejected.status == reqwest::StatusCode::NOT_FOUND => {
                    Err(ParleyError::BotSessionNotFound {
                        session_id: id.to_string(),
                    })
                }
                _ => Err(ParleyError::BotEngine {
                    message: rejected.to_string(),
                    source: None,
                }),
            },
            Err(e) => Err(ParleyError::BotEngine {
                message: format!("failed to parse bot engine response: {e}"),
                source: Some(Box::new(e)),
            }),
        }
    }
}

#[async_trait]
impl BotEngine for HttpBotEngine {
    async fn start_chat(
        &self,
        bot_id: &str,
        request: StartChatRequest,
    ) -> Result<ChatTurn, ParleyError> {
        let url = format!("{}/bots/{bot_id}/startChat", self.base_url);
        self.post(url, &request, None).await
    }

    async fn continue_chat(
        &self,
        session_id: &str,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<ChatTurn, ParleyError> {
        let url = format!("{}/sessions/{session_id}/continueChat", self.base_url);
        self.post(url, &ContinueBody { text, attachments }, Some(session_id))
            .await
    }

    async fn send_command(
        &self,
        session_id: &str,
        command: &str,
    ) -> Result<ChatTurn, ParleyError> {
        let url = format!("{}/sessions/{session_id}/command", self.base_url);
        self.post(url, &CommandBody { command }, Some(session_id))
            .await
    }
}
