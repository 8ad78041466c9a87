// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use parley_config::model::ChannelConfig;
use parley_core::types::{InboxContext, OutboundContent, ProviderMessageId};
use parley_core::{MessagingChannel, ParleyError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{build_client, read_json, trim_base};

/// Cloud-messaging channel client.
///
/// Sends to `POST {base}/{sender_id}/messages` with the tenant's channel token
/// and reads the provider id from `messages[0].id`.
#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SendBody<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(flatten)]
    payload: Value,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

impl HttpChannel {
    pub fn new(config: &ChannelConfig) -> Result<Self, ParleyError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: trim_base(&config.base_url),
        })
    }
}

fn channel_error(message: String) -> ParleyError {
    ParleyError::Channel {
        message,
        source: None,
    }
}

fn body<'a>(to: &'a str, content: &'a OutboundContent) -> SendBody<'a> {
    let (kind, payload) = match content {
        OutboundContent::Text { text } => ("text", json!({ "text": { "body": text } })),
        OutboundContent::Media { kind, url, caption } => {
            let mut media = json!({ "link": url });
            if let Some(caption) = caption {
                media["caption"] = json!(caption);
            }
            let mut payload = serde_json::Map::new();
            payload.insert(kind.clone(), media);
            (kind.as_str(), Value::Object(payload))
        }
    };
    SendBody {
        messaging_product: "whatsapp",
        recipient_type: "individual",
        to,
        kind,
        payload,
    }
}

#[async_trait]
impl MessagingChannel for HttpChannel {
    async fn send(
        &self,
        inbox: &InboxContext,
        to: &str,
        content: &OutboundContent,
    ) -> Result<ProviderMessageId, ParleyError> {
        let (Some(token), Some(sender)) = (
            inbox.tenant.channel_api_token.as_deref(),
            inbox.inbox.channel_sender_id.as_deref(),
        ) else {
            return Err(ParleyError::Validation(format!(
                "inbox {} has no channel credentials",
                inbox.inbox.id
            )));
        };

        let url = format!("{}/{sender}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body(to, content))
            .send()
            .await
            .map_err(|e| ParleyError::Channel {
                message: format!("HTTP request failed: {e}"),
                source: Some(Box::new(e)),
            })?;
        debug!(inbox_id = inbox.inbox.id, status = %response.status(), "channel responded");

        let sent = read_json::<SendResponse>(response)
            .await
            .map_err(|e| ParleyError::Channel {
                message: format!("failed to parse channel response: {e}"),
                source: Some(Box::new(e)),
            })?
            .map_err(|rejected| channel_error(rejected.to_string()))?;
        sent.messages
            .into_iter()
            .next()
            .map(|m| ProviderMessageId(m.id))
            .ok_or_else(|| channel_error("channel response carried no message id".into()))
    }
}
