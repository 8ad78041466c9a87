// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_config::model::PlatformConfig;
use parley_core::types::{ConversationSnapshot, ConversationStatus, InboxContext};
use parley_core::{ConversationPlatform, ParleyError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{build_client, read_json, trim_base};

/// Conversation platform client, authenticated per tenant with `api_access_token`.
#[derive(Debug, Clone)]
pub struct HttpPlatform {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ConversationBody {
    status: ConversationStatus,
    #[serde(default)]
    meta: ConversationMeta,
    /// Unix seconds.
    last_activity_at: i64,
}

#[derive(Deserialize, Default)]
struct ConversationMeta {
    #[serde(default)]
    assignee: Option<Ref>,
    #[serde(default)]
    team: Option<Ref>,
}

#[derive(Deserialize)]
struct Ref {
    id: i64,
}

#[derive(Serialize)]
struct PostBody<'a> {
    content: &'a str,
    message_type: &'static str,
    private: bool,
}

fn platform_error(message: String) -> ParleyError {
    ParleyError::Platform {
        message,
        source: None,
    }
}

impl HttpPlatform {
    pub fn new(config: &PlatformConfig) -> Result<Self, ParleyError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: trim_base(&config.base_url),
        })
    }

    fn conversation_url(&self, account_id: i64, conversation_id: i64) -> String {
        format!(
            "{}/api/v1/accounts/{account_id}/conversations/{conversation_id}",
            self.base_url
        )
    }
}

fn token(inbox: &InboxContext) -> Result<&str, ParleyError> {
    inbox
        .tenant
        .platform_api_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ParleyError::Validation(format!(
                "tenant {} has no platform credentials",
                inbox.tenant.id
            ))
        })
}

fn send_error(e: reqwest::Error) -> ParleyError {
    ParleyError::Platform {
        message: format!("HTTP request failed: {e}"),
        source: Some(Box::new(e)),
    }
}

#[async_trait]
impl ConversationPlatform for HttpPlatform {
    async fn get_conversation(
        &self,
        inbox: &InboxContext,
        account_id: i64,
        conversation_id: i64,
    ) -> Result<ConversationSnapshot, ParleyError> {
        let response = self
            .client
            .get(self.conversation_url(account_id, conversation_id))
            .header("api_access_token", token(inbox)?)
            .send()
            .await
            .map_err(send_error)?;
        debug!(conversation_id, status = %response.status(), "platform conversation fetched");

        let body = match read_json::<ConversationBody>(response).await {
            Ok(Ok(body)) => body,
            Ok(Err(rejected)) if rejected.status == reqwest::StatusCode::NOT_FOUND => {
                return Err(ParleyError::NotFound {
                    entity: "conversation",
                    id: conversation_id.to_string(),
                });
            }
            Ok(Err(rejected)) => return Err(platform_error(rejected.to_string())),
            Err(e) => {
                return Err(ParleyError::Platform {
                    message: format!("failed to parse conversation: {e}"),
                    source: Some(Box::new(e)),
                });
            }
        };

        let last_activity_at = DateTime::<Utc>::from_timestamp(body.last_activity_at, 0)
            .ok_or_else(|| {
                platform_error(format!(
                    "conversation {conversation_id} has an invalid activity time"
                ))
            })?;
        Ok(ConversationSnapshot {
            status: body.status,
            assignee_id: body.meta.assignee.map(|a| a.id),
            team_id: body.meta.team.map(|t| t.id),
            last_activity_at,
        })
    }

    async fn post_message(
        &self,
        inbox: &InboxContext,
        account_id: i64,
        conversation_id: i64,
        content: &str,
        is_private: bool,
    ) -> Result<(), ParleyError> {
        let url = format!("{}/messages", self.conversation_url(account_id, conversation_id));
        let response = self
            .client
            .post(url)
            .header("api_access_token", token(inbox)?)
            .json(&PostBody {
                content,
                message_type: "outgoing",
                private: is_private,
            })
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(platform_error(format!("API returned {status}: {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::{InboxConfig, TenantConfig};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inbox() -> InboxContext {
        InboxContext {
            inbox: InboxConfig {
                id: 7,
                tenant_id: 1,
                name: "Support".into(),
                bot_id: "flow-7".into(),
                channel_sender_id: None,
                buffer_enabled: false,
                auto_close_hours: None,
                active: true,
            },
            tenant: TenantConfig {
                id: 1,
                name: "Acme".into(),
                platform_account_id: Some(11),
                platform_api_token: Some("platform-token".into()),
                channel_api_token: None,
            },
        }
    }

    fn client(server: &MockServer) -> HttpPlatform {
        HttpPlatform::new(&PlatformConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn reads_conversation_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/accounts/11/conversations/100"))
            .and(header("api_access_token", "platform-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 100,
                "status": "open",
                "meta": {"assignee": null, "team": {"id": 4, "name": "Sales"}},
                "last_activity_at": 1_700_000_000
            })))
            .mount(&server)
            .await;

        let snapshot = client(&server).get_conversation(&inbox(), 11, 100).await.unwrap();
        assert_eq!(snapshot.status, ConversationStatus::Open);
        assert_eq!(snapshot.assignee_id, None);
        assert_eq!(snapshot.team_id, Some(4));
        assert_eq!(snapshot.last_activity_at.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let err = client(&server).get_conversation(&inbox(), 11, 5).await.unwrap_err();
        assert!(matches!(err, ParleyError::NotFound { entity: "conversation", .. }));
    }

    #[tokio::test]
    async fn posts_private_note() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/accounts/11/conversations/100/messages"))
            .and(body_json(json!({
                "content": "trigger fired",
                "message_type": "outgoing",
                "private": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .post_message(&inbox(), 11, 100, "trigger fired", true)
            .await
            .unwrap();
    }
}
