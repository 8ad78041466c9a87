// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the ingestion, session and scheduling services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A media attachment carried by an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment kind as reported upstream (`image`, `audio`, `video`, `file`).
    pub kind: String,
    /// Publicly fetchable URL of the media.
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// The canonical inbound unit produced by a webhook normalizer.
///
/// Immutable once produced. Deduplication identity is `(inbox_id, message_id)`;
/// a message without an id skips deduplication entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub tenant_id: i64,
    pub inbox_id: i64,
    pub conversation_id: i64,
    /// End-user address on the outbound channel (phone number, handle).
    pub contact_address: String,
    #[serde(default)]
    pub message_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub contact_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl NormalizedMessage {
    /// Returns the deduplication identity, or `None` when the upstream payload had no id.
    pub fn dedup_identity(&self) -> Option<(i64, &str)> {
        match self.message_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Some((self.inbox_id, id)),
            _ => None,
        }
    }

    /// The conversation thread this message belongs to.
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey {
            tenant_id: self.tenant_id,
            inbox_id: self.inbox_id,
            conversation_id: self.conversation_id,
            contact_address: self.contact_address.clone(),
        }
    }
}

/// Identifies one end-user thread: (tenant, inbox, conversation, end-user).
///
/// At most one `active` session exists per key at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub tenant_id: i64,
    pub inbox_id: i64,
    pub conversation_id: i64,
    pub contact_address: String,
}

/// Lifecycle state of a bot session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Paused,
    Expired,
    Closed,
}

impl SessionState {
    /// Closed and expired sessions never change state again.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Closed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Active, Paused) | (Paused, Active) => true,
            (Active | Paused, Closed) | (Active | Paused, Expired) => true,
            (Active, Active) | (Paused, Paused) => true,
            _ => false,
        }
    }
}

/// Metadata about the last scheduled trigger that fired on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastTrigger {
    pub trigger_id: i64,
    pub trigger_name: String,
    pub fired_at: DateTime<Utc>,
}

/// One bot conversation instance, as persisted in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub tenant_id: i64,
    pub inbox_id: i64,
    pub conversation_id: i64,
    pub contact_address: String,
    pub contact_name: Option<String>,
    /// Opaque token issued by the bot engine.
    pub bot_session_id: String,
    pub bot_result_id: Option<String>,
    pub state: SessionState,
    pub last_trigger: Option<LastTrigger>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey {
            tenant_id: self.tenant_id,
            inbox_id: self.inbox_id,
            conversation_id: self.conversation_id,
            contact_address: self.contact_address.clone(),
        }
    }
}

/// Maps a reply the end user may type (a number or a label) onto a bot choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceEdge {
    /// Normalized key the reply is matched against (`"1"`, `"yes please"`).
    pub choice_key: String,
    /// The label forwarded to the bot engine when the key matches.
    pub label: String,
    pub edge_id: Option<String>,
}

/// A unit of work on the durable queue.
///
/// `message` is the first-arrived message of the batch and the only one that
/// drives the bot engine; `batch` carries every buffered message for the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestJob {
    pub message: NormalizedMessage,
    #[serde(default)]
    pub batch: Vec<NormalizedMessage>,
    pub enqueued_at: DateTime<Utc>,
}

impl IngestJob {
    /// A single-message job, used when buffering is disabled for the inbox.
    pub fn single(message: NormalizedMessage, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            batch: vec![message.clone()],
            message,
            enqueued_at,
        }
    }
}

/// Identifier assigned by the durable queue.
pub type JobId = i64;

/// A job handed out by [`JobQueue::dequeue`](crate::traits::JobQueue::dequeue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: JobId,
    pub job: IngestJob,
    /// Attempts already made before this delivery.
    pub attempts: u32,
}

/// What the queue did with a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailDisposition {
    /// Job goes back to pending and becomes visible at `retry_at`.
    Retrying {
        attempts: u32,
        retry_at: DateTime<Utc>,
    },
    /// Attempts exhausted; job moved to the dead-letter state.
    DeadLettered { attempts: u32 },
}

/// Scheduled idle-check rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub id: i64,
    /// Doubles as the bot-engine command name.
    pub name: String,
    pub idle_minutes: u32,
    /// Minutes between evaluations; always at least 1.
    pub check_frequency_minutes: u32,
    pub active: bool,
    pub require_no_assignee: bool,
    pub inbox_ids: Vec<i64>,
}

/// Tenant-level credentials and identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: i64,
    pub name: String,
    pub platform_account_id: Option<i64>,
    pub platform_api_token: Option<String>,
    pub channel_api_token: Option<String>,
}

/// Inbox-level routing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxConfig {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    /// Bot-engine flow started for new sessions on this inbox.
    pub bot_id: String,
    /// Sender identity on the outbound channel (phone-number id, bot handle).
    pub channel_sender_id: Option<String>,
    pub buffer_enabled: bool,
    pub auto_close_hours: Option<u32>,
    pub active: bool,
}

/// Inbox plus its tenant, as resolved for a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxContext {
    pub inbox: InboxConfig,
    pub tenant: TenantConfig,
}

impl InboxContext {
    /// Platform account id, if the tenant is fully configured for platform calls.
    pub fn platform_account(&self) -> Option<i64> {
        match (&self.tenant.platform_api_token, self.tenant.platform_account_id) {
            (Some(token), Some(account)) if !token.is_empty() => Some(account),
            _ => None,
        }
    }

    /// Whether outbound channel credentials are present.
    pub fn has_channel_credentials(&self) -> bool {
        self.tenant
            .channel_api_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
            && self.inbox.channel_sender_id.is_some()
    }
}

/// Upstream conversation status on the conversation platform.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Pending,
    Resolved,
    Snoozed,
}

/// A point-in-time view of an upstream conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub status: ConversationStatus,
    pub assignee_id: Option<i64>,
    pub team_id: Option<i64>,
    pub last_activity_at: DateTime<Utc>,
}

/// Content sent to the end user on the outbound channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundContent {
    Text { text: String },
    Media {
        kind: String,
        url: String,
        caption: Option<String>,
    },
}

/// One message produced by a bot-engine turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotMessage {
    pub content: OutboundContent,
    /// Upstream-specified pause before sending this message.
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

/// A selectable option in a bot choice input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceItem {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub outgoing_edge_id: Option<String>,
}

/// The input the bot engine is waiting for after a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotInput {
    pub kind: String,
    #[serde(default)]
    pub choices: Vec<ChoiceItem>,
}

impl BotInput {
    /// Builds the reply-to-choice mappings stored with the session.
    ///
    /// Each choice is reachable by its 1-based position and by its lowercased label.
    pub fn choice_edges(&self) -> Vec<ChoiceEdge> {
        let mut edges = Vec::with_capacity(self.choices.len() * 2);
        for (idx, choice) in self.choices.iter().enumerate() {
            edges.push(ChoiceEdge {
                choice_key: (idx + 1).to_string(),
                label: choice.label.clone(),
                edge_id: choice.outgoing_edge_id.clone(),
            });
            let label_key = choice.label.trim().to_lowercase();
            if !label_key.is_empty() && label_key != (idx + 1).to_string() {
                edges.push(ChoiceEdge {
                    choice_key: label_key,
                    label: choice.label.clone(),
                    edge_id: choice.outgoing_edge_id.clone(),
                });
            }
        }
        edges
    }
}

/// Request for starting a new bot flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartChatRequest {
    /// First user message, forwarded so the flow can consume it immediately.
    pub message: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Variables prefilled into the flow (contact name, address, conversation id).
    #[serde(default)]
    pub prefilled: Vec<(String, String)>,
}

/// The shape every bot-engine call returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub session_id: String,
    pub result_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<BotMessage>,
    #[serde(default)]
    pub input: Option<BotInput>,
}

/// Identifier the outbound channel assigned to a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderMessageId(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn message(id: Option<&str>) -> NormalizedMessage {
        NormalizedMessage {
            tenant_id: 1,
            inbox_id: 7,
            conversation_id: 100,
            contact_address: "+15550001".into(),
            message_id: id.map(str::to_string),
            content: "hi".into(),
            attachments: vec![],
            contact_name: None,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn dedup_identity_requires_message_id() {
        assert_eq!(message(Some("m1")).dedup_identity(), Some((7, "m1")));
        assert_eq!(message(None).dedup_identity(), None);
        assert_eq!(message(Some("  ")).dedup_identity(), None);
    }

    #[test]
    fn session_state_round_trips_through_strings() {
        for state in [
            SessionState::Active,
            SessionState::Paused,
            SessionState::Expired,
            SessionState::Closed,
        ] {
            let parsed = SessionState::from_str(&state.to_string()).unwrap();
            assert_eq!(parsed, state);
        }
        assert_eq!(SessionState::Active.to_string(), "active");
    }

    #[test]
    fn terminal_states_do_not_transition() {
        assert!(SessionState::Active.can_transition_to(SessionState::Paused));
        assert!(SessionState::Paused.can_transition_to(SessionState::Active));
        assert!(SessionState::Paused.can_transition_to(SessionState::Expired));
        assert!(!SessionState::Closed.can_transition_to(SessionState::Active));
        assert!(!SessionState::Expired.can_transition_to(SessionState::Paused));
        assert!(!SessionState::Closed.can_transition_to(SessionState::Closed));
    }

    #[test]
    fn choice_edges_index_and_label() {
        let input = BotInput {
            kind: "choice input".into(),
            choices: vec![
                ChoiceItem {
                    id: "a".into(),
                    label: "Sales".into(),
                    outgoing_edge_id: Some("e1".into()),
                },
                ChoiceItem {
                    id: "b".into(),
                    label: "Support".into(),
                    outgoing_edge_id: None,
                },
            ],
        };
        let edges = input.choice_edges();
        assert_eq!(edges.len(), 4);
        assert!(edges.iter().any(|e| e.choice_key == "1" && e.label == "Sales"));
        assert!(edges.iter().any(|e| e.choice_key == "support" && e.edge_id.is_none()));
    }

    #[test]
    fn inbox_context_credentials() {
        let ctx = InboxContext {
            inbox: InboxConfig {
                id: 7,
                tenant_id: 1,
                name: "wa".into(),
                bot_id: "flow".into(),
                channel_sender_id: Some("123".into()),
                buffer_enabled: true,
                auto_close_hours: None,
                active: true,
            },
            tenant: TenantConfig {
                id: 1,
                name: "acme".into(),
                platform_account_id: Some(3),
                platform_api_token: None,
                channel_api_token: Some("tok".into()),
            },
        };
        assert!(ctx.has_channel_credentials());
        assert_eq!(ctx.platform_account(), None);
    }
}
