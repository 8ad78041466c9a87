// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation platform webhook envelopes.
//!
//! Three events are routed:
//! - `message_created`: an incoming, public end-user message.
//! - `conversation_status_changed`: resolution closes the conversation's sessions.
//! - `conversation_updated`: an assignee or team pauses the bot, clearing both resumes it.
//!
//! Everything else (outgoing or private messages, unknown events) is irrelevant.

use chrono::{DateTime, Utc};
use parley_core::types::{Attachment, ConversationStatus, NormalizedMessage};
use serde::Deserialize;

/// Platforms whose webhook envelope this module understands.
pub const SUPPORTED_PLATFORMS: &[&str] = &["chatwoot"];

/// Why a payload was not routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The body is not a well-formed envelope.
    Malformed(String),
    /// A well-formed event that Parley does not act on.
    Irrelevant(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Malformed(reason) => write!(f, "malformed payload: {reason}"),
            Rejection::Irrelevant(reason) => write!(f, "irrelevant event: {reason}"),
        }
    }
}

/// An inbound message before the tenant is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub account_id: Option<i64>,
    pub inbox_id: i64,
    pub conversation_id: i64,
    pub contact_address: String,
    pub message_id: Option<String>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub contact_name: Option<String>,
}

impl InboundMessage {
    pub fn into_normalized(self, tenant_id: i64, received_at: DateTime<Utc>) -> NormalizedMessage {
        NormalizedMessage {
            tenant_id,
            inbox_id: self.inbox_id,
            conversation_id: self.conversation_id,
            contact_address: self.contact_address,
            message_id: self.message_id,
            content: self.content,
            attachments: self.attachments,
            contact_name: self.contact_name,
            received_at,
        }
    }
}

/// A routed platform event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Message(InboundMessage),
    StatusChanged {
        inbox_id: i64,
        conversation_id: i64,
        status: ConversationStatus,
    },
    AssignmentChanged {
        inbox_id: i64,
        conversation_id: i64,
        assigned: bool,
    },
}

impl PlatformEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PlatformEvent::Message(_) => "message_created",
            PlatformEvent::StatusChanged { .. } => "conversation_status_changed",
            PlatformEvent::AssignmentChanged { .. } => "conversation_updated",
        }
    }

    pub fn inbox_id(&self) -> i64 {
        match self {
            PlatformEvent::Message(m) => m.inbox_id,
            PlatformEvent::StatusChanged { inbox_id, .. }
            | PlatformEvent::AssignmentChanged { inbox_id, .. } => *inbox_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    inbox_id: Option<i64>,
    #[serde(default)]
    account: Option<Ref>,
    #[serde(default)]
    inbox: Option<Ref>,
    #[serde(default)]
    conversation: Option<ConversationRef>,
    #[serde(default)]
    sender: Option<Contact>,
    #[serde(default)]
    meta: Option<Meta>,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
}

#[derive(Debug, Deserialize)]
struct Ref {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ConversationRef {
    id: i64,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    sender: Option<Contact>,
    #[serde(default)]
    assignee: Option<Ref>,
    #[serde(default)]
    team: Option<Ref>,
}

#[derive(Debug, Clone, Deserialize)]
struct Contact {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
}

impl Contact {
    fn address(&self) -> Option<String> {
        self.phone_number
            .as_deref()
            .or(self.identifier.as_deref())
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    data_url: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
}

/// Parses a webhook body into a routed event.
pub fn parse_event(body: &[u8]) -> Result<PlatformEvent, Rejection> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| Rejection::Malformed(e.to_string()))?;
    match envelope.event.as_str() {
        "message_created" => parse_message(envelope).map(PlatformEvent::Message),
        "conversation_status_changed" => parse_status(envelope),
        "conversation_updated" => parse_assignment(envelope),
        other => Err(Rejection::Irrelevant(format!("event `{other}`"))),
    }
}

fn parse_message(envelope: Envelope) -> Result<InboundMessage, Rejection> {
    if envelope.message_type.as_deref() != Some("incoming") {
        return Err(Rejection::Irrelevant("not an incoming message".into()));
    }
    if envelope.private {
        return Err(Rejection::Irrelevant("private note".into()));
    }
    let inbox_id = envelope
        .inbox
        .as_ref()
        .map(|i| i.id)
        .or(envelope.inbox_id)
        .ok_or_else(|| Rejection::Malformed("missing inbox id".into()))?;
    let conversation = envelope
        .conversation
        .ok_or_else(|| Rejection::Malformed("missing conversation".into()))?;
    let contact = envelope
        .sender
        .or_else(|| conversation.meta.and_then(|m| m.sender))
        .ok_or_else(|| Rejection::Malformed("missing sender".into()))?;
    let contact_address = contact
        .address()
        .ok_or_else(|| Rejection::Malformed("sender has no address".into()))?;

    let attachments: Vec<Attachment> = envelope
        .attachments
        .into_iter()
        .filter_map(|a| {
            Some(Attachment {
                kind: a.file_type.unwrap_or_else(|| "file".into()),
                url: a.data_url?,
                mime_type: a.content_type,
                file_name: a.file_name,
            })
        })
        .collect();
    let content = envelope.content.unwrap_or_default();
    if content.trim().is_empty() && attachments.is_empty() {
        return Err(Rejection::Irrelevant("empty message".into()));
    }

    Ok(InboundMessage {
        account_id: envelope.account.map(|a| a.id),
        inbox_id,
        conversation_id: conversation.id,
        contact_address,
        message_id: envelope.id.as_ref().and_then(id_string),
        content,
        attachments,
        contact_name: contact.name.filter(|n| !n.trim().is_empty()),
    })
}

fn conversation_ids(envelope: &Envelope) -> Result<(i64, i64), Rejection> {
    let inbox_id = envelope
        .inbox_id
        .or(envelope.inbox.as_ref().map(|i| i.id))
        .ok_or_else(|| Rejection::Malformed("missing inbox id".into()))?;
    let conversation_id = envelope
        .id
        .as_ref()
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| Rejection::Malformed("missing conversation id".into()))?;
    Ok((inbox_id, conversation_id))
}

fn parse_status(envelope: Envelope) -> Result<PlatformEvent, Rejection> {
    let (inbox_id, conversation_id) = conversation_ids(&envelope)?;
    let raw = envelope
        .status
        .ok_or_else(|| Rejection::Malformed("missing status".into()))?;
    let status = raw
        .parse::<ConversationStatus>()
        .map_err(|_| Rejection::Malformed(format!("unknown status `{raw}`")))?;
    Ok(PlatformEvent::StatusChanged {
        inbox_id,
        conversation_id,
        status,
    })
}

fn parse_assignment(envelope: Envelope) -> Result<PlatformEvent, Rejection> {
    let (inbox_id, conversation_id) = conversation_ids(&envelope)?;
    let meta = envelope.meta.unwrap_or_default();
    Ok(PlatformEvent::AssignmentChanged {
        inbox_id,
        conversation_id,
        assigned: meta.assignee.is_some() || meta.team.is_some(),
    })
}

fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
