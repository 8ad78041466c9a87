// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-message handling: session lookup-or-create, bot turn, replies.

use std::sync::Arc;

use parley_core::types::{
    BotInput, ChatTurn, ConversationKey, InboxContext, IngestJob, NormalizedMessage,
    SessionRecord, SessionState, StartChatRequest,
};
use parley_core::{BotEngine, Clock, ParleyError};
use parley_session::{SessionCacheEntry, SessionStore, reply_text};
use parley_storage::queries::message_log::{self, Direction, LogEntry};
use tracing::{debug, info, warn};

use crate::outbound::{Delivered, OutboundSender};

/// Result of handling one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The bot took a turn and its replies went out.
    Replied {
        session_id: String,
        started: bool,
        sent: usize,
    },
    /// The conversation is with a human agent; the message was only logged.
    SessionPaused { session_id: String },
}

pub struct MessageHandler {
    sessions: Arc<SessionStore>,
    bot: Arc<dyn BotEngine>,
    outbound: OutboundSender,
    clock: Arc<dyn Clock>,
}

impl MessageHandler {
    pub fn new(
        sessions: Arc<SessionStore>,
        bot: Arc<dyn BotEngine>,
        outbound: OutboundSender,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            bot,
            outbound,
            clock,
        }
    }

    /// Runs one job against the thread's session.
    ///
    /// Only the first message of a batch reaches the bot engine; the rest
    /// are recorded in the message log. Errors from the bot engine, the
    /// channel or the stores propagate so the queue retries the job.
    pub async fn handle(
        &self,
        job: &IngestJob,
        inbox: &InboxContext,
    ) -> Result<HandleOutcome, ParleyError> {
        let message = &job.message;
        let key = message.conversation_key();

        let existing = self.sessions.get_session(&key).await?;
        if let Some(entry) = &existing
            && entry.record.state == SessionState::Paused
        {
            info!(
                session_id = %entry.record.id,
                conversation_id = key.conversation_id,
                "session paused, message not forwarded"
            );
            self.log_inbound(&entry.record.id, job).await;
            return Ok(HandleOutcome::SessionPaused {
                session_id: entry.record.id.clone(),
            });
        }

        let continued = match existing {
            Some(entry) => self.continue_session(&key, entry, message).await?,
            None => None,
        };
        let (record, turn, started) = match continued {
            Some((record, turn)) => (record, turn, false),
            None => {
                let (record, turn) = self.start_session(&key, inbox, message).await?;
                (record, turn, true)
            }
        };

        let edges = turn
            .input
            .as_ref()
            .map(BotInput::choice_edges)
            .unwrap_or_default();
        let record = self.sessions.create_or_update_session(record, edges).await?;
        self.log_inbound(&record.id, job).await;
        if record.state == SessionState::Paused {
            info!(
                session_id = %record.id,
                conversation_id = key.conversation_id,
                dropped = turn.messages.len(),
                "session paused during the bot turn, replies withheld"
            );
            return Ok(HandleOutcome::SessionPaused {
                session_id: record.id,
            });
        }

        let delivered = self
            .outbound
            .deliver(inbox, &message.contact_address, &turn.messages)
            .await?;
        self.log_outbound(&record, &delivered).await;

        debug!(
            session_id = %record.id,
            started,
            sent = delivered.len(),
            "bot turn delivered"
        );
        Ok(HandleOutcome::Replied {
            session_id: record.id,
            started,
            sent: delivered.len(),
        })
    }

    /// Continues a live session. Returns `None` when the bot engine no longer
    /// knows the session, after expiring it.
    async fn continue_session(
        &self,
        key: &ConversationKey,
        entry: SessionCacheEntry,
        message: &NormalizedMessage,
    ) -> Result<Option<(SessionRecord, ChatTurn)>, ParleyError> {
        let text = reply_text(&entry.edges, &message.content);
        let turn = match self
            .bot
            .continue_chat(&entry.record.bot_session_id, &text, &message.attachments)
            .await
        {
            Ok(turn) => turn,
            Err(ParleyError::BotSessionNotFound { .. }) => {
                self.sessions.expire_stale(&entry.record).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut record = entry.record;
        if turn.session_id != record.bot_session_id {
            info!(
                session_id = %record.id,
                bot_session_id = %turn.session_id,
                "bot engine rotated the session"
            );
            record = self.sessions.new_record(
                key,
                record.contact_name.clone(),
                turn.session_id.clone(),
                turn.result_id.clone(),
            );
        } else {
            if turn.result_id.is_some() {
                record.bot_result_id = turn.result_id.clone();
            }
            if record.contact_name.is_none() {
                record.contact_name = message.contact_name.clone();
            }
            record.updated_at = self.clock.now();
        }
        Ok(Some((record, turn)))
    }

    async fn start_session(
        &self,
        key: &ConversationKey,
        inbox: &InboxContext,
        message: &NormalizedMessage,
    ) -> Result<(SessionRecord, ChatTurn), ParleyError> {
        let request = StartChatRequest {
            message: Some(message.content.clone()).filter(|c| !c.trim().is_empty()),
            attachments: message.attachments.clone(),
            prefilled: prefilled_variables(message),
        };
        let turn = self.bot.start_chat(&inbox.inbox.bot_id, request).await?;
        info!(
            inbox_id = key.inbox_id,
            conversation_id = key.conversation_id,
            bot_session_id = %turn.session_id,
            "bot session started"
        );
        let record = self.sessions.new_record(
            key,
            message.contact_name.clone(),
            turn.session_id.clone(),
            turn.result_id.clone(),
        );
        Ok((record, turn))
    }

    async fn log_inbound(&self, session_id: &str, job: &IngestJob) {
        let batch = if job.batch.is_empty() {
            std::slice::from_ref(&job.message)
        } else {
            job.batch.as_slice()
        };
        let entries: Vec<LogEntry> = batch
            .iter()
            .map(|m| LogEntry {
                session_id: Some(session_id.to_string()),
                tenant_id: m.tenant_id,
                inbox_id: m.inbox_id,
                conversation_id: m.conversation_id,
                direction: Direction::Inbound,
                message_id: m.message_id.clone(),
                provider_message_id: None,
                content: m.content.clone(),
                created_at: m.received_at,
            })
            .collect();
        self.append_log(&entries).await;
    }

    async fn log_outbound(&self, record: &SessionRecord, delivered: &[Delivered]) {
        let now = self.clock.now();
        let mut entries = Vec::with_capacity(delivered.len());
        for d in delivered {
            entries.push(LogEntry {
                session_id: Some(record.id.clone()),
                tenant_id: record.tenant_id,
                inbox_id: record.inbox_id,
                conversation_id: record.conversation_id,
                direction: Direction::Outbound,
                message_id: None,
                provider_message_id: Some(d.provider_id.0.clone()),
                content: serde_json::to_string(&d.content).unwrap_or_default(),
                created_at: now,
            });
        }
        self.append_log(&entries).await;
    }

    async fn append_log(&self, entries: &[LogEntry]) {
        if let Err(e) = message_log::append(self.sessions.database(), entries).await {
            warn!(error = %e, entries = entries.len(), "message log write failed");
        }
    }
}

/// Variables handed to a new bot flow.
fn prefilled_variables(message: &NormalizedMessage) -> Vec<(String, String)> {
    let mut vars = vec![
        ("contact_address".to_string(), message.contact_address.clone()),
        ("conversation_id".to_string(), message.conversation_id.to_string()),
        ("inbox_id".to_string(), message.inbox_id.to_string()),
    ];
    if let Some(name) = &message.contact_name {
        vars.push(("contact_name".to_string(), name.clone()));
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_core::types::{ChoiceItem, OutboundContent};
    use parley_test_utils::{BotCall, MockBotEngine, TENANT_ID, TestHarness};
    use parley_storage::queries::tenants;

    fn message(id: &str, content: &str) -> NormalizedMessage {
        NormalizedMessage {
            tenant_id: TENANT_ID,
            inbox_id: 7,
            conversation_id: 100,
            contact_address: "+15550001".into(),
            message_id: Some(id.into()),
            content: content.into(),
            attachments: Vec::new(),
            contact_name: Some("Ada".into()),
            received_at: Utc::now(),
        }
    }

    fn handler(harness: &TestHarness) -> MessageHandler {
        MessageHandler::new(
            harness.sessions.clone(),
            harness.bot.clone(),
            OutboundSender::new(harness.channel.clone(), &harness.config.outbound),
            harness.clock.clone(),
        )
    }

    async fn setup() -> (TestHarness, InboxContext) {
        let harness = TestHarness::builder().with_inbox(7, false).build().await.unwrap();
        let inbox = tenants::inbox_context(&harness.db, 7).await.unwrap().unwrap();
        (harness, inbox)
    }

    #[tokio::test]
    async fn first_message_starts_a_session() {
        let (harness, inbox) = setup().await;
        let outcome = handler(&harness)
            .handle(&IngestJob::single(message("m1", "hi"), Utc::now()), &inbox)
            .await
            .unwrap();

        let HandleOutcome::Replied { started, sent, .. } = outcome else {
            panic!("expected a reply, got {outcome:?}");
        };
        assert!(started);
        assert_eq!(sent, 1);

        let calls = harness.bot.calls().await;
        let BotCall::Start { bot_id, request } = &calls[0] else {
            panic!("expected start_chat, got {:?}", calls[0]);
        };
        assert_eq!(bot_id, "flow-7");
        assert_eq!(request.message.as_deref(), Some("hi"));
        assert!(
            request
                .prefilled
                .contains(&("contact_name".to_string(), "Ada".to_string()))
        );
        assert_eq!(
            harness.channel.sent_messages().await[0].text(),
            Some("echo: hi")
        );
    }

    #[tokio::test]
    async fn second_message_continues_the_session() {
        let (harness, inbox) = setup().await;
        let handler = handler(&harness);
        handler
            .handle(&IngestJob::single(message("m1", "hi"), Utc::now()), &inbox)
            .await
            .unwrap();
        handler
            .handle(&IngestJob::single(message("m2", "again"), Utc::now()), &inbox)
            .await
            .unwrap();

        let calls = harness.bot.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1],
            BotCall::Continue {
                session_id: "bot-session-1".into(),
                text: "again".into()
            }
        );
    }

    #[tokio::test]
    async fn pause_during_the_turn_withholds_replies() {
        let (harness, inbox) = setup().await;
        let handler = handler(&harness);
        handler
            .handle(&IngestJob::single(message("m1", "hi"), Utc::now()), &inbox)
            .await
            .unwrap();
        let key = message("m2", "again").conversation_key();
        let before_pause = harness.sessions.get_session(&key).await.unwrap().unwrap();

        // An agent takes over while a worker still holds the active snapshot.
        harness.sessions.pause_conversation(TENANT_ID, 7, 100).await.unwrap();
        harness.sessions.cache().put(&before_pause).await.unwrap();

        let outcome = handler
            .handle(&IngestJob::single(message("m2", "again"), Utc::now()), &inbox)
            .await
            .unwrap();
        assert!(matches!(outcome, HandleOutcome::SessionPaused { .. }));
        assert_eq!(harness.channel.sent_count().await, 1);
        let stored = harness
            .sessions
            .get_by_id(&before_pause.record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, SessionState::Paused);
    }

    #[tokio::test]
    async fn numeric_reply_resolves_to_choice_label() {
        let (harness, inbox) = setup().await;
        let mut turn = MockBotEngine::text_turn("bot-session-1", &["Pick one"]);
        turn.input = Some(BotInput {
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
                    outgoing_edge_id: Some("e2".into()),
                },
            ],
        });
        harness.bot.push_turn(turn).await;

        let handler = handler(&harness);
        handler
            .handle(&IngestJob::single(message("m1", "hi"), Utc::now()), &inbox)
            .await
            .unwrap();
        handler
            .handle(&IngestJob::single(message("m2", " 2 "), Utc::now()), &inbox)
            .await
            .unwrap();

        let calls = harness.bot.calls().await;
        assert_eq!(
            calls[1],
            BotCall::Continue {
                session_id: "bot-session-1".into(),
                text: "Support".into()
            }
        );
    }

    #[tokio::test]
    async fn stale_bot_session_is_replaced() {
        let (harness, inbox) = setup().await;
        let handler = handler(&harness);
        let HandleOutcome::Replied { session_id: first, .. } = handler
            .handle(&IngestJob::single(message("m1", "hi"), Utc::now()), &inbox)
            .await
            .unwrap()
        else {
            panic!("expected a reply");
        };
        harness.bot.forget_session("bot-session-1").await;

        let outcome = handler
            .handle(&IngestJob::single(message("m2", "still there?"), Utc::now()), &inbox)
            .await
            .unwrap();
        let HandleOutcome::Replied {
            session_id: second,
            started,
            ..
        } = outcome
        else {
            panic!("expected a reply, got {outcome:?}");
        };
        assert!(started);
        assert_ne!(first, second);

        let old = harness.sessions.get_by_id(&first).await.unwrap().unwrap();
        assert_eq!(old.state, SessionState::Expired);
        let live = harness
            .sessions
            .get_session(&message("m3", "").conversation_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.record.id, second);
        assert_eq!(live.record.bot_session_id, "bot-session-2");
    }

    #[tokio::test]
    async fn paused_session_only_logs() {
        let (harness, inbox) = setup().await;
        let handler = handler(&harness);
        handler
            .handle(&IngestJob::single(message("m1", "hi"), Utc::now()), &inbox)
            .await
            .unwrap();
        harness.sessions.pause_conversation(TENANT_ID, 7, 100).await.unwrap();

        let outcome = handler
            .handle(&IngestJob::single(message("m2", "hello?"), Utc::now()), &inbox)
            .await
            .unwrap();
        assert!(matches!(outcome, HandleOutcome::SessionPaused { .. }));
        assert_eq!(harness.bot.call_count().await, 1);
        assert_eq!(harness.channel.sent_count().await, 1);
    }

    #[tokio::test]
    async fn batch_is_logged_but_only_first_reaches_the_bot() {
        let (harness, inbox) = setup().await;
        let first = message("img1", "");
        let job = IngestJob {
            message: first.clone(),
            batch: vec![first, message("img2", ""), message("img3", "")],
            enqueued_at: Utc::now(),
        };
        let HandleOutcome::Replied { session_id, .. } =
            handler(&harness).handle(&job, &inbox).await.unwrap()
        else {
            panic!("expected a reply");
        };

        assert_eq!(harness.bot.call_count().await, 1);
        let log = message_log::for_session(&harness.db, &session_id).await.unwrap();
        let inbound: Vec<_> = log
            .iter()
            .filter(|e| e.direction == Direction::Inbound)
            .filter_map(|e| e.message_id.as_deref())
            .collect();
        assert_eq!(inbound, ["img1", "img2", "img3"]);
        let outbound = log.iter().filter(|e| e.direction == Direction::Outbound).count();
        assert_eq!(outbound, 1);
    }

    #[tokio::test]
    async fn bot_failure_propagates_without_a_session() {
        let (harness, inbox) = setup().await;
        harness.bot.fail_next(1).await;
        let err = handler(&harness)
            .handle(&IngestJob::single(message("m1", "hi"), Utc::now()), &inbox)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(
            harness
                .sessions
                .get_session(&message("m1", "").conversation_key())
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(harness.channel.sent_count().await, 0);
    }

    #[test]
    fn prefilled_variables_skip_missing_name() {
        let mut msg = message("m1", "hi");
        msg.contact_name = None;
        let vars = prefilled_variables(&msg);
        assert!(vars.iter().all(|(k, _)| k != "contact_name"));
        assert!(vars.contains(&("conversation_id".to_string(), "100".to_string())));
    }

    #[test]
    fn outbound_content_logs_as_json() {
        let content = OutboundContent::Text { text: "hi".into() };
        assert_eq!(
            serde_json::to_string(&content).unwrap(),
            r#"{"type":"text","text":"hi"}"#
        );
    }
}
