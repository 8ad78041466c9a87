// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The session store: lifecycle operations over the cache and the durable store.
//!
//! Ordering rules:
//! - Reads go cache first, then fall back to the durable store and rehydrate.
//! - Creates and updates write the cache first and then upsert the durable
//!   row. A failed durable write removes the cache entry again.
//! - State transitions write the durable row first and then delete every
//!   cache key under the conversation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parley_config::model::SessionConfig;
use parley_core::types::{
    ChoiceEdge, ConversationKey, ConversationStatus, InboxContext, LastTrigger, SessionRecord,
    SessionState,
};
use parley_core::{Clock, ConversationPlatform, KvStore, ParleyError};
use parley_storage::queries::{sessions, tenants};
use parley_storage::{Database, SessionFilter};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{SessionCache, SessionCacheEntry};
use crate::filter::{BulkCloseFilter, BulkCloseResult};

pub struct SessionStore {
    db: Database,
    cache: SessionCache,
    clock: Arc<dyn Clock>,
    platform: Option<Arc<dyn ConversationPlatform>>,
}

impl SessionStore {
    pub fn new(
        db: Database,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            db,
            cache: SessionCache::new(kv, Duration::from_secs(config.cache_ttl_secs)),
            clock,
            platform: None,
        }
    }

    /// Enables the `conversation_status` bulk-close filter.
    pub fn with_platform(mut self, platform: Arc<dyn ConversationPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// A fresh active record for a bot session that has just been started.
    pub fn new_record(
        &self,
        key: &ConversationKey,
        contact_name: Option<String>,
        bot_session_id: String,
        bot_result_id: Option<String>,
    ) -> SessionRecord {
        let now = self.clock.now();
        SessionRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: key.tenant_id,
            inbox_id: key.inbox_id,
            conversation_id: key.conversation_id,
            contact_address: key.contact_address.clone(),
            contact_name,
            bot_session_id,
            bot_result_id,
            state: SessionState::Active,
            last_trigger: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Returns the live session of a thread, or `None` if there is none.
    pub async fn get_session(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<SessionCacheEntry>, ParleyError> {
        match self.cache.get(key).await {
            Ok(Some(entry)) if !entry.record.state.is_terminal() => {
                debug!(session_id = %entry.record.id, "session cache hit");
                return Ok(Some(entry));
            }
            Ok(Some(_)) => {
                self.cache.remove(key).await?;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "session cache read failed, using durable store"),
        }

        let Some((record, edges)) = sessions::find_live(&self.db, key).await? else {
            return Ok(None);
        };
        let entry = SessionCacheEntry { record, edges };
        if let Err(e) = self.cache.put(&entry).await {
            warn!(session_id = %entry.record.id, error = %e, "session cache rehydration failed");
        }
        debug!(session_id = %entry.record.id, "session rehydrated from durable store");
        Ok(Some(entry))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<SessionRecord>, ParleyError> {
        sessions::get_by_id(&self.db, id).await
    }

    /// Writes a session and its choice edges.
    ///
    /// Upserts by the (tenant, inbox, conversation, contact, bot session) tuple.
    /// A record with a different bot session than the thread's live one
    /// expires the old row. The stored state wins over the record's, so a
    /// turn that finishes after a pause leaves the session paused. Returns
    /// the record as stored.
    pub async fn create_or_update_session(
        &self,
        record: SessionRecord,
        edges: Vec<ChoiceEdge>,
    ) -> Result<SessionRecord, ParleyError> {
        let key = record.conversation_key();
        let mut entry = SessionCacheEntry { record, edges };
        if let Err(e) = self.cache.put(&entry).await {
            warn!(session_id = %entry.record.id, error = %e, "session cache write failed");
        }

        let outcome = match sessions::upsert(&self.db, &entry.record, &entry.edges).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(cache_err) = self.cache.remove(&key).await {
                    warn!(error = %cache_err, "session cache rollback failed");
                }
                return Err(e);
            }
        };

        if !outcome.superseded.is_empty() {
            info!(
                session_id = %outcome.record.id,
                superseded = ?outcome.superseded,
                "previous live sessions expired"
            );
        }

        entry.record = outcome.record;
        if entry.record.state.is_terminal() {
            self.cache.remove(&key).await?;
        } else if let Err(e) = self.cache.put(&entry).await {
            warn!(session_id = %entry.record.id, error = %e, "session cache write failed");
        }
        Ok(entry.record)
    }

    pub async fn pause(&self, id: &str) -> Result<SessionRecord, ParleyError> {
        self.transition(id, SessionState::Paused).await
    }

    pub async fn resume(&self, id: &str) -> Result<SessionRecord, ParleyError> {
        self.transition(id, SessionState::Active).await
    }

    pub async fn close(&self, id: &str) -> Result<SessionRecord, ParleyError> {
        self.transition(id, SessionState::Closed).await
    }

    async fn transition(&self, id: &str, to: SessionState) -> Result<SessionRecord, ParleyError> {
        let record = sessions::transition_by_id(&self.db, id, to, self.clock.now()).await?;
        self.cache
            .invalidate_conversation(record.tenant_id, record.inbox_id, record.conversation_id)
            .await?;
        info!(session_id = id, state = %record.state, "session transitioned");
        Ok(record)
    }

    /// Pauses the live sessions of a conversation (an agent took over).
    pub async fn pause_conversation(
        &self,
        tenant_id: i64,
        inbox_id: i64,
        conversation_id: i64,
    ) -> Result<usize, ParleyError> {
        self.transition_conversation(tenant_id, inbox_id, conversation_id, SessionState::Paused)
            .await
    }

    /// Resumes the paused sessions of a conversation.
    pub async fn resume_conversation(
        &self,
        tenant_id: i64,
        inbox_id: i64,
        conversation_id: i64,
    ) -> Result<usize, ParleyError> {
        self.transition_conversation(tenant_id, inbox_id, conversation_id, SessionState::Active)
            .await
    }

    /// Closes the live sessions of a conversation (resolved upstream).
    pub async fn close_conversation(
        &self,
        tenant_id: i64,
        inbox_id: i64,
        conversation_id: i64,
    ) -> Result<usize, ParleyError> {
        self.transition_conversation(tenant_id, inbox_id, conversation_id, SessionState::Closed)
            .await
    }

    async fn transition_conversation(
        &self,
        tenant_id: i64,
        inbox_id: i64,
        conversation_id: i64,
        to: SessionState,
    ) -> Result<usize, ParleyError> {
        let filter = SessionFilter::conversation(tenant_id, inbox_id, conversation_id, None);
        let moved = sessions::transition_matching(&self.db, &filter, to, self.clock.now()).await?;
        let removed = self
            .cache
            .invalidate_conversation(tenant_id, inbox_id, conversation_id)
            .await?;
        info!(
            tenant_id,
            inbox_id,
            conversation_id,
            state = %to,
            sessions = moved.len(),
            cache_keys_removed = removed.len(),
            "conversation sessions transitioned"
        );
        Ok(moved.len())
    }

    /// Marks a session whose bot-engine token is no longer recognized as expired.
    pub async fn expire_stale(&self, record: &SessionRecord) -> Result<(), ParleyError> {
        match sessions::transition_by_id(&self.db, &record.id, SessionState::Expired, self.clock.now())
            .await
        {
            Ok(_) => {}
            Err(ParleyError::InvalidTransition { from, .. }) => {
                debug!(session_id = %record.id, state = %from, "stale session already terminal");
            }
            Err(e) => return Err(e),
        }
        self.cache.remove(&record.conversation_key()).await?;
        warn!(session_id = %record.id, bot_session_id = %record.bot_session_id, "bot session expired upstream");
        Ok(())
    }

    /// Records the trigger that fired on a session.
    pub async fn record_trigger(
        &self,
        record: &SessionRecord,
        trigger: &LastTrigger,
    ) -> Result<(), ParleyError> {
        sessions::set_last_trigger(&self.db, &record.id, trigger).await?;
        self.cache
            .invalidate_conversation(record.tenant_id, record.inbox_id, record.conversation_id)
            .await?;
        Ok(())
    }

    /// Active sessions of an inbox, oldest first.
    pub async fn active_sessions(&self, inbox_id: i64) -> Result<Vec<SessionRecord>, ParleyError> {
        sessions::list(
            &self.db,
            &SessionFilter {
                states: vec![SessionState::Active],
                inbox_id: Some(inbox_id),
                ..SessionFilter::default()
            },
        )
        .await
    }

    /// Closes every session matching `filter` and clears their cache keys.
    pub async fn bulk_close(&self, filter: &BulkCloseFilter) -> Result<BulkCloseResult, ParleyError> {
        let now = self.clock.now();
        let selection = filter.to_session_filter(now)?;

        let closed = match filter.conversation_status {
            None => {
                sessions::transition_matching(&self.db, &selection, SessionState::Closed, now)
                    .await?
            }
            Some(wanted) => self.close_with_status(&selection, wanted).await?,
        };

        let conversations: BTreeSet<(i64, i64, i64)> = closed
            .iter()
            .map(|r| (r.tenant_id, r.inbox_id, r.conversation_id))
            .collect();
        let mut cache_keys_removed = 0;
        for (tenant_id, inbox_id, conversation_id) in conversations {
            cache_keys_removed += self
                .cache
                .invalidate_conversation(tenant_id, inbox_id, conversation_id)
                .await?
                .len();
        }

        let result = BulkCloseResult {
            closed: closed.len(),
            cache_keys_removed,
            session_ids: closed.into_iter().map(|r| r.id).collect(),
        };
        info!(
            closed = result.closed,
            cache_keys_removed = result.cache_keys_removed,
            inbox_id = ?filter.inbox_id,
            "bulk close finished"
        );
        Ok(result)
    }

    async fn close_with_status(
        &self,
        selection: &SessionFilter,
        wanted: ConversationStatus,
    ) -> Result<Vec<SessionRecord>, ParleyError> {
        let platform = self.platform.as_ref().ok_or_else(|| {
            ParleyError::Config("conversation_status filter requires a platform client".into())
        })?;

        let candidates = sessions::list(&self.db, selection).await?;
        let mut contexts: HashMap<i64, Option<InboxContext>> = HashMap::new();
        let mut statuses: HashMap<(i64, i64), Option<ConversationStatus>> = HashMap::new();
        let mut closed = Vec::new();

        for record in candidates {
            let conversation = (record.inbox_id, record.conversation_id);
            let status = match statuses.get(&conversation) {
                Some(status) => *status,
                None => {
                    let status = self
                        .upstream_status(platform.as_ref(), &mut contexts, &record)
                        .await?;
                    statuses.insert(conversation, status);
                    status
                }
            };
            if status != Some(wanted) {
                continue;
            }
            match sessions::transition_by_id(&self.db, &record.id, SessionState::Closed, self.clock.now())
                .await
            {
                Ok(_) => closed.push(record),
                Err(ParleyError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(closed)
    }

    /// Looks up a conversation's upstream status. Unknown statuses are `None`
    /// and keep the session open.
    async fn upstream_status(
        &self,
        platform: &dyn ConversationPlatform,
        contexts: &mut HashMap<i64, Option<InboxContext>>,
        record: &SessionRecord,
    ) -> Result<Option<ConversationStatus>, ParleyError> {
        if !contexts.contains_key(&record.inbox_id) {
            let context = tenants::inbox_context(&self.db, record.inbox_id).await?;
            contexts.insert(record.inbox_id, context);
        }
        let Some(Some(context)) = contexts.get(&record.inbox_id) else {
            warn!(inbox_id = record.inbox_id, "inbox not configured, skipping status lookup");
            return Ok(None);
        };
        let Some(account_id) = context.platform_account() else {
            warn!(inbox_id = record.inbox_id, "platform credentials missing, skipping status lookup");
            return Ok(None);
        };
        match platform
            .get_conversation(context, account_id, record.conversation_id)
            .await
        {
            Ok(snapshot) => Ok(Some(snapshot.status)),
            Err(e) => {
                warn!(
                    conversation_id = record.conversation_id,
                    error = %e,
                    "conversation status lookup failed"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parley_core::types::{ConversationSnapshot, InboxConfig, TenantConfig};
    use parley_coord::MemoryKv;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct StatusPlatform(HashMap<i64, ConversationStatus>);

    #[async_trait]
    impl ConversationPlatform for StatusPlatform {
        async fn get_conversation(
            &self,
            _inbox: &InboxContext,
            _account_id: i64,
            conversation_id: i64,
        ) -> Result<ConversationSnapshot, ParleyError> {
            let status = self.0.get(&conversation_id).copied().ok_or(ParleyError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;
            Ok(ConversationSnapshot {
                status,
                assignee_id: None,
                team_id: None,
                last_activity_at: Utc::now(),
            })
        }

        async fn post_message(
            &self,
            _: &InboxContext,
            _: i64,
            _: i64,
            _: &str,
            _: bool,
        ) -> Result<(), ParleyError> {
            Ok(())
        }
    }

    struct Fixture {
        store: SessionStore,
        kv: Arc<MemoryKv>,
        clock: Arc<FixedClock>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("s.db").to_str().unwrap())
            .await
            .unwrap();
        let now = parley_core::parse_ts("2026-03-02T12:00:00.000Z").unwrap();
        let clock = Arc::new(FixedClock(Mutex::new(now)));
        let kv = Arc::new(MemoryKv::new(clock.clone()));
        let store = SessionStore::new(db, kv.clone(), clock.clone(), &SessionConfig::default());
        Fixture {
            store,
            kv,
            clock,
            _dir: dir,
        }
    }

    fn thread(inbox_id: i64, conversation_id: i64) -> ConversationKey {
        ConversationKey {
            tenant_id: 1,
            inbox_id,
            conversation_id,
            contact_address: "+15550001".into(),
        }
    }

    fn edges() -> Vec<ChoiceEdge> {
        vec![ChoiceEdge {
            choice_key: "1".into(),
            label: "Sales".into(),
            edge_id: Some("e1".into()),
        }]
    }

    #[tokio::test]
    async fn write_invalidate_read_round_trip() {
        let fx = fixture().await;
        let key = thread(7, 100);
        let record = fx.store.new_record(&key, Some("Ana".into()), "bot-a".into(), None);
        let stored = fx
            .store
            .create_or_update_session(record, edges())
            .await
            .unwrap();

        let cached = fx.store.cache().get(&key).await.unwrap().unwrap();
        assert_eq!(cached.record.id, stored.id);
        assert_eq!(cached.edges, edges());

        assert_eq!(fx.store.pause_conversation(1, 7, 100).await.unwrap(), 1);
        assert!(fx.store.cache().get(&key).await.unwrap().is_none());

        let reread = fx.store.get_session(&key).await.unwrap().unwrap();
        assert_eq!(reread.record.id, stored.id);
        assert_eq!(reread.record.state, SessionState::Paused);
        assert_eq!(reread.edges, edges());
        // Rehydrated into the cache.
        assert!(fx.store.cache().get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pause_during_a_turn_survives_the_write_back() {
        let fx = fixture().await;
        let key = thread(7, 100);
        let record = fx.store.new_record(&key, None, "bot-a".into(), None);
        fx.store.create_or_update_session(record, vec![]).await.unwrap();

        let in_flight = fx.store.get_session(&key).await.unwrap().unwrap();
        assert_eq!(fx.store.pause_conversation(1, 7, 100).await.unwrap(), 1);
        let stored = fx
            .store
            .create_or_update_session(in_flight.record, edges())
            .await
            .unwrap();

        assert_eq!(stored.state, SessionState::Paused);
        let reread = fx.store.get_session(&key).await.unwrap().unwrap();
        assert_eq!(reread.record.state, SessionState::Paused);
        assert_eq!(reread.edges, edges());
    }

    #[tokio::test]
    async fn never_two_active_sessions_per_thread() {
        let fx = fixture().await;
        let key = thread(7, 100);
        let first = fx
            .store
            .create_or_update_session(
                fx.store.new_record(&key, None, "bot-a".into(), None),
                vec![],
            )
            .await
            .unwrap();
        let second = fx
            .store
            .create_or_update_session(
                fx.store.new_record(&key, None, "bot-b".into(), None),
                vec![],
            )
            .await
            .unwrap();

        let old = fx.store.get_by_id(&first.id).await.unwrap().unwrap();
        assert_eq!(old.state, SessionState::Expired);
        let live = fx.store.active_sessions(7).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, second.id);
        let current = fx.store.get_session(&key).await.unwrap().unwrap();
        assert_eq!(current.record.bot_session_id, "bot-b");
    }

    #[tokio::test]
    async fn stale_session_is_expired_and_evicted() {
        let fx = fixture().await;
        let key = thread(7, 100);
        let record = fx
            .store
            .create_or_update_session(
                fx.store.new_record(&key, None, "bot-a".into(), None),
                vec![],
            )
            .await
            .unwrap();

        fx.store.expire_stale(&record).await.unwrap();
        assert!(fx.store.get_session(&key).await.unwrap().is_none());
        assert_eq!(
            fx.store.get_by_id(&record.id).await.unwrap().unwrap().state,
            SessionState::Expired
        );
        // Idempotent.
        fx.store.expire_stale(&record).await.unwrap();
    }

    #[tokio::test]
    async fn closed_session_cannot_resume() {
        let fx = fixture().await;
        let record = fx
            .store
            .create_or_update_session(
                fx.store.new_record(&thread(7, 100), None, "bot-a".into(), None),
                vec![],
            )
            .await
            .unwrap();
        fx.store.close(&record.id).await.unwrap();
        let err = fx.store.resume(&record.id).await.unwrap_err();
        assert!(matches!(err, ParleyError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn bulk_close_by_age_on_one_inbox() {
        let fx = fixture().await;
        let now = fx.clock.now();
        let mut seeded = Vec::new();
        for (inbox, conversation, age_hours) in [(3, 1, 30), (3, 2, 2), (4, 3, 30)] {
            let mut record = fx.store.new_record(
                &thread(inbox, conversation),
                None,
                format!("bot-{conversation}"),
                None,
            );
            record.created_at = now - chrono::Duration::hours(age_hours);
            seeded.push(
                fx.store
                    .create_or_update_session(record, vec![])
                    .await
                    .unwrap(),
            );
        }

        let result = fx
            .store
            .bulk_close(&BulkCloseFilter {
                older_than_hours: Some(24),
                inbox_id: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.closed, 1);
        assert_eq!(result.cache_keys_removed, 1);
        assert_eq!(result.session_ids, vec![seeded[0].id.clone()]);
        assert!(fx.kv.get("session:1:3:1:+15550001").await.unwrap().is_none());
        assert!(fx.kv.get("session:1:3:2:+15550001").await.unwrap().is_some());
        assert_eq!(
            fx.store.get_by_id(&seeded[2].id).await.unwrap().unwrap().state,
            SessionState::Active
        );
    }

    #[tokio::test]
    async fn bulk_close_by_upstream_status() {
        let fx = fixture().await;
        let db = fx.store.database().clone();
        tenants::upsert_tenant(
            &db,
            &TenantConfig {
                id: 1,
                name: "acme".into(),
                platform_account_id: Some(11),
                platform_api_token: Some("tok".into()),
                channel_api_token: None,
            },
        )
        .await
        .unwrap();
        tenants::upsert_inbox(
            &db,
            &InboxConfig {
                id: 3,
                tenant_id: 1,
                name: "wa".into(),
                bot_id: "flow".into(),
                channel_sender_id: None,
                buffer_enabled: true,
                auto_close_hours: None,
                active: true,
            },
        )
        .await
        .unwrap();

        let platform = StatusPlatform(HashMap::from([
            (1, ConversationStatus::Resolved),
            (2, ConversationStatus::Open),
        ]));
        let store = SessionStore::new(
            db,
            fx.kv.clone(),
            fx.clock.clone(),
            &SessionConfig::default(),
        )
        .with_platform(Arc::new(platform));

        for conversation in [1, 2, 3] {
            store
                .create_or_update_session(
                    store.new_record(&thread(3, conversation), None, format!("b{conversation}"), None),
                    vec![],
                )
                .await
                .unwrap();
        }

        let result = store
            .bulk_close(&BulkCloseFilter {
                conversation_status: Some(ConversationStatus::Resolved),
                ..Default::default()
            })
            .await
            .unwrap();
        // Conversation 3 has no upstream record and stays open.
        assert_eq!(result.closed, 1);
        assert_eq!(store.active_sessions(3).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn status_filter_without_platform_is_a_config_error() {
        let fx = fixture().await;
        let err = fx
            .store
            .bulk_close(&BulkCloseFilter {
                conversation_status: Some(ConversationStatus::Resolved),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Config(_)));
    }
}
