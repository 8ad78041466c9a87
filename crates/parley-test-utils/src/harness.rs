// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness that assembles the shared services over a temp database.
//!
//! `TestHarness` wires a temp SQLite file, an in-memory KV store, an
//! in-memory queue and the mock collaborators, and seeds one tenant with the
//! requested inboxes. Worker and scheduler tests build their service under
//! test from these parts.

use std::sync::Arc;

use parley_config::ParleyConfig;
use parley_coord::{BufferService, DedupService, LockService, MemoryKv};
use parley_core::types::{InboxConfig, TenantConfig};
use parley_core::{Clock, MonotonicClock, ParleyError};
use parley_session::SessionStore;
use parley_storage::Database;
use parley_storage::queries::tenants;

use crate::memory_queue::MemoryQueue;
use crate::mock_bot::MockBotEngine;
use crate::mock_channel::MockChannel;
use crate::mock_platform::MockPlatform;

pub const TENANT_ID: i64 = 1;
pub const PLATFORM_ACCOUNT_ID: i64 = 11;

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    inboxes: Vec<InboxConfig>,
    clock: Option<Arc<dyn Clock>>,
    config: ParleyConfig,
    platform_credentials: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            inboxes: Vec::new(),
            clock: None,
            config: ParleyConfig::default(),
            platform_credentials: true,
        }
    }

    /// Adds an active inbox running flow `flow-{id}`.
    pub fn with_inbox(mut self, id: i64, buffer_enabled: bool) -> Self {
        self.inboxes.push(test_inbox(id, buffer_enabled));
        self
    }

    pub fn with_inbox_config(mut self, inbox: InboxConfig) -> Self {
        self.inboxes.push(inbox);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_config(mut self, config: ParleyConfig) -> Self {
        self.config = config;
        self
    }

    /// Seeds the tenant without platform API credentials.
    pub fn without_platform_credentials(mut self) -> Self {
        self.platform_credentials = false;
        self
    }

    pub async fn build(self) -> Result<TestHarness, ParleyError> {
        let temp_dir = tempfile::TempDir::new().map_err(ParleyError::storage)?;
        let db_path = temp_dir.path().join("parley-test.db");
        let db = Database::open(&db_path.to_string_lossy()).await?;

        tenants::upsert_tenant(
            &db,
            &TenantConfig {
                id: TENANT_ID,
                name: "acme".into(),
                platform_account_id: Some(PLATFORM_ACCOUNT_ID),
                platform_api_token: self.platform_credentials.then(|| "platform-token".into()),
                channel_api_token: Some("channel-token".into()),
            },
        )
        .await?;
        for inbox in &self.inboxes {
            tenants::upsert_inbox(&db, inbox).await?;
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let kv = Arc::new(MemoryKv::new(clock.clone()));
        let queue = Arc::new(MemoryQueue::new(self.config.queue.max_attempts));
        let bot = Arc::new(MockBotEngine::new());
        let channel = Arc::new(MockChannel::new());
        let platform = Arc::new(MockPlatform::new());

        let locks = LockService::new(kv.clone(), &self.config.lock);
        let dedup = DedupService::new(kv.clone(), &self.config.dedup);
        let buffer = BufferService::new(
            kv.clone(),
            queue.clone(),
            locks.clone(),
            clock.clone(),
            &self.config.buffer,
        );
        let sessions = Arc::new(
            SessionStore::new(db.clone(), kv.clone(), clock.clone(), &self.config.session)
                .with_platform(platform.clone()),
        );

        Ok(TestHarness {
            db,
            kv,
            queue,
            bot,
            channel,
            platform,
            clock,
            locks,
            dedup,
            buffer,
            sessions,
            config: self.config,
            _temp_dir: temp_dir,
        })
    }
}

/// The shared services and mocks for one test.
pub struct TestHarness {
    pub db: Database,
    pub kv: Arc<MemoryKv>,
    pub queue: Arc<MemoryQueue>,
    pub bot: Arc<MockBotEngine>,
    pub channel: Arc<MockChannel>,
    pub platform: Arc<MockPlatform>,
    pub clock: Arc<dyn Clock>,
    pub locks: LockService,
    pub dedup: DedupService,
    pub buffer: BufferService,
    pub sessions: Arc<SessionStore>,
    pub config: ParleyConfig,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }
}

/// An active inbox on the test tenant.
pub fn test_inbox(id: i64, buffer_enabled: bool) -> InboxConfig {
    InboxConfig {
        id,
        tenant_id: TENANT_ID,
        name: format!("inbox-{id}"),
        bot_id: format!("flow-{id}"),
        channel_sender_id: Some(format!("sender-{id}")),
        buffer_enabled,
        auto_close_hours: None,
        active: true,
    }
}
