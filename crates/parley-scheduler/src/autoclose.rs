// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic per-inbox auto-close of old sessions.

use std::sync::Arc;
use std::time::Duration;

use parley_config::model::AutoCloseConfig;
use parley_core::ParleyError;
use parley_session::{BulkCloseFilter, SessionStore};
use parley_storage::queries::tenants;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Closes sessions older than each inbox's `auto_close_hours`.
#[derive(Clone)]
pub struct AutoCloseSweeper {
    sessions: Arc<SessionStore>,
    interval: Duration,
}

impl AutoCloseSweeper {
    pub fn new(sessions: Arc<SessionStore>, config: &AutoCloseConfig) -> Self {
        Self {
            sessions,
            interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }

    /// One pass over every inbox with auto-close set. Returns the number of
    /// sessions closed. A failing inbox does not stop the others.
    pub async fn sweep(&self) -> Result<usize, ParleyError> {
        let inboxes = tenants::auto_close_inboxes(self.sessions.database()).await?;
        let mut closed = 0;
        for ctx in inboxes {
            let Some(hours) = ctx.inbox.auto_close_hours else {
                continue;
            };
            let filter = BulkCloseFilter {
                older_than_hours: Some(hours),
                tenant_id: Some(ctx.tenant.id),
                inbox_id: Some(ctx.inbox.id),
                ..BulkCloseFilter::default()
            };
            match self.sessions.bulk_close(&filter).await {
                Ok(result) => {
                    if result.closed > 0 {
                        info!(inbox_id = ctx.inbox.id, hours, closed = result.closed, "sessions auto-closed");
                    }
                    closed += result.closed;
                }
                Err(e) => warn!(inbox_id = ctx.inbox.id, error = %e, "auto-close failed"),
            }
        }
        Ok(closed)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "auto-close sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parley_core::ConversationKey;
    use parley_core::types::SessionState;
    use parley_test_utils::{ManualClock, TENANT_ID, TestHarness, test_inbox};

    #[tokio::test]
    async fn closes_only_old_sessions_of_configured_inboxes() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
        ));
        let mut auto = test_inbox(3, true);
        auto.auto_close_hours = Some(24);
        let harness = TestHarness::builder()
            .with_clock(clock.clone())
            .with_inbox_config(auto)
            .with_inbox(7, false)
            .build()
            .await
            .unwrap();

        let mut ids = Vec::new();
        for (inbox_id, conversation_id) in [(3, 1), (7, 2)] {
            let key = ConversationKey {
                tenant_id: TENANT_ID,
                inbox_id,
                conversation_id,
                contact_address: "+15550001".into(),
            };
            let record = harness
                .sessions
                .new_record(&key, None, format!("bot-{conversation_id}"), None);
            ids.push(
                harness
                    .sessions
                    .create_or_update_session(record, Vec::new())
                    .await
                    .unwrap()
                    .id,
            );
        }

        let sweeper = AutoCloseSweeper::new(harness.sessions.clone(), &AutoCloseConfig::default());
        clock.advance(Duration::from_secs(23 * 3600));
        assert_eq!(sweeper.sweep().await.unwrap(), 0);

        clock.advance(Duration::from_secs(2 * 3600));
        assert_eq!(sweeper.sweep().await.unwrap(), 1);

        let closed = harness.sessions.get_by_id(&ids[0]).await.unwrap().unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        let untouched = harness.sessions.get_by_id(&ids[1]).await.unwrap().unwrap();
        assert_eq!(untouched.state, SessionState::Active);
    }
}
