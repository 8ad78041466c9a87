// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbox and tenant resolution with a short-lived local cache.

use std::time::Duration;

use dashmap::DashMap;
use parley_core::ParleyError;
use parley_core::types::InboxContext;
use parley_storage::Database;
use parley_storage::queries::tenants;
use tokio::time::Instant;

const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Resolves inbox configuration, caching lookups for a few seconds.
///
/// Missing inboxes are cached too, so a flood of webhooks for an
/// unconfigured inbox costs one query per TTL.
pub struct InboxDirectory {
    db: Database,
    ttl: Duration,
    cache: DashMap<i64, (Instant, Option<InboxContext>)>,
}

impl InboxDirectory {
    pub fn new(db: Database) -> Self {
        Self::with_ttl(db, DEFAULT_TTL)
    }

    pub fn with_ttl(db: Database, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Returns the inbox if it exists and is active.
    pub async fn resolve(&self, inbox_id: i64) -> Result<Option<InboxContext>, ParleyError> {
        if let Some(hit) = self.cache.get(&inbox_id)
            && hit.0.elapsed() < self.ttl
        {
            return Ok(hit.1.clone());
        }
        let context = tenants::inbox_context(&self.db, inbox_id)
            .await?
            .filter(|ctx| ctx.inbox.active);
        self.cache
            .insert(inbox_id, (Instant::now(), context.clone()));
        Ok(context)
    }

    pub fn invalidate(&self, inbox_id: i64) {
        self.cache.remove(&inbox_id);
    }
}
