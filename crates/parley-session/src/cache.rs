// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session projections in the shared KV store.
//!
//! The cache is never authoritative. Entries are written alongside a durable
//! write or when rehydrating from the durable store, and every durable
//! transition deletes the conversation's keys.

use std::sync::Arc;
use std::time::Duration;

use parley_core::types::{ChoiceEdge, ConversationKey, SessionRecord};
use parley_core::{KvStore, ParleyError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const SESSION_PREFIX: &str = "session:";

/// Key of the cached session for one thread.
pub fn session_key(key: &ConversationKey) -> String {
    format!(
        "{}{}",
        conversation_prefix(key.tenant_id, key.inbox_id, key.conversation_id),
        key.contact_address
    )
}

/// Prefix shared by every cached session of a conversation.
pub fn conversation_prefix(tenant_id: i64, inbox_id: i64, conversation_id: i64) -> String {
    format!("{SESSION_PREFIX}{tenant_id}:{inbox_id}:{conversation_id}:")
}

/// A session record plus the choice mappings of its pending bot input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCacheEntry {
    pub record: SessionRecord,
    #[serde(default)]
    pub edges: Vec<ChoiceEdge>,
}

#[derive(Clone)]
pub struct SessionCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Reads the cached entry and slides its TTL.
    ///
    /// Unreadable entries are dropped and reported as a miss.
    pub async fn get(&self, key: &ConversationKey) -> Result<Option<SessionCacheEntry>, ParleyError> {
        let cache_key = session_key(key);
        let Some(raw) = self.kv.get(&cache_key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<SessionCacheEntry>(&raw) {
            Ok(entry) => {
                self.kv.expire_if_equals(&cache_key, &raw, self.ttl).await?;
                Ok(Some(entry))
            }
            Err(e) => {
                warn!(key = %cache_key, error = %e, "dropping unreadable session cache entry");
                self.kv.delete(&cache_key).await?;
                Ok(None)
            }
        }
    }

    pub async fn put(&self, entry: &SessionCacheEntry) -> Result<(), ParleyError> {
        let cache_key = session_key(&entry.record.conversation_key());
        let raw = serde_json::to_string(entry)?;
        self.kv.set(&cache_key, &raw, self.ttl).await?;
        debug!(key = %cache_key, "session cached");
        Ok(())
    }

    pub async fn remove(&self, key: &ConversationKey) -> Result<bool, ParleyError> {
        self.kv.delete(&session_key(key)).await
    }

    /// Deletes every cached session of a conversation. Returns the removed keys.
    pub async fn invalidate_conversation(
        &self,
        tenant_id: i64,
        inbox_id: i64,
        conversation_id: i64,
    ) -> Result<Vec<String>, ParleyError> {
        let removed = self
            .kv
            .delete_prefix(&conversation_prefix(tenant_id, inbox_id, conversation_id))
            .await?;
        if !removed.is_empty() {
            debug!(tenant_id, inbox_id, conversation_id, removed = removed.len(), "session cache invalidated");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_nest_under_the_conversation_prefix() {
        let key = ConversationKey {
            tenant_id: 1,
            inbox_id: 7,
            conversation_id: 100,
            contact_address: "+15550001".into(),
        };
        assert_eq!(session_key(&key), "session:1:7:100:+15550001");
        assert!(session_key(&key).starts_with(&conversation_prefix(1, 7, 100)));
        assert!(!session_key(&key).starts_with(&conversation_prefix(1, 7, 10)));
    }
}
