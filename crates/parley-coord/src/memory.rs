// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process [`KvStore`] for single-replica deployments and tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parley_core::{Clock, KvStore, ParleyError};

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Slot {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A [`KvStore`] held in a sharded concurrent map.
///
/// Every conditional operation runs under the shard lock of its key, so
/// `set_if_absent` and the compare-and-* operations are atomic within the
/// process. Expired slots are treated as absent and overwritten lazily.
pub struct MemoryKv {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryKv {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(3650));
        self.clock.now() + ttl
    }

    /// Drops expired slots. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.slots.len())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.slots.iter().filter(|s| s.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, ParleyError> {
        let now = self.clock.now();
        Ok(self
            .slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ParleyError> {
        self.slots.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at: self.expiry(ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, ParleyError> {
        let now = self.clock.now();
        let slot = Slot {
            value: value.to_string(),
            expires_at: self.expiry(ttl),
        };
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(slot);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, ParleyError> {
        let now = self.clock.now();
        Ok(self
            .slots
            .remove(key)
            .is_some_and(|(_, slot)| slot.is_live(now)))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, ParleyError> {
        let now = self.clock.now();
        Ok(self
            .slots
            .remove_if(key, |_, slot| slot.is_live(now) && slot.value == expected)
            .is_some())
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, ParleyError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.is_live(now) && slot.value == expected => {
                slot.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ParleyError> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .filter(|s| s.key().starts_with(prefix) && s.is_live(now))
            .map(|s| s.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<Vec<String>, ParleyError> {
        let now = self.clock.now();
        let candidates: Vec<String> = self
            .slots
            .iter()
            .filter(|s| s.key().starts_with(prefix))
            .map(|s| s.key().clone())
            .collect();
        let mut removed = Vec::new();
        for key in candidates {
            if let Some((key, slot)) = self.slots.remove(&key)
                && slot.is_live(now)
            {
                removed.push(key);
            }
        }
        removed.sort();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::MonotonicClock;

    fn kv() -> MemoryKv {
        MemoryKv::new(Arc::new(MonotonicClock::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_behave_as_absent() {
        let kv = kv();
        kv.set("processed:7:m1", "1", Duration::from_secs(1)).await.unwrap();
        assert!(kv.get("processed:7:m1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1_001)).await;
        assert_eq!(kv.get("processed:7:m1").await.unwrap(), None);
        assert!(!kv.delete("processed:7:m1").await.unwrap());
        assert!(
            kv.set_if_absent("processed:7:m1", "2", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn set_if_absent_has_one_winner() {
        let kv = Arc::new(kv());
        let mut handles = Vec::new();
        for i in 0..16 {
            let kv = kv.clone();
            handles.push(tokio::spawn(async move {
                kv.set_if_absent("lock:x", &i.to_string(), Duration::from_secs(5))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn compare_operations_check_the_value() {
        let kv = kv();
        kv.set("lock:y", "mine", Duration::from_secs(5)).await.unwrap();
        assert!(!kv.delete_if_equals("lock:y", "theirs").await.unwrap());
        assert!(
            !kv.expire_if_equals("lock:y", "theirs", Duration::from_secs(9))
                .await
                .unwrap()
        );
        assert!(kv.delete_if_equals("lock:y", "mine").await.unwrap());
        assert!(kv.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn prefix_delete_reports_live_keys_only() {
        let kv = kv();
        kv.set("session:1:7:100:a", "x", Duration::from_secs(60)).await.unwrap();
        kv.set("session:1:7:100:b", "y", Duration::from_secs(1)).await.unwrap();
        kv.set("session:1:7:101:a", "z", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let removed = kv.delete_prefix("session:1:7:100:").await.unwrap();
        assert_eq!(removed, vec!["session:1:7:100:a".to_string()]);
        assert_eq!(
            kv.keys_with_prefix("session:").await.unwrap(),
            vec!["session:1:7:101:a".to_string()]
        );
        assert_eq!(kv.purge_expired(), 0);
    }
}
