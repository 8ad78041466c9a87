// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`KvStore`] backed by the `kv_entries` table.
//!
//! Every replica pointed at the same database file sees the same keys, which
//! is what makes locks and dedup markers hold across processes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::{Clock, KvStore, ParleyError};

use crate::database::Database;
use crate::queries::kv;

pub struct SqliteKv {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteKv {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn expiry_ms(&self, ttl: Duration) -> i64 {
        self.now_ms()
            .saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }

    /// Deletes expired rows. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, ParleyError> {
        kv::purge_expired(&self.db, self.now_ms()).await
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>, ParleyError> {
        kv::get(&self.db, key, self.now_ms()).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ParleyError> {
        kv::set(&self.db, key, value, self.expiry_ms(ttl)).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, ParleyError> {
        kv::set_if_absent(&self.db, key, value, self.now_ms(), self.expiry_ms(ttl)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, ParleyError> {
        kv::delete(&self.db, key, self.now_ms()).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, ParleyError> {
        kv::delete_if_equals(&self.db, key, expected, self.now_ms()).await
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, ParleyError> {
        kv::expire_if_equals(&self.db, key, expected, self.now_ms(), self.expiry_ms(ttl)).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ParleyError> {
        kv::keys_with_prefix(&self.db, prefix, self.now_ms()).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<Vec<String>, ParleyError> {
        kv::delete_prefix(&self.db, prefix, self.now_ms()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct StepClock(Mutex<DateTime<Utc>>);

    impl StepClock {
        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    async fn setup() -> (SqliteKv, Arc<StepClock>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("kv.db").to_str().unwrap())
            .await
            .unwrap();
        let clock = Arc::new(StepClock(Mutex::new(Utc::now())));
        (SqliteKv::new(db, clock.clone()), clock, dir)
    }

    #[tokio::test]
    async fn set_if_absent_is_exclusive_until_expiry() {
        let (kv, clock, _dir) = setup().await;
        let ttl = Duration::from_secs(5);
        assert!(kv.set_if_absent("lock:a", "t1", ttl).await.unwrap());
        assert!(!kv.set_if_absent("lock:a", "t2", ttl).await.unwrap());

        clock.advance(Duration::from_secs(6));
        assert_eq!(kv.get("lock:a").await.unwrap(), None);
        assert!(kv.set_if_absent("lock:a", "t2", ttl).await.unwrap());
        assert_eq!(kv.get("lock:a").await.unwrap().as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn conditional_delete_and_extend() {
        let (kv, clock, _dir) = setup().await;
        kv.set("lock:b", "mine", Duration::from_secs(2)).await.unwrap();

        assert!(!kv.delete_if_equals("lock:b", "theirs").await.unwrap());
        assert!(
            kv.expire_if_equals("lock:b", "mine", Duration::from_secs(10))
                .await
                .unwrap()
        );
        clock.advance(Duration::from_secs(5));
        assert!(kv.get("lock:b").await.unwrap().is_some());
        assert!(kv.delete_if_equals("lock:b", "mine").await.unwrap());
        assert!(!kv.delete("lock:b").await.unwrap());
    }

    #[tokio::test]
    async fn prefix_operations_skip_expired_rows() {
        let (kv, clock, _dir) = setup().await;
        kv.set("session:1:7:100:a", "x", Duration::from_secs(60)).await.unwrap();
        kv.set("session:1:7:100:b", "y", Duration::from_secs(1)).await.unwrap();
        kv.set("session:1:7:101:a", "z", Duration::from_secs(60)).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let keys = kv.keys_with_prefix("session:1:7:100:").await.unwrap();
        assert_eq!(keys, vec!["session:1:7:100:a".to_string()]);

        let removed = kv.delete_prefix("session:1:7:100:").await.unwrap();
        assert_eq!(removed, vec!["session:1:7:100:a".to_string()]);
        assert!(kv.get("session:1:7:101:a").await.unwrap().is_some());
        assert_eq!(kv.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_removes_expired_rows() {
        let (kv, clock, _dir) = setup().await;
        kv.set("processed:7:m1", "1", Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(kv.purge_expired().await.unwrap(), 1);
    }
}
