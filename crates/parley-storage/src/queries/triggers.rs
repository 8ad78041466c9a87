// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trigger definitions and the trigger execution ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parley_core::types::TriggerRecord;
use parley_core::{ParleyError, format_ts};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};

/// Inserts or replaces a trigger and its inbox links.
pub async fn upsert_trigger(db: &Database, trigger: &TriggerRecord) -> Result<(), ParleyError> {
    let trigger = trigger.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO triggers (id, name, idle_minutes, check_frequency_minutes, active, require_no_assignee)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    idle_minutes = excluded.idle_minutes,
                    check_frequency_minutes = excluded.check_frequency_minutes,
                    active = excluded.active,
                    require_no_assignee = excluded.require_no_assignee",
                params![
                    trigger.id,
                    trigger.name,
                    trigger.idle_minutes,
                    trigger.check_frequency_minutes.max(1),
                    trigger.active,
                    trigger.require_no_assignee
                ],
            )?;
            tx.execute(
                "DELETE FROM trigger_inboxes WHERE trigger_id = ?1",
                params![trigger.id],
            )?;
            for inbox_id in &trigger.inbox_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO trigger_inboxes (trigger_id, inbox_id) VALUES (?1, ?2)",
                    params![trigger.id, inbox_id],
                )?;
            }
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// Active triggers with their linked inboxes, ordered by id.
pub async fn list_active(db: &Database) -> Result<Vec<TriggerRecord>, ParleyError> {
    db.connection()
        .call(|conn| -> Result<Vec<TriggerRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, t.idle_minutes, t.check_frequency_minutes,
                        t.require_no_assignee, ti.inbox_id
                 FROM triggers t
                 LEFT JOIN trigger_inboxes ti ON ti.trigger_id = t.id
                 WHERE t.active = 1
                 ORDER BY t.id, ti.inbox_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    TriggerRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        idle_minutes: row.get(2)?,
                        check_frequency_minutes: row.get(3)?,
                        active: true,
                        require_no_assignee: row.get(4)?,
                        inbox_ids: Vec::new(),
                    },
                    row.get::<_, Option<i64>>(5)?,
                ))
            })?;

            let mut by_id: BTreeMap<i64, TriggerRecord> = BTreeMap::new();
            for row in rows {
                let (trigger, inbox_id) = row?;
                let entry = by_id.entry(trigger.id).or_insert(trigger);
                if let Some(inbox_id) = inbox_id {
                    entry.inbox_ids.push(inbox_id);
                }
            }
            Ok(by_id.into_values().collect())
        })
        .await
        .map_err(map_tr_err)
}

/// How a ledger entry left by a failed execution is treated on later ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPolicy {
    /// The first claim is the only one, whatever its outcome.
    PermanentSkip,
    /// A `failed` entry may be re-claimed while its attempts stay below the bound.
    Retry { max_attempts: u32 },
}

/// Identity of one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionKey {
    pub conversation_id: i64,
    pub trigger_id: i64,
    pub bot_session_id: String,
}

/// A ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub status: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Registers an execution. Returns `true` only for the caller that created
/// (or, under [`ClaimPolicy::Retry`], re-claimed) the entry.
pub async fn claim(
    db: &Database,
    key: &ExecutionKey,
    policy: ClaimPolicy,
    now: DateTime<Utc>,
) -> Result<bool, ParleyError> {
    let key = key.clone();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let changed = match policy {
                ClaimPolicy::PermanentSkip => conn.execute(
                    "INSERT INTO trigger_executions
                        (conversation_id, trigger_id, bot_session_id, status, attempts, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 'claimed', 1, ?4, ?4)
                     ON CONFLICT(conversation_id, trigger_id, bot_session_id) DO NOTHING",
                    params![key.conversation_id, key.trigger_id, key.bot_session_id, now],
                )?,
                ClaimPolicy::Retry { max_attempts } => conn.execute(
                    "INSERT INTO trigger_executions
                        (conversation_id, trigger_id, bot_session_id, status, attempts, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 'claimed', 1, ?4, ?4)
                     ON CONFLICT(conversation_id, trigger_id, bot_session_id) DO UPDATE SET
                        status = 'claimed',
                        attempts = trigger_executions.attempts + 1,
                        updated_at = excluded.updated_at
                     WHERE trigger_executions.status = 'failed'
                       AND trigger_executions.attempts < ?5",
                    params![
                        key.conversation_id,
                        key.trigger_id,
                        key.bot_session_id,
                        now,
                        max_attempts
                    ],
                )?,
            };
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Records the outcome of a claimed execution.
pub async fn finish(
    db: &Database,
    key: &ExecutionKey,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), ParleyError> {
    let key = key.clone();
    let error = error.map(str::to_string);
    let now = format_ts(now);
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let status = if error.is_some() { "failed" } else { "succeeded" };
            conn.execute(
                "UPDATE trigger_executions SET status = ?4, last_error = ?5, updated_at = ?6
                 WHERE conversation_id = ?1 AND trigger_id = ?2 AND bot_session_id = ?3",
                params![
                    key.conversation_id,
                    key.trigger_id,
                    key.bot_session_id,
                    status,
                    error,
                    now
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn execution(
    db: &Database,
    key: &ExecutionKey,
) -> Result<Option<ExecutionRecord>, ParleyError> {
    let key = key.clone();
    db.connection()
        .call(move |conn| -> Result<Option<ExecutionRecord>, rusqlite::Error> {
            conn.query_row(
                "SELECT status, attempts, last_error FROM trigger_executions
                 WHERE conversation_id = ?1 AND trigger_id = ?2 AND bot_session_id = ?3",
                params![key.conversation_id, key.trigger_id, key.bot_session_id],
                |row| {
                    Ok(ExecutionRecord {
                        status: row.get(0)?,
                        attempts: row.get(1)?,
                        last_error: row.get(2)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        (db, dir)
    }

    fn key() -> ExecutionKey {
        ExecutionKey {
            conversation_id: 100,
            trigger_id: 4,
            bot_session_id: "bot-a".into(),
        }
    }

    #[tokio::test]
    async fn list_active_groups_inboxes() {
        let (db, _dir) = setup_db().await;
        // Foreign keys are on; seed the inboxes the links point at.
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch(
                    "INSERT INTO tenants (id, name) VALUES (1, 't');
                     INSERT INTO inboxes (id, tenant_id, name, bot_id) VALUES (3, 1, 'a', 'f'), (7, 1, 'b', 'f');",
                )
            })
            .await
            .unwrap();

        let mut trigger = TriggerRecord {
            id: 4,
            name: "idle_nudge".into(),
            idle_minutes: 5,
            check_frequency_minutes: 1,
            active: true,
            require_no_assignee: true,
            inbox_ids: vec![7, 3],
        };
        upsert_trigger(&db, &trigger).await.unwrap();
        trigger.id = 5;
        trigger.active = false;
        upsert_trigger(&db, &trigger).await.unwrap();

        let active = list_active(&db).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].inbox_ids, vec![3, 7]);
        assert!(active[0].require_no_assignee);
    }

    #[tokio::test]
    async fn permanent_skip_claims_once() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        assert!(claim(&db, &key(), ClaimPolicy::PermanentSkip, now).await.unwrap());
        assert!(!claim(&db, &key(), ClaimPolicy::PermanentSkip, now).await.unwrap());

        finish(&db, &key(), Some("boom"), now).await.unwrap();
        assert!(!claim(&db, &key(), ClaimPolicy::PermanentSkip, now).await.unwrap());
        let row = execution(&db, &key()).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn retry_policy_reclaims_failed_until_bound() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        let policy = ClaimPolicy::Retry { max_attempts: 2 };

        assert!(claim(&db, &key(), policy, now).await.unwrap());
        // Still claimed: a concurrent tick must not re-claim.
        assert!(!claim(&db, &key(), policy, now).await.unwrap());

        finish(&db, &key(), Some("502"), now).await.unwrap();
        assert!(claim(&db, &key(), policy, now).await.unwrap());
        finish(&db, &key(), Some("502"), now).await.unwrap();
        assert!(!claim(&db, &key(), policy, now).await.unwrap());

        let row = execution(&db, &key()).await.unwrap().unwrap();
        assert_eq!(row.attempts, 2);
    }

    #[tokio::test]
    async fn succeeded_entry_is_never_reclaimed() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        let policy = ClaimPolicy::Retry { max_attempts: 5 };
        assert!(claim(&db, &key(), policy, now).await.unwrap());
        finish(&db, &key(), None, now).await.unwrap();
        assert!(!claim(&db, &key(), policy, now).await.unwrap());
    }
}
