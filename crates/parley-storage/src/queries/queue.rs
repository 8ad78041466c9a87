// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue operations for crash-safe job processing.
//!
//! Jobs move `pending -> processing -> completed`. A failed job returns to
//! `pending` with a later `available_at` until its attempts run out, then
//! becomes `dead`. A `processing` row whose `locked_until` has passed belongs
//! to a crashed consumer and is claimable again.

use chrono::{DateTime, Utc};
use parley_core::{ParleyError, format_ts};
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use crate::database::{Database, map_tr_err};

/// A claimed row, payload still serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedRow {
    pub id: i64,
    pub payload: String,
    /// Attempts already recorded before this claim.
    pub attempts: u32,
}

/// Outcome of recording a failure against a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedRow {
    Retry { attempts: u32, available_at: String },
    Dead { attempts: u32 },
}

/// Row counts per status for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub dead: u64,
}

/// Enqueues a payload, visible immediately. Returns the row id.
pub async fn enqueue(
    db: &Database,
    queue_name: &str,
    payload: &str,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Result<i64, ParleyError> {
    let queue_name = queue_name.to_string();
    let payload = payload.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| -> Result<i64, rusqlite::Error> {
            conn.execute(
                "INSERT INTO job_queue
                    (queue_name, payload, status, attempts, max_attempts, available_at, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4, ?4)",
                params![queue_name, payload, max_attempts, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Claims the oldest ready row and hides it until `locked_until`.
///
/// Reclaiming a row abandoned by a crashed consumer counts as an attempt; a
/// row that exhausts its attempts this way is dead-lettered instead of returned.
pub async fn dequeue(
    db: &Database,
    queue_name: &str,
    now: DateTime<Utc>,
    locked_until: DateTime<Utc>,
) -> Result<Option<ClaimedRow>, ParleyError> {
    let queue_name = queue_name.to_string();
    let now = format_ts(now);
    let locked_until = format_ts(locked_until);
    db.connection()
        .call(move |conn| -> Result<Option<ClaimedRow>, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let claimed = loop {
                let candidate = tx
                    .query_row(
                        "SELECT id, payload, status, attempts, max_attempts FROM job_queue
                         WHERE queue_name = ?1
                           AND ((status = 'pending' AND available_at <= ?2)
                             OR (status = 'processing' AND locked_until <= ?2))
                         ORDER BY available_at ASC, id ASC
                         LIMIT 1",
                        params![queue_name, now],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, u32>(3)?,
                                row.get::<_, u32>(4)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((id, payload, status, mut attempts, max_attempts)) = candidate else {
                    break None;
                };

                if status == "processing" {
                    attempts += 1;
                    if attempts >= max_attempts {
                        tx.execute(
                            "UPDATE job_queue SET status = 'dead', attempts = ?2, locked_until = NULL,
                                last_error = 'visibility timeout expired', updated_at = ?3
                             WHERE id = ?1",
                            params![id, attempts, now],
                        )?;
                        continue;
                    }
                }

                tx.execute(
                    "UPDATE job_queue SET status = 'processing', attempts = ?2,
                        locked_until = ?3, updated_at = ?4
                     WHERE id = ?1",
                    params![id, attempts, locked_until, now],
                )?;
                break Some(ClaimedRow {
                    id,
                    payload,
                    attempts,
                });
            };
            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(map_tr_err)
}

/// Marks a row completed.
pub async fn ack(db: &Database, id: i64, now: DateTime<Utc>) -> Result<(), ParleyError> {
    let now = format_ts(now);
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE job_queue SET status = 'completed', locked_until = NULL, updated_at = ?2
                 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Records a failed attempt. `retry_at` is used when attempts remain.
pub async fn fail(
    db: &Database,
    id: i64,
    error: &str,
    now: DateTime<Utc>,
    retry_at: DateTime<Utc>,
) -> Result<FailedRow, ParleyError> {
    let error = error.to_string();
    let now = format_ts(now);
    let retry_at = format_ts(retry_at);
    db.connection()
        .call(move |conn| -> Result<FailedRow, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let (attempts, max_attempts): (u32, u32) = tx.query_row(
                "SELECT attempts, max_attempts FROM job_queue WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let attempts = attempts + 1;
            let outcome = if attempts >= max_attempts {
                tx.execute(
                    "UPDATE job_queue SET status = 'dead', attempts = ?2, last_error = ?3,
                        locked_until = NULL, updated_at = ?4
                     WHERE id = ?1",
                    params![id, attempts, error, now],
                )?;
                FailedRow::Dead { attempts }
            } else {
                tx.execute(
                    "UPDATE job_queue SET status = 'pending', attempts = ?2, last_error = ?3,
                        locked_until = NULL, available_at = ?4, updated_at = ?5
                     WHERE id = ?1",
                    params![id, attempts, error, retry_at, now],
                )?;
                FailedRow::Retry {
                    attempts,
                    available_at: retry_at,
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)
}

/// Moves a row straight to `dead`, used for payloads that cannot be decoded.
pub async fn bury(db: &Database, id: i64, error: &str, now: DateTime<Utc>) -> Result<(), ParleyError> {
    let error = error.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE job_queue SET status = 'dead', last_error = ?2, locked_until = NULL,
                    updated_at = ?3
                 WHERE id = ?1",
                params![id, error, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn stats(db: &Database, queue_name: &str) -> Result<QueueStats, ParleyError> {
    let queue_name = queue_name.to_string();
    db.connection()
        .call(move |conn| -> Result<QueueStats, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM job_queue WHERE queue_name = ?1 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![queue_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut stats = QueueStats::default();
            for row in rows {
                let (status, n) = row?;
                let n = n.max(0) as u64;
                match status.as_str() {
                    "pending" => stats.pending = n,
                    "processing" => stats.processing = n,
                    "dead" => stats.dead = n,
                    _ => {}
                }
            }
            Ok(stats)
        })
        .await
        .map_err(map_tr_err)
}

/// Status and attempt count of a row, for tests and diagnostics.
pub async fn status_of(db: &Database, id: i64) -> Result<Option<(String, u32)>, ParleyError> {
    db.connection()
        .call(move |conn| -> Result<Option<(String, u32)>, rusqlite::Error> {
            conn.query_row(
                "SELECT status, attempts FROM job_queue WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}
