// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Statements over the `kv_entries` table.
//!
//! Every read and conditional write compares `expires_at` against the caller's
//! clock (milliseconds since the epoch), so an expired row is indistinguishable
//! from a missing one even before it is purged.

use parley_core::ParleyError;
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};

pub async fn get(db: &Database, key: &str, now_ms: i64) -> Result<Option<String>, ParleyError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<String>, rusqlite::Error> {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
                params![key, now_ms],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set(
    db: &Database,
    key: &str,
    value: &str,
    expires_at_ms: i64,
) -> Result<(), ParleyError> {
    let (key, value) = (key.to_string(), value.to_string());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expires_at_ms],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Inserts the row, or overwrites an expired one. Returns whether the caller now owns the key.
pub async fn set_if_absent(
    db: &Database,
    key: &str,
    value: &str,
    now_ms: i64,
    expires_at_ms: i64,
) -> Result<bool, ParleyError> {
    let (key, value) = (key.to_string(), value.to_string());
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let changed = conn.execute(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
                 WHERE kv_entries.expires_at <= ?4",
                params![key, value, expires_at_ms, now_ms],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete(db: &Database, key: &str, now_ms: i64) -> Result<bool, ParleyError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let tx = conn.transaction()?;
            let live = tx.execute(
                "DELETE FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
                params![key, now_ms],
            )?;
            tx.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
            tx.commit()?;
            Ok(live > 0)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete_if_equals(
    db: &Database,
    key: &str,
    expected: &str,
    now_ms: i64,
) -> Result<bool, ParleyError> {
    let (key, expected) = (key.to_string(), expected.to_string());
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let n = conn.execute(
                "DELETE FROM kv_entries WHERE key = ?1 AND value = ?2 AND expires_at > ?3",
                params![key, expected, now_ms],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn expire_if_equals(
    db: &Database,
    key: &str,
    expected: &str,
    now_ms: i64,
    expires_at_ms: i64,
) -> Result<bool, ParleyError> {
    let (key, expected) = (key.to_string(), expected.to_string());
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let n = conn.execute(
                "UPDATE kv_entries SET expires_at = ?4
                 WHERE key = ?1 AND value = ?2 AND expires_at > ?3",
                params![key, expected, now_ms, expires_at_ms],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn keys_with_prefix(
    db: &Database,
    prefix: &str,
    now_ms: i64,
) -> Result<Vec<String>, ParleyError> {
    let prefix = prefix.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<String>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT key FROM kv_entries
                 WHERE substr(key, 1, length(?1)) = ?1 AND expires_at > ?2
                 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![prefix, now_ms], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete_prefix(
    db: &Database,
    prefix: &str,
    now_ms: i64,
) -> Result<Vec<String>, ParleyError> {
    let prefix = prefix.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<String>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let removed = {
                let mut stmt = tx.prepare(
                    "DELETE FROM kv_entries
                     WHERE substr(key, 1, length(?1)) = ?1
                     RETURNING key, expires_at",
                )?;
                let rows = stmt.query_map(params![prefix], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                let mut live = Vec::new();
                for row in rows {
                    let (key, expires_at) = row?;
                    if expires_at > now_ms {
                        live.push(key);
                    }
                }
                live
            };
            tx.commit()?;
            Ok(removed)
        })
        .await
        .map_err(map_tr_err)
}

/// Removes rows whose TTL has lapsed. Returns the number of rows deleted.
pub async fn purge_expired(db: &Database, now_ms: i64) -> Result<usize, ParleyError> {
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "DELETE FROM kv_entries WHERE expires_at <= ?1",
                params![now_ms],
            )
        })
        .await
        .map_err(map_tr_err)
}
