// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only record of messages exchanged on a session.

use chrono::{DateTime, Utc};
use parley_core::{ParleyError, format_ts};
use rusqlite::params;

use crate::database::{Database, map_tr_err, read_ts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// One logged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub session_id: Option<String>,
    pub tenant_id: i64,
    pub inbox_id: i64,
    pub conversation_id: i64,
    pub direction: Direction,
    pub message_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub async fn append(db: &Database, entries: &[LogEntry]) -> Result<(), ParleyError> {
    if entries.is_empty() {
        return Ok(());
    }
    let entries = entries.to_vec();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO message_log
                        (session_id, tenant_id, inbox_id, conversation_id, direction,
                         message_id, provider_message_id, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for e in &entries {
                    stmt.execute(params![
                        e.session_id,
                        e.tenant_id,
                        e.inbox_id,
                        e.conversation_id,
                        e.direction.as_str(),
                        e.message_id,
                        e.provider_message_id,
                        e.content,
                        format_ts(e.created_at),
                    ])?;
                }
            }
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// Entries for a session in insertion order.
pub async fn for_session(db: &Database, session_id: &str) -> Result<Vec<LogEntry>, ParleyError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<LogEntry>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT session_id, tenant_id, inbox_id, conversation_id, direction,
                        message_id, provider_message_id, content, created_at
                 FROM message_log WHERE session_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                let direction: String = row.get(4)?;
                Ok(LogEntry {
                    session_id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    inbox_id: row.get(2)?,
                    conversation_id: row.get(3)?,
                    direction: if direction == "outbound" {
                        Direction::Outbound
                    } else {
                        Direction::Inbound
                    },
                    message_id: row.get(5)?,
                    provider_message_id: row.get(6)?,
                    content: row.get(7)?,
                    created_at: read_ts(row, 8)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_preserves_order() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let now = parley_core::parse_ts(&format_ts(Utc::now())).unwrap();
        let entry = |direction, content: &str| LogEntry {
            session_id: Some("s1".into()),
            tenant_id: 1,
            inbox_id: 7,
            conversation_id: 100,
            direction,
            message_id: None,
            provider_message_id: None,
            content: content.into(),
            created_at: now,
        };

        append(
            &db,
            &[
                entry(Direction::Inbound, "hi"),
                entry(Direction::Outbound, "hello"),
                entry(Direction::Outbound, "how can I help?"),
            ],
        )
        .await
        .unwrap();

        let log = for_session(&db, "s1").await.unwrap();
        let contents: Vec<_> = log.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["hi", "hello", "how can I help?"]);
        assert_eq!(log[1].direction, Direction::Outbound);
        assert_eq!(log[0].created_at, now);
    }
}
