// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable bot-session rows and their choice edges.
//!
//! Two unique indexes carry the lifecycle guarantees: the 5-tuple identity
//! `(tenant, inbox, conversation, contact, bot_session_id)` and at most one
//! live (`active` or `paused`) row per conversation thread.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use parley_core::types::{ChoiceEdge, ConversationKey, LastTrigger, SessionRecord, SessionState};
use parley_core::{ParleyError, format_ts};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params, params_from_iter};

use crate::database::{Database, map_tr_err, read_opt_ts, read_ts};

const SESSION_COLUMNS: &str = "id, tenant_id, inbox_id, conversation_id, contact_address, \
     contact_name, bot_session_id, bot_result_id, state, last_trigger_id, last_trigger_name, \
     last_trigger_at, created_at, updated_at, closed_at";

/// Structured selection over `bot_sessions`. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    /// Match any of these states; empty matches every state.
    pub states: Vec<SessionState>,
    pub tenant_id: Option<i64>,
    pub inbox_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub contact_address: Option<String>,
    /// Only rows created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl SessionFilter {
    /// Selects the live rows of one conversation, optionally narrowed to one contact.
    pub fn conversation(
        tenant_id: i64,
        inbox_id: i64,
        conversation_id: i64,
        contact_address: Option<&str>,
    ) -> Self {
        Self {
            states: vec![SessionState::Active, SessionState::Paused],
            tenant_id: Some(tenant_id),
            inbox_id: Some(inbox_id),
            conversation_id: Some(conversation_id),
            contact_address: contact_address.map(str::to_string),
            ..Self::default()
        }
    }

    /// Renders the WHERE clause and its positional parameters.
    ///
    /// Every value is bound; nothing from the filter is spliced into the SQL text.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if !self.states.is_empty() {
            let marks = vec!["?"; self.states.len()].join(", ");
            clauses.push(format!("state IN ({marks})"));
            values.extend(self.states.iter().map(|s| Value::Text(s.to_string())));
        }
        if let Some(tenant_id) = self.tenant_id {
            clauses.push("tenant_id = ?".to_string());
            values.push(Value::Integer(tenant_id));
        }
        if let Some(inbox_id) = self.inbox_id {
            clauses.push("inbox_id = ?".to_string());
            values.push(Value::Integer(inbox_id));
        }
        if let Some(conversation_id) = self.conversation_id {
            clauses.push("conversation_id = ?".to_string());
            values.push(Value::Integer(conversation_id));
        }
        if let Some(contact) = &self.contact_address {
            clauses.push("contact_address = ?".to_string());
            values.push(Value::Text(contact.clone()));
        }
        if let Some(before) = self.created_before {
            clauses.push("created_at < ?".to_string());
            values.push(Value::Text(format_ts(before)));
        }

        let mut sql = if clauses.is_empty() {
            String::from("1 = 1")
        } else {
            clauses.join(" AND ")
        };
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::from(limit)));
        }
        (sql, values)
    }
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let state_raw: String = row.get(8)?;
    let state = SessionState::from_str(&state_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let trigger_id: Option<i64> = row.get(9)?;
    let trigger_name: Option<String> = row.get(10)?;
    let trigger_at = read_opt_ts(row, 11)?;
    let last_trigger = match (trigger_id, trigger_name, trigger_at) {
        (Some(trigger_id), Some(trigger_name), Some(fired_at)) => Some(LastTrigger {
            trigger_id,
            trigger_name,
            fired_at,
        }),
        _ => None,
    };

    Ok(SessionRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        inbox_id: row.get(2)?,
        conversation_id: row.get(3)?,
        contact_address: row.get(4)?,
        contact_name: row.get(5)?,
        bot_session_id: row.get(6)?,
        bot_result_id: row.get(7)?,
        state,
        last_trigger,
        created_at: read_ts(row, 12)?,
        updated_at: read_ts(row, 13)?,
        closed_at: read_opt_ts(row, 14)?,
    })
}

fn select_one(
    conn: &rusqlite::Connection,
    where_clause: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Option<SessionRecord>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM bot_sessions WHERE {where_clause}"),
        params,
        row_to_session,
    )
    .optional()
}

fn select_edges(conn: &rusqlite::Connection, session_id: &str) -> rusqlite::Result<Vec<ChoiceEdge>> {
    let mut stmt = conn.prepare(
        "SELECT choice_key, label, edge_id FROM session_choice_edges
         WHERE session_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok(ChoiceEdge {
            choice_key: row.get(0)?,
            label: row.get(1)?,
            edge_id: row.get(2)?,
        })
    })?;
    rows.collect()
}

/// Returns the live (active or paused) session of a conversation thread with its choice edges.
pub async fn find_live(
    db: &Database,
    key: &ConversationKey,
) -> Result<Option<(SessionRecord, Vec<ChoiceEdge>)>, ParleyError> {
    let key = key.clone();
    db.connection()
        .call(move |conn| -> Result<Option<(SessionRecord, Vec<ChoiceEdge>)>, rusqlite::Error> {
            let record = select_one(
                conn,
                "tenant_id = ?1 AND inbox_id = ?2 AND conversation_id = ?3
                 AND contact_address = ?4 AND state IN ('active', 'paused')",
                params![
                    key.tenant_id,
                    key.inbox_id,
                    key.conversation_id,
                    key.contact_address
                ],
            )?;
            match record {
                Some(record) => {
                    let edges = select_edges(conn, &record.id)?;
                    Ok(Some((record, edges)))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_by_id(db: &Database, id: &str) -> Result<Option<SessionRecord>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<SessionRecord>, rusqlite::Error> {
            select_one(conn, "id = ?1", params![id])
        })
        .await
        .map_err(map_tr_err)
}

/// Outcome of [`upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The row as stored (its `id` is the existing one when the 5-tuple already existed).
    pub record: SessionRecord,
    /// Live rows of the same thread with another bot session, now expired.
    pub superseded: Vec<String>,
}

/// Inserts or updates a session by its 5-tuple and replaces its choice edges.
///
/// Any other live row on the same thread is expired first, so the thread never
/// holds two live sessions. Updating a row that is already terminal fails with
/// [`ParleyError::InvalidTransition`].
///
/// An upsert never changes the state of an existing row: state moves only
/// through the transition functions. A new row that supersedes a paused one
/// starts paused.
pub async fn upsert(
    db: &Database,
    record: &SessionRecord,
    edges: &[ChoiceEdge],
) -> Result<UpsertOutcome, ParleyError> {
    let record = record.clone();
    let edges = edges.to_vec();
    let result = db
        .connection()
        .call(move |conn| -> Result<Result<UpsertOutcome, (String, String)>, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = format_ts(record.updated_at);

            let existing = select_one(
                &tx,
                "tenant_id = ?1 AND inbox_id = ?2 AND conversation_id = ?3
                 AND contact_address = ?4 AND bot_session_id = ?5",
                params![
                    record.tenant_id,
                    record.inbox_id,
                    record.conversation_id,
                    record.contact_address,
                    record.bot_session_id
                ],
            )?;
            if let Some(existing) = &existing
                && existing.state.is_terminal()
            {
                return Ok(Err((existing.state.to_string(), record.state.to_string())));
            }

            let sibling_paused: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM bot_sessions
                 WHERE tenant_id = ?1 AND inbox_id = ?2 AND conversation_id = ?3
                   AND contact_address = ?4 AND bot_session_id <> ?5
                   AND state = 'paused')",
                params![
                    record.tenant_id,
                    record.inbox_id,
                    record.conversation_id,
                    record.contact_address,
                    record.bot_session_id
                ],
                |row| row.get(0),
            )?;
            let superseded: Vec<String> = {
                let mut stmt = tx.prepare(
                    "UPDATE bot_sessions SET state = 'expired', updated_at = ?6
                     WHERE tenant_id = ?1 AND inbox_id = ?2 AND conversation_id = ?3
                       AND contact_address = ?4 AND bot_session_id <> ?5
                       AND state IN ('active', 'paused')
                     RETURNING id",
                )?;
                let rows = stmt.query_map(
                    params![
                        record.tenant_id,
                        record.inbox_id,
                        record.conversation_id,
                        record.contact_address,
                        record.bot_session_id,
                        now
                    ],
                    |row| row.get(0),
                )?;
                rows.collect::<Result<_, _>>()?
            };
            let inserted_state = if sibling_paused {
                SessionState::Paused
            } else {
                record.state
            };

            let (last_id, last_name, last_at) = match &record.last_trigger {
                Some(t) => (
                    Some(t.trigger_id),
                    Some(t.trigger_name.clone()),
                    Some(format_ts(t.fired_at)),
                ),
                None => (None, None, None),
            };
            let session_id = existing
                .as_ref()
                .map_or_else(|| record.id.clone(), |e| e.id.clone());

            tx.execute(
                "INSERT INTO bot_sessions
                    (id, tenant_id, inbox_id, conversation_id, contact_address, contact_name,
                     bot_session_id, bot_result_id, state, last_trigger_id, last_trigger_name,
                     last_trigger_at, created_at, updated_at, closed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(tenant_id, inbox_id, conversation_id, contact_address, bot_session_id)
                 DO UPDATE SET
                    contact_name = COALESCE(excluded.contact_name, bot_sessions.contact_name),
                    bot_result_id = COALESCE(excluded.bot_result_id, bot_sessions.bot_result_id),
                    last_trigger_id = COALESCE(excluded.last_trigger_id, bot_sessions.last_trigger_id),
                    last_trigger_name = COALESCE(excluded.last_trigger_name, bot_sessions.last_trigger_name),
                    last_trigger_at = COALESCE(excluded.last_trigger_at, bot_sessions.last_trigger_at),
                    updated_at = excluded.updated_at",
                params![
                    session_id,
                    record.tenant_id,
                    record.inbox_id,
                    record.conversation_id,
                    record.contact_address,
                    record.contact_name,
                    record.bot_session_id,
                    record.bot_result_id,
                    inserted_state.to_string(),
                    last_id,
                    last_name,
                    last_at,
                    format_ts(record.created_at),
                    now,
                    record.closed_at.map(format_ts),
                ],
            )?;

            tx.execute(
                "DELETE FROM session_choice_edges WHERE session_id = ?1",
                params![session_id],
            )?;
            for edge in &edges {
                tx.execute(
                    "INSERT INTO session_choice_edges (session_id, choice_key, label, edge_id)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(session_id, choice_key) DO NOTHING",
                    params![session_id, edge.choice_key, edge.label, edge.edge_id],
                )?;
            }

            let stored = select_one(&tx, "id = ?1", params![session_id])?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(UpsertOutcome {
                record: stored,
                superseded,
            }))
        })
        .await
        .map_err(map_tr_err)?;

    result.map_err(|(from, to)| ParleyError::InvalidTransition { from, to })
}

/// Moves every row matching `filter` whose state allows it into `to`.
///
/// Returns the rows as they were before the transition.
pub async fn transition_matching(
    db: &Database,
    filter: &SessionFilter,
    to: SessionState,
    now: DateTime<Utc>,
) -> Result<Vec<SessionRecord>, ParleyError> {
    let (where_clause, values) = filter.to_sql();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| -> Result<Vec<SessionRecord>, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let candidates: Vec<SessionRecord> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM bot_sessions WHERE {where_clause}"
                ))?;
                let rows = stmt.query_map(params_from_iter(values.iter()), row_to_session)?;
                rows.collect::<Result<_, _>>()?
            };

            let mut moved = Vec::with_capacity(candidates.len());
            for record in candidates {
                if !record.state.can_transition_to(to) || record.state == to {
                    continue;
                }
                let closed_at = to.is_terminal().then(|| now.clone());
                tx.execute(
                    "UPDATE bot_sessions SET state = ?2, updated_at = ?3,
                        closed_at = COALESCE(?4, closed_at)
                     WHERE id = ?1",
                    params![record.id, to.to_string(), now, closed_at],
                )?;
                moved.push(record);
            }
            tx.commit()?;
            Ok(moved)
        })
        .await
        .map_err(map_tr_err)
}

/// Moves one session into `to`, enforcing the state machine.
///
/// Returns the updated row. Transitioning into the current state is a no-op.
pub async fn transition_by_id(
    db: &Database,
    id: &str,
    to: SessionState,
    now: DateTime<Utc>,
) -> Result<SessionRecord, ParleyError> {
    let id_owned = id.to_string();
    let now = format_ts(now);
    let result = db
        .connection()
        .call(move |conn| -> Result<Option<Result<SessionRecord, SessionState>>, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(current) = select_one(&tx, "id = ?1", params![id_owned])? else {
                return Ok(None);
            };
            if current.state == to && !to.is_terminal() {
                return Ok(Some(Ok(current)));
            }
            if !current.state.can_transition_to(to) {
                return Ok(Some(Err(current.state)));
            }
            let closed_at = to.is_terminal().then(|| now.clone());
            tx.execute(
                "UPDATE bot_sessions SET state = ?2, updated_at = ?3,
                    closed_at = COALESCE(?4, closed_at)
                 WHERE id = ?1",
                params![id_owned, to.to_string(), now, closed_at],
            )?;
            let updated = select_one(&tx, "id = ?1", params![id_owned])?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Some(Ok(updated)))
        })
        .await
        .map_err(map_tr_err)?;

    match result {
        None => Err(ParleyError::NotFound {
            entity: "session",
            id: id.to_string(),
        }),
        Some(Ok(record)) => Ok(record),
        Some(Err(from)) => Err(ParleyError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }),
    }
}

/// Lists rows matching `filter`.
pub async fn list(db: &Database, filter: &SessionFilter) -> Result<Vec<SessionRecord>, ParleyError> {
    let (where_clause, values) = filter.to_sql();
    db.connection()
        .call(move |conn| -> Result<Vec<SessionRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM bot_sessions WHERE {where_clause}"
            ))?;
            let rows = stmt.query_map(params_from_iter(values.iter()), row_to_session)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Records the trigger that last fired on a session.
pub async fn set_last_trigger(
    db: &Database,
    id: &str,
    trigger: &LastTrigger,
) -> Result<(), ParleyError> {
    let id = id.to_string();
    let trigger = trigger.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let fired_at = format_ts(trigger.fired_at);
            conn.execute(
                "UPDATE bot_sessions SET last_trigger_id = ?2, last_trigger_name = ?3,
                    last_trigger_at = ?4, updated_at = ?4
                 WHERE id = ?1",
                params![id, trigger.trigger_id, trigger.trigger_name, fired_at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Choice edges stored for a session.
pub async fn choice_edges(db: &Database, session_id: &str) -> Result<Vec<ChoiceEdge>, ParleyError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<ChoiceEdge>, rusqlite::Error> {
            select_edges(conn, &session_id)
        })
        .await
        .map_err(map_tr_err)
}
