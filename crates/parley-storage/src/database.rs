// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! Within a process every statement runs on tokio-rusqlite's single background
//! thread. Replicas sharing the file serialize through SQLite's own locking,
//! bounded by `busy_timeout`.

use std::path::Path;

use chrono::{DateTime, Utc};
use parley_config::model::StorageConfig;
use parley_core::ParleyError;
use tracing::{debug, info};

use crate::migrations;

/// Handle to the Parley SQLite database.
///
/// Cloning is cheap; clones share the same background connection.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path` with default settings.
    pub async fn open(path: &str) -> Result<Self, ParleyError> {
        Self::open_with(&StorageConfig {
            database_path: path.to_string(),
            ..StorageConfig::default()
        })
        .await
    }

    /// Opens the database described by `config`, applies PRAGMAs and runs migrations.
    pub async fn open_with(config: &StorageConfig) -> Result<Self, ParleyError> {
        let path = Path::new(&config.database_path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(ParleyError::storage)?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(ParleyError::storage)?;

        let journal = if config.wal_mode { "WAL" } else { "DELETE" };
        let busy_timeout = config.busy_timeout_ms;
        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = {journal};
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {busy_timeout};"
            ))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        conn.call(|conn| -> Result<(), ParleyError> { migrations::run_migrations(conn) })
            .await
            .map_err(|e| ParleyError::storage(e.to_string()))?;

        info!(path = %config.database_path, wal = config.wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Cheap liveness probe used by the health endpoint.
    pub async fn ping(&self) -> Result<(), ParleyError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Checkpoints the WAL and closes the connection.
    pub async fn close(self) -> Result<(), ParleyError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        self.conn.close().await.map_err(ParleyError::storage)
    }
}

/// Converts a tokio-rusqlite error into a [`ParleyError::Storage`].
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> ParleyError {
    ParleyError::storage(e)
}

/// Reads a timestamp column written with [`parley_core::format_ts`].
pub(crate) fn read_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_column_ts(&raw, idx)
}

/// Reads a nullable timestamp column.
pub(crate) fn read_opt_ts(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_column_ts(&raw, idx)).transpose()
}

fn parse_column_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
