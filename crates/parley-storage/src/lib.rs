// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for Parley.
//!
//! Provides WAL-mode SQLite storage with embedded migrations and typed
//! statement modules for sessions, triggers, the execution ledger and the
//! message log. The same database file also backs the shared [`SqliteKv`]
//! coordination table and the crash-safe [`SqliteJobQueue`].

pub mod database;
pub mod kv;
pub mod migrations;
pub mod queries;
pub mod queue;

pub use database::{Database, map_tr_err};
pub use kv::SqliteKv;
pub use queries::message_log::{Direction, LogEntry};
pub use queries::queue::QueueStats;
pub use queries::sessions::{SessionFilter, UpsertOutcome};
pub use queries::triggers::{ClaimPolicy, ExecutionKey, ExecutionRecord};
pub use queue::SqliteJobQueue;
