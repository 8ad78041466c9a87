// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bot-session lifecycle for Parley.
//!
//! [`SessionStore`] owns the state machine `active ⇄ paused`,
//! `active|paused → closed|expired` and keeps the shared-store cache
//! consistent with the durable rows in `parley-storage`.

pub mod cache;
pub mod choice;
pub mod filter;
pub mod store;

pub use cache::{SessionCache, SessionCacheEntry, conversation_prefix, session_key};
pub use choice::{reply_text, resolve_choice};
pub use filter::{BulkCloseFilter, BulkCloseResult};
pub use store::SessionStore;
