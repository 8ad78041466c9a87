// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bulk-close selection.

use chrono::{DateTime, Duration, Utc};
use parley_core::ParleyError;
use parley_core::types::{ConversationStatus, SessionState};
use parley_storage::SessionFilter;
use serde::{Deserialize, Serialize};

/// Which sessions a bulk close applies to. Unset fields do not narrow the selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkCloseFilter {
    /// Session state to close; both live states when unset.
    #[serde(default)]
    pub status: Option<SessionState>,
    /// Only sessions created at least this many hours ago.
    #[serde(default)]
    pub older_than_hours: Option<u32>,
    /// Only sessions whose upstream conversation currently has this status.
    /// Costs one platform lookup per candidate session.
    #[serde(default)]
    pub conversation_status: Option<ConversationStatus>,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub inbox_id: Option<i64>,
}

impl BulkCloseFilter {
    /// Builds the durable-store selection for this filter as of `now`.
    pub fn to_session_filter(&self, now: DateTime<Utc>) -> Result<SessionFilter, ParleyError> {
        let states = match self.status {
            None => vec![SessionState::Active, SessionState::Paused],
            Some(state) if state.is_terminal() => {
                return Err(ParleyError::Validation(format!(
                    "cannot bulk-close sessions that are already {state}"
                )));
            }
            Some(state) => vec![state],
        };
        Ok(SessionFilter {
            states,
            tenant_id: self.tenant_id,
            inbox_id: self.inbox_id,
            created_before: self
                .older_than_hours
                .map(|hours| now - Duration::hours(i64::from(hours))),
            ..SessionFilter::default()
        })
    }
}

/// Outcome of a bulk close.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkCloseResult {
    pub closed: usize,
    pub cache_keys_removed: usize,
    pub session_ids: Vec<String>,
}
