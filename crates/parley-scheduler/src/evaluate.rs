// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trigger predicate.

use chrono::{DateTime, Utc};
use parley_core::types::{ConversationSnapshot, ConversationStatus, TriggerRecord};

/// Whole minutes since the conversation's last activity. Zero if the
/// activity timestamp is in the future.
pub fn idle_minutes(snapshot: &ConversationSnapshot, now: DateTime<Utc>) -> i64 {
    (now - snapshot.last_activity_at).num_minutes().max(0)
}

/// Whether `trigger` should fire for a conversation in `snapshot` at `now`.
pub fn should_trigger(
    trigger: &TriggerRecord,
    snapshot: &ConversationSnapshot,
    now: DateTime<Utc>,
) -> bool {
    if snapshot.status != ConversationStatus::Open {
        return false;
    }
    if trigger.require_no_assignee && (snapshot.assignee_id.is_some() || snapshot.team_id.is_some())
    {
        return false;
    }
    idle_minutes(snapshot, now) >= i64::from(trigger.idle_minutes)
}
