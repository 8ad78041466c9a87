// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for Parley, the multi-tenant bot-session bridge.
//!
//! This crate provides the error type, the domain types that flow between
//! ingestion, session and scheduling services, and the collaborator traits
//! every backend implements.

pub mod error;
pub mod traits;
pub mod types;

pub use error::ParleyError;
pub use traits::{
    BotEngine, Clock, ConversationPlatform, JobQueue, KvStore, MessagingChannel, MonotonicClock,
    SystemClock,
};
pub use types::{ConversationKey, NormalizedMessage, SessionRecord, SessionState};

/// Formats a timestamp the way every Parley table stores it.
pub fn format_ts(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses a timestamp written by [`format_ts`] (or any RFC 3339 string).
pub fn parse_ts(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, ParleyError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| ParleyError::storage(format!("invalid timestamp `{raw}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_round_trip() {
        let ts = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let raw = format_ts(ts);
        assert_eq!(raw, "2026-01-02T03:04:05.000Z");
        assert_eq!(parse_ts(&raw).unwrap(), ts);
    }

    #[test]
    fn formatted_timestamps_sort_lexically() {
        let a = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::milliseconds(1500);
        assert!(format_ts(a) < format_ts(b));
    }

    #[test]
    fn all_collaborator_traits_are_exported() {
        fn _kv<T: KvStore>() {}
        fn _queue<T: JobQueue>() {}
        fn _bot<T: BotEngine>() {}
        fn _channel<T: MessagingChannel>() {}
        fn _platform<T: ConversationPlatform>() {}
        fn _clock<T: Clock>() {}
    }
}
