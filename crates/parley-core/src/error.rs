// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley session bridge.

use thiserror::Error;

/// The primary error type used across all Parley services and collaborator traits.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Configuration errors (invalid TOML, missing credentials, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable store or shared KV store failures (connection, query, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Job queue failures (enqueue/dequeue/ack).
    #[error("queue error: {message}")]
    Queue { message: String },

    /// Bot engine request failures (network, 5xx, malformed response).
    #[error("bot engine error: {message}")]
    BotEngine {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The bot engine no longer recognizes the session token.
    #[error("bot session not found: {session_id}")]
    BotSessionNotFound { session_id: String },

    /// Outbound messaging channel failures.
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Conversation platform API failures.
    #[error("platform error: {message}")]
    Platform {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Inbound payload is missing required identity fields or is irrelevant.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A session state transition that the state machine does not allow.
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Builds a storage error from anything that converts into a boxed error.
    pub fn storage(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ParleyError::Storage {
            source: source.into(),
        }
    }

    /// Returns true for failures the durable queue should retry with backoff.
    ///
    /// Validation, configuration and state-machine errors are permanent: retrying
    /// the same job cannot change their outcome.
    pub fn is_transient(&self) -> bool {
        match self {
            ParleyError::Storage { .. }
            | ParleyError::Queue { .. }
            | ParleyError::BotEngine { .. }
            | ParleyError::Channel { .. }
            | ParleyError::Platform { .. }
            | ParleyError::Timeout { .. }
            | ParleyError::Internal(_) => true,
            ParleyError::Config(_)
            | ParleyError::BotSessionNotFound { .. }
            | ParleyError::Validation(_)
            | ParleyError::NotFound { .. }
            | ParleyError::InvalidTransition { .. } => false,
        }
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(e: serde_json::Error) -> Self {
        ParleyError::Storage {
            source: Box::new(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(
            ParleyError::BotEngine {
                message: "502".into(),
                source: None
            }
            .is_transient()
        );
        assert!(
            ParleyError::Timeout {
                duration: std::time::Duration::from_secs(1)
            }
            .is_transient()
        );
        assert!(!ParleyError::Validation("missing inbox id".into()).is_transient());
        assert!(
            !ParleyError::BotSessionNotFound {
                session_id: "s".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn not_found_display() {
        let err = ParleyError::NotFound {
            entity: "inbox",
            id: "7".into(),
        };
        assert_eq!(err.to_string(), "inbox not found: 7");
    }
}
