// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Parley configuration system.

use figment::Jail;
use parley_config::diagnostic::ConfigError;
use parley_config::{
    ParleyConfig, TriggerFailurePolicy, load_and_validate_str, load_config,
    load_config_from_str,
};

/// A file setting every section deserializes into the matching fields.
#[test]
fn full_toml_deserializes() {
    let toml = r#"
[log]
level = "debug"

[server]
bind_address = "0.0.0.0"
port = 9000
control_token = "s3cret"

[storage]
database_path = "/tmp/parley.db"
wal_mode = false

[dedup]
ttl_secs = 120

[buffer]
window_ms = 1500
max_messages = 5

[lock]
job_creation_ttl_ms = 2000
retry_count = 2

[session]
cache_ttl_secs = 600

[queue]
name = "ingest-test"
concurrency = 4
max_attempts = 7

[scheduler]
failure_policy = "retry"
max_attempts = 2
audit_notes = false

[auto_close]
enabled = false

[outbound]
message_delay_ms = 0

[bot_engine]
base_url = "https://bots.example.com/api"
api_token = "bt"

[channel]
base_url = "https://graph.example.com"

[platform]
base_url = "https://chat.example.com"
"#;

    let config = load_and_validate_str(toml).expect("valid config");
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.control_token.as_deref(), Some("s3cret"));
    assert!(!config.storage.wal_mode);
    assert_eq!(config.dedup.ttl_secs, 120);
    assert_eq!(config.buffer.window_ms, 1500);
    assert_eq!(config.buffer.max_messages, 5);
    assert_eq!(config.lock.job_creation_ttl_ms, 2000);
    assert_eq!(config.lock.retry_count, 2);
    assert_eq!(config.session.cache_ttl_secs, 600);
    assert_eq!(config.queue.name, "ingest-test");
    assert_eq!(config.queue.concurrency, 4);
    assert_eq!(config.queue.max_attempts, 7);
    assert_eq!(config.scheduler.failure_policy, TriggerFailurePolicy::Retry);
    assert_eq!(config.scheduler.max_attempts, 2);
    assert!(!config.scheduler.audit_notes);
    assert!(!config.auto_close.enabled);
    assert_eq!(config.outbound.message_delay_ms, 0);
    assert_eq!(config.bot_engine.api_token.as_deref(), Some("bt"));
}

/// Omitted sections fall back to their defaults.
#[test]
fn empty_toml_yields_defaults() {
    let config = load_and_validate_str("").expect("defaults are valid");
    assert_eq!(config.dedup.ttl_secs, 3600);
    assert_eq!(config.buffer.window_ms, 3000);
    assert_eq!(config.lock.job_creation_ttl_ms, 5000);
    assert_eq!(config.lock.job_processing_ttl_ms, 60_000);
    assert_eq!(config.session.cache_ttl_secs, 86_400);
    assert_eq!(config.queue.concurrency, 20);
    assert_eq!(
        config.scheduler.failure_policy,
        TriggerFailurePolicy::PermanentSkip
    );
    assert!(config.server.control_token.is_none());
}

/// A misspelled key yields an UnknownKey diagnostic with a suggestion and span.
#[test]
fn typo_gets_suggestion_and_span() {
    let toml = "[queue]\nconcurency = 4\n";
    let errors = load_and_validate_str(toml).unwrap_err();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey {
            key,
            suggestion,
            span,
            ..
        } => {
            assert_eq!(key, "concurency");
            assert_eq!(suggestion.as_deref(), Some("concurrency"));
            if let Some(span) = span {
                assert_eq!(&toml[span.offset()..span.offset() + span.len()], "concurency");
            }
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

/// Wrong value types are reported with the dotted key path.
#[test]
fn wrong_type_reports_key_path() {
    let errors = load_and_validate_str("[server]\nport = \"eighty\"\n").unwrap_err();
    match &errors[0] {
        ConfigError::InvalidType { key, .. } => assert_eq!(key, "server.port"),
        other => panic!("expected InvalidType, got {other:?}"),
    }
}

/// An unrecognized failure policy lists the accepted variants.
#[test]
fn unknown_failure_policy_is_rejected() {
    let errors =
        load_and_validate_str("[scheduler]\nfailure_policy = \"sometimes\"\n").unwrap_err();
    let message = errors[0].to_string();
    assert!(message.contains("sometimes"), "got: {message}");
}

/// Semantic validation runs after a successful parse.
#[test]
fn semantic_validation_errors_are_returned() {
    let errors = load_and_validate_str("[queue]\nconcurrency = 0\n").unwrap_err();
    assert!(matches!(errors[0], ConfigError::Validation { .. }));
}

/// Unknown top-level sections are rejected.
#[test]
fn unknown_section_is_rejected() {
    assert!(load_config_from_str("[redis]\nurl = \"redis://x\"\n").is_err());
}

/// The default config survives a serialize/parse cycle, keeping `Serialized::defaults` honest.
#[test]
fn default_config_serializes_to_loadable_toml() {
    let rendered = toml::to_string(&ParleyConfig::default()).expect("serializable");
    let config = load_config_from_str(&rendered).expect("reloadable");
    assert_eq!(config.queue.name, "ingest");
}

/// `PARLEY_*` variables override files, including keys with underscores.
#[test]
fn env_overrides_local_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "parley.toml",
            "[queue]\nconcurrency = 8\nmax_attempts = 2\n",
        )?;
        jail.set_env("PARLEY_QUEUE_MAX_ATTEMPTS", "9");
        jail.set_env("PARLEY_BOT_ENGINE_API_TOKEN", "from-env");
        jail.set_env("PARLEY_AUTO_CLOSE_ENABLED", "false");

        let config = load_config()?;
        assert_eq!(config.queue.concurrency, 8);
        assert_eq!(config.queue.max_attempts, 9);
        assert_eq!(config.bot_engine.api_token.as_deref(), Some("from-env"));
        assert!(!config.auto_close.enabled);
        Ok(())
    });
}

/// Diagnostics render through miette without panicking.
#[test]
fn errors_render() {
    let errors = load_and_validate_str("[buffer]\nwindow = 1\n").unwrap_err();
    parley_config::render_errors(&errors);
    let report = miette::Report::new(errors.into_iter().next().expect("one error"));
    assert!(format!("{report:?}").contains("window"));
}
