// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks run after deserialization.
//!
//! All failures are collected so a single run reports every problem.

use crate::diagnostic::ConfigError;
use crate::model::ParleyConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn invalid(errors: &mut Vec<ConfigError>, message: String) {
    errors.push(ConfigError::Validation { message });
}

fn require_positive(errors: &mut Vec<ConfigError>, key: &str, value: u64) {
    if value == 0 {
        invalid(errors, format!("{key} must be greater than zero"));
    }
}

fn require_url(errors: &mut Vec<ConfigError>, key: &str, value: &str) {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        invalid(
            errors,
            format!("{key} `{value}` must be an http:// or https:// URL"),
        );
    }
}

/// Validates a deserialized configuration.
pub fn validate_config(config: &ParleyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.log.level.as_str()) {
        invalid(
            &mut errors,
            format!(
                "log.level `{}` must be one of: {}",
                config.log.level,
                LOG_LEVELS.join(", ")
            ),
        );
    }

    let addr = config.server.bind_address.trim();
    if addr.is_empty() {
        invalid(&mut errors, "server.bind_address must not be empty".into());
    } else if addr.parse::<std::net::IpAddr>().is_err()
        && !addr
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        invalid(
            &mut errors,
            format!("server.bind_address `{addr}` is not a valid IP address or hostname"),
        );
    }

    if let Some(token) = &config.server.control_token
        && token.trim().is_empty()
    {
        invalid(
            &mut errors,
            "server.control_token must not be empty when set".into(),
        );
    }

    if config.storage.database_path.trim().is_empty() {
        invalid(&mut errors, "storage.database_path must not be empty".into());
    }

    require_positive(&mut errors, "dedup.ttl_secs", config.dedup.ttl_secs);
    require_positive(&mut errors, "buffer.window_ms", config.buffer.window_ms);
    require_positive(
        &mut errors,
        "buffer.max_messages",
        config.buffer.max_messages as u64,
    );
    require_positive(
        &mut errors,
        "buffer.sweep_interval_ms",
        config.buffer.sweep_interval_ms,
    );
    require_positive(
        &mut errors,
        "lock.job_creation_ttl_ms",
        config.lock.job_creation_ttl_ms,
    );
    require_positive(
        &mut errors,
        "lock.job_processing_ttl_ms",
        config.lock.job_processing_ttl_ms,
    );
    require_positive(
        &mut errors,
        "session.cache_ttl_secs",
        config.session.cache_ttl_secs,
    );

    if config.queue.name.trim().is_empty() {
        invalid(&mut errors, "queue.name must not be empty".into());
    }
    require_positive(
        &mut errors,
        "queue.concurrency",
        config.queue.concurrency as u64,
    );
    require_positive(
        &mut errors,
        "queue.max_attempts",
        u64::from(config.queue.max_attempts),
    );
    require_positive(
        &mut errors,
        "queue.poll_interval_ms",
        config.queue.poll_interval_ms,
    );
    require_positive(
        &mut errors,
        "queue.visibility_timeout_secs",
        config.queue.visibility_timeout_secs,
    );
    if config.queue.backoff_base_ms > config.queue.backoff_max_ms {
        invalid(
            &mut errors,
            format!(
                "queue.backoff_base_ms ({}) must not exceed queue.backoff_max_ms ({})",
                config.queue.backoff_base_ms, config.queue.backoff_max_ms
            ),
        );
    }

    require_positive(
        &mut errors,
        "scheduler.resync_interval_secs",
        config.scheduler.resync_interval_secs,
    );
    require_positive(
        &mut errors,
        "scheduler.max_attempts",
        u64::from(config.scheduler.max_attempts),
    );
    require_positive(
        &mut errors,
        "auto_close.sweep_interval_secs",
        config.auto_close.sweep_interval_secs,
    );

    require_url(
        &mut errors,
        "bot_engine.base_url",
        &config.bot_engine.base_url,
    );
    require_url(&mut errors, "channel.base_url", &config.channel.base_url);
    require_url(&mut errors, "platform.base_url", &config.platform.base_url);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
