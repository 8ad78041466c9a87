// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Merge order, later wins: compiled defaults, `/etc/parley/parley.toml`,
//! `~/.config/parley/parley.toml`, `./parley.toml`, then `PARLEY_*` variables.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::ParleyConfig;

/// Sections addressable from the environment, longest names first so that
/// `auto_close_` wins over any shorter prefix.
const ENV_SECTIONS: &[&str] = &[
    "bot_engine",
    "auto_close",
    "scheduler",
    "platform",
    "outbound",
    "session",
    "storage",
    "channel",
    "buffer",
    "server",
    "dedup",
    "queue",
    "lock",
    "log",
];

pub(crate) const SYSTEM_CONFIG: &str = "/etc/parley/parley.toml";
pub(crate) const LOCAL_CONFIG: &str = "parley.toml";

pub(crate) fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("parley").join("parley.toml"))
}

/// Builds the full layered Figment without extracting it.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG))
        .merge(env_provider())
}

/// Loads configuration from the standard hierarchy with env overrides.
pub fn load_config() -> Result<ParleyConfig, figment::Error> {
    build_figment().extract()
}

/// Loads configuration from a TOML string over the defaults, ignoring files and env.
pub fn load_config_from_str(toml_content: &str) -> Result<ParleyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Loads configuration from an explicit file with env overrides.
pub fn load_config_from_path(path: &Path) -> Result<ParleyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Maps `PARLEY_<SECTION>_<KEY>` onto `<section>.<key>`.
///
/// Splitting on `_` would break keys such as `queue.max_attempts`, so the
/// section prefix is matched explicitly and only the first separator becomes a dot.
fn env_provider() -> Env {
    Env::prefixed("PARLEY_").map(|key| map_env_key(key.as_str()).into())
}

pub(crate) fn map_env_key(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_sections() {
        assert_eq!(map_env_key("queue_max_attempts"), "queue.max_attempts");
        assert_eq!(map_env_key("bot_engine_api_token"), "bot_engine.api_token");
        assert_eq!(
            map_env_key("auto_close_sweep_interval_secs"),
            "auto_close.sweep_interval_secs"
        );
        assert_eq!(map_env_key("log_level"), "log.level");
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }
}
