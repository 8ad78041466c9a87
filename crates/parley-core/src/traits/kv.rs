// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared key-value store with per-key expiry.
//!
//! This is the coordination surface between replicas: locks, dedup markers,
//! buffer entries and the session cache all live here.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ParleyError;

/// A key-value store whose entries expire after a TTL.
///
/// Expired entries must behave exactly like absent ones for every operation.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Returns the live value for `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, ParleyError>;

    /// Unconditionally writes `value` with a fresh TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ParleyError>;

    /// Writes `value` only if no live entry exists. Returns whether the write happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, ParleyError>;

    /// Removes `key`. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, ParleyError>;

    /// Removes `key` only if its live value equals `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, ParleyError>;

    /// Resets the TTL of `key` only if its live value equals `expected`.
    async fn expire_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, ParleyError>;

    /// Lists live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ParleyError>;

    /// Removes every live key starting with `prefix` and returns the removed keys.
    async fn delete_prefix(&self, prefix: &str) -> Result<Vec<String>, ParleyError>;
}
