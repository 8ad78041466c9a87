// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for Parley.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Parley configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,

    /// HTTP server settings (webhook ingress and session control).
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Inbound message deduplication.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Debounce buffering of message bursts.
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Distributed lock tuning.
    #[serde(default)]
    pub lock: LockConfig,

    /// Session cache settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Durable queue and worker pool.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Idle-conversation trigger scheduler.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Unattended per-inbox auto-close sweeps.
    #[serde(default)]
    pub auto_close: AutoCloseConfig,

    /// Outbound message pacing.
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Bot engine endpoint.
    #[serde(default)]
    pub bot_engine: BotEngineConfig,

    /// Outbound messaging channel endpoint.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Conversation platform endpoint.
    #[serde(default)]
    pub platform: PlatformConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind the server to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to bind the server to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required on session-control routes. `None` disables them.
    #[serde(default)]
    pub control_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            control_token: None,
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file shared by all replicas on this host.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// Milliseconds SQLite waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("parley").join("parley.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("parley.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Deduplication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DedupConfig {
    /// How long a processed (inbox, message) marker is remembered.
    #[serde(default = "default_dedup_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_dedup_ttl_secs(),
        }
    }
}

fn default_dedup_ttl_secs() -> u64 {
    3600 // 1 hour
}

/// Debounce buffer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    /// Quiet period after the last message before a burst is dispatched.
    #[serde(default = "default_buffer_window_ms")]
    pub window_ms: u64,

    /// Maximum messages kept per buffer; the oldest are dropped beyond it.
    #[serde(default = "default_buffer_max_messages")]
    pub max_messages: usize,

    /// Extra lifetime of a buffer entry beyond the window.
    #[serde(default = "default_buffer_ttl_slack_ms")]
    pub ttl_slack_ms: u64,

    /// Interval of the sweep that flushes buffers whose owning timer was lost.
    #[serde(default = "default_buffer_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            window_ms: default_buffer_window_ms(),
            max_messages: default_buffer_max_messages(),
            ttl_slack_ms: default_buffer_ttl_slack_ms(),
            sweep_interval_ms: default_buffer_sweep_interval_ms(),
        }
    }
}

fn default_buffer_window_ms() -> u64 {
    3000
}

fn default_buffer_max_messages() -> usize {
    20
}

fn default_buffer_ttl_slack_ms() -> u64 {
    10_000
}

fn default_buffer_sweep_interval_ms() -> u64 {
    2_000
}

/// Distributed lock configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// TTL of the lock guarding dedup-check-then-enqueue.
    #[serde(default = "default_job_creation_ttl_ms")]
    pub job_creation_ttl_ms: u64,

    /// TTL of the lock guarding job execution inside the worker.
    #[serde(default = "default_job_processing_ttl_ms")]
    pub job_processing_ttl_ms: u64,

    /// Extra acquisition attempts after the first one fails.
    #[serde(default = "default_lock_retry_count")]
    pub retry_count: u32,

    /// Base delay between acquisition attempts.
    #[serde(default = "default_lock_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Random jitter added to each retry delay.
    #[serde(default = "default_lock_retry_jitter_ms")]
    pub retry_jitter_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            job_creation_ttl_ms: default_job_creation_ttl_ms(),
            job_processing_ttl_ms: default_job_processing_ttl_ms(),
            retry_count: default_lock_retry_count(),
            retry_delay_ms: default_lock_retry_delay_ms(),
            retry_jitter_ms: default_lock_retry_jitter_ms(),
        }
    }
}

fn default_job_creation_ttl_ms() -> u64 {
    5_000
}

fn default_job_processing_ttl_ms() -> u64 {
    60_000
}

fn default_lock_retry_count() -> u32 {
    0
}

fn default_lock_retry_delay_ms() -> u64 {
    200
}

fn default_lock_retry_jitter_ms() -> u64 {
    100
}

/// Session cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Sliding TTL of session cache entries.
    #[serde(default = "default_session_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_session_cache_ttl_secs(),
        }
    }
}

fn default_session_cache_ttl_secs() -> u64 {
    86_400 // 24 hours
}

/// Durable queue and worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Logical queue name inside the jobs table.
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Jobs processed concurrently per replica.
    #[serde(default = "default_queue_concurrency")]
    pub concurrency: usize,

    /// Attempts before a job is dead-lettered.
    #[serde(default = "default_queue_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on the retry delay.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Idle poll interval when the queue is empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time a claimed job stays invisible before another consumer may reclaim it.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            concurrency: default_queue_concurrency(),
            max_attempts: default_queue_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
        }
    }
}

fn default_queue_name() -> String {
    "ingest".to_string()
}

fn default_queue_concurrency() -> usize {
    20
}

fn default_queue_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_visibility_timeout_secs() -> u64 {
    300 // 5 minutes
}

/// What happens to a ledger entry whose bot-engine call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerFailurePolicy {
    /// Never fire the (conversation, trigger, bot-session) tuple again.
    #[default]
    PermanentSkip,
    /// Allow later ticks to re-claim the tuple up to `max_attempts` times.
    Retry,
}

/// Trigger scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Run the scheduler on this replica.
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Interval of the pass that reconciles buckets with trigger definitions.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Policy for executions that fail after registration.
    #[serde(default)]
    pub failure_policy: TriggerFailurePolicy,

    /// Total attempts allowed per tuple under the `retry` policy.
    #[serde(default = "default_trigger_max_attempts")]
    pub max_attempts: u32,

    /// Post a private note on the conversation when a trigger fires.
    #[serde(default = "default_audit_notes")]
    pub audit_notes: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            resync_interval_secs: default_resync_interval_secs(),
            failure_policy: TriggerFailurePolicy::default(),
            max_attempts: default_trigger_max_attempts(),
            audit_notes: default_audit_notes(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_resync_interval_secs() -> u64 {
    300
}

fn default_trigger_max_attempts() -> u32 {
    3
}

fn default_audit_notes() -> bool {
    true
}

/// Auto-close sweep configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AutoCloseConfig {
    /// Run per-inbox auto-close sweeps on this replica.
    #[serde(default = "default_auto_close_enabled")]
    pub enabled: bool,

    /// Interval between sweeps.
    #[serde(default = "default_auto_close_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for AutoCloseConfig {
    fn default() -> Self {
        Self {
            enabled: default_auto_close_enabled(),
            sweep_interval_secs: default_auto_close_interval_secs(),
        }
    }
}

fn default_auto_close_enabled() -> bool {
    true
}

fn default_auto_close_interval_secs() -> u64 {
    600
}

/// Outbound pacing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutboundConfig {
    /// Delay between consecutive messages of one bot turn, unless the bot specifies a wait.
    #[serde(default = "default_message_delay_ms")]
    pub message_delay_ms: u64,

    /// Upper bound on an upstream-specified wait.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            message_delay_ms: default_message_delay_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

fn default_message_delay_ms() -> u64 {
    1_000
}

fn default_max_wait_ms() -> u64 {
    30_000
}

/// Bot engine endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BotEngineConfig {
    /// Base URL of the bot engine API.
    #[serde(default = "default_bot_engine_url")]
    pub base_url: String,

    /// API token. `None` requires environment variable.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BotEngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_bot_engine_url(),
            api_token: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bot_engine_url() -> String {
    "http://127.0.0.1:3001/api/v1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

/// Outbound messaging channel endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Base URL of the channel's send API.
    #[serde(default = "default_channel_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: default_channel_url(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_channel_url() -> String {
    "https://graph.facebook.com/v21.0".to_string()
}

/// Conversation platform endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformConfig {
    /// Base URL of the conversation platform API.
    #[serde(default = "default_platform_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_platform_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
