// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Parley session gateway.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Parley configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides (`PARLEY_` prefix). All sections are optional and default to
/// sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// Process-level settings (logging).
    #[serde(default)]
    pub service: ServiceConfig,

    /// Session driver and lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Reconnection backoff settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Memory guardian settings.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Media cache settings.
    #[serde(default)]
    pub media: MediaConfig,

    /// Webhook egress settings.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// HTTP gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// What to do once reconnection attempts are exhausted.
///
/// This is an explicit deployment choice, not a core invariant: `restart`
/// exits the process with a distinct non-zero status so a supervising
/// process manager restarts it; `degrade` keeps the process alive in the
/// failed state and eventually attempts one more fresh start cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    Restart,
    Degrade,
}

/// Session driver and lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Which compiled-in driver to run (`sim` is the only in-tree driver;
    /// protocol-backed drivers register under their own names).
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Directory where the driver persists its credentials. Wiped on
    /// logout and on authentication failure to force a fresh QR.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Upper bound on one driver connect/initialize attempt.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound on tearing down a previous driver instance before a
    /// replacement is created. Cleanup failure never blocks recovery.
    #[serde(default = "default_cleanup_timeout_secs")]
    pub cleanup_timeout_secs: u64,

    /// Forward self-authored messages to the webhook. Off by default to
    /// avoid webhook echo loops.
    #[serde(default)]
    pub forward_own_messages: bool,

    /// Behavior after reconnection attempts are exhausted.
    #[serde(default = "default_exhaustion_policy")]
    pub exhaustion_policy: ExhaustionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            storage_path: default_storage_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
            cleanup_timeout_secs: default_cleanup_timeout_secs(),
            forward_own_messages: false,
            exhaustion_policy: default_exhaustion_policy(),
        }
    }
}

fn default_driver() -> String {
    "sim".to_string()
}

fn default_storage_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("parley").join("session"))
        .unwrap_or_else(|| std::path::PathBuf::from("parley-session"))
        .to_string_lossy()
        .into_owned()
}

fn default_connect_timeout_secs() -> u64 {
    45
}

fn default_cleanup_timeout_secs() -> u64 {
    8
}

fn default_exhaustion_policy() -> ExhaustionPolicy {
    ExhaustionPolicy::Restart
}

/// Reconnection backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Maximum retry attempts before the policy signals exhaustion.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per subsequent attempt.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Hard cap on the computed retry delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound on the random jitter added to each delay.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    250
}

/// Memory guardian configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Process memory budget in MB. Threshold ratios (soft/hard/critical)
    /// are fixed relative to this budget.
    #[serde(default = "default_budget_mb")]
    pub budget_mb: u64,

    /// Sampling interval in milliseconds.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            budget_mb: default_budget_mb(),
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}

fn default_budget_mb() -> u64 {
    512
}

fn default_sample_interval_ms() -> u64 {
    30_000
}

/// Media cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MediaConfig {
    /// Maximum number of cached media references. Oldest-inserted entries
    /// are evicted first once the bound is reached.
    #[serde(default = "default_cache_bound")]
    pub cache_bound: usize,

    /// Upper bound on one media download through the driver.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cache_bound: default_cache_bound(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

fn default_cache_bound() -> usize {
    200
}

fn default_download_timeout_secs() -> u64 {
    30
}

/// Webhook egress configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Endpoint receiving normalized messages. `None` disables dispatch.
    #[serde(default)]
    pub url: Option<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_webhook_timeout_ms(),
        }
    }
}

fn default_webhook_timeout_ms() -> u64 {
    5_000
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Host address to bind.
    #[serde(default = "default_gateway_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8080
}
