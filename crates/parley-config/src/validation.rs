// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes, such as valid bind addresses, positive bounds, and
//! well-formed webhook URLs.

use crate::diagnostic::ConfigError;
use crate::model::ParleyConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &ParleyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let host = config.gateway.host.trim();
    if host.is_empty() {
        errors.push(ConfigError::Validation {
            message: "gateway.host must not be empty".to_string(),
        });
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(ConfigError::Validation {
                message: format!("gateway.host `{host}` is not a valid IP address or hostname"),
            });
        }
    }

    if config.session.driver.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "session.driver must not be empty".to_string(),
        });
    }

    if config.session.storage_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "session.storage_path must not be empty".to_string(),
        });
    }

    if config.session.connect_timeout_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "session.connect_timeout_secs must be at least 1".to_string(),
        });
    }

    if config.reconnect.max_attempts == 0 {
        errors.push(ConfigError::Validation {
            message: "reconnect.max_attempts must be at least 1".to_string(),
        });
    }

    if config.reconnect.initial_delay_ms > config.reconnect.max_delay_ms {
        errors.push(ConfigError::Validation {
            message: format!(
                "reconnect.initial_delay_ms ({}) must not exceed reconnect.max_delay_ms ({})",
                config.reconnect.initial_delay_ms, config.reconnect.max_delay_ms
            ),
        });
    }

    if config.memory.budget_mb == 0 {
        errors.push(ConfigError::Validation {
            message: "memory.budget_mb must be positive".to_string(),
        });
    }

    if config.memory.sample_interval_ms == 0 {
        errors.push(ConfigError::Validation {
            message: "memory.sample_interval_ms must be positive".to_string(),
        });
    }

    if config.media.cache_bound == 0 {
        errors.push(ConfigError::Validation {
            message: "media.cache_bound must be at least 1".to_string(),
        });
    }

    if config.webhook.timeout_ms == 0 {
        errors.push(ConfigError::Validation {
            message: "webhook.timeout_ms must be positive".to_string(),
        });
    }

    if let Some(ref url) = config.webhook.url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ConfigError::Validation {
            message: format!("webhook.url `{url}` must start with http:// or https://"),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
