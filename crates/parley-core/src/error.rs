// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley session gateway.

use thiserror::Error;

use crate::types::SessionState;

/// The primary error type used across all Parley crates.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// An outbound operation was attempted while the session is not ready.
    #[error("session not ready (state: {state})")]
    NotReady { state: SessionState },

    /// Transient driver errors (connect failure, send failure, driver crash).
    #[error("driver error: {message}")]
    Driver {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication errors requiring a fresh QR challenge.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Webhook delivery errors (endpoint unreachable, non-2xx response).
    #[error("dispatch error: {message}")]
    Dispatch {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No media entry exists for the requested message.
    #[error("no media cached for message {message_id}")]
    MediaNotFound { message_id: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Reconnection attempts exhausted without recovering the session.
    #[error("reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}
