// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Parley session gateway.
//!
//! This crate provides the trait definitions, error types, and common types
//! used throughout the Parley workspace. Session drivers implement the
//! traits defined here; everything else consumes them.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::ParleyError;
pub use traits::{DriverFactory, SessionDriver};
pub use types::{
    CanonicalMessage, DisconnectReason, DriverConnectionState, DriverEvent, MediaBytes,
    MediaHandle, MessageId, MessageKind, OutboundContent, RawAudio, RawDocument, RawMedia,
    RawMessage, SessionState,
};
