// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across the Parley workspace.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Unique identifier for a message, assigned by the session driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Opaque, driver-specific descriptor for a media payload.
///
/// The gateway never interprets the contents; it only hands the token back
/// to the driver's media-download capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaHandle(pub String);

/// Lifecycle state of the single chat-protocol session.
///
/// Exactly one state is active at a time; transitions are serialized through
/// the session supervisor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    QrPending,
    Authenticating,
    Ready,
    Disconnected,
    Reconnecting,
    Failed,
}

/// Connection state as reported by the driver itself.
///
/// May lag behind [`SessionState`] during reconnect windows; surfaced in
/// status snapshots so observers can tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DriverConnectionState {
    Connected,
    Connecting,
    Disconnected,
}

/// Why the driver dropped the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The credentials were invalidated remotely. Terminal for the current
    /// session storage; requires a fresh QR, not a retry.
    LoggedOut,
    /// Anything else (network blip, driver crash, timeout). Recoverable.
    Transient(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::LoggedOut => write!(f, "logged_out"),
            DisconnectReason::Transient(detail) => write!(f, "{detail}"),
        }
    }
}

/// Typed event emitted by a session driver.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// A QR challenge payload to present for authentication.
    Qr(String),
    /// Credentials accepted; session handshake in progress.
    Authenticated,
    /// Session fully established and able to send.
    Ready,
    /// Connection lost.
    Disconnected(DisconnectReason),
    /// Authentication rejected (expired or invalid credentials).
    AuthFailure(String),
    /// An inbound chat message in the driver's raw shape.
    Message(RawMessage),
}

/// Kind of a canonical message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Voice,
}

/// The normalized, driver-agnostic representation of one inbound message.
///
/// Immutable once constructed; this is the exact shape delivered to the
/// webhook endpoint (camelCase JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Unix seconds.
    pub timestamp: i64,
    pub from_me: bool,
    pub has_media: bool,
    /// Key for the follow-up media fetch (`GET /media/{mediaRef}`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
}

/// A raw inbound message as emitted by a driver.
///
/// Different drivers populate different subsets of the payload fields;
/// the normalizer resolves them in a fixed precedence order. A message with
/// no payload fields set at all is valid (unknown shape).
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub from_me: bool,
    /// Plain conversation text.
    pub conversation: Option<String>,
    /// Extended/formatted text (quotes, links, mentions).
    pub extended_text: Option<String>,
    pub image: Option<RawMedia>,
    pub video: Option<RawMedia>,
    pub audio: Option<RawAudio>,
    pub document: Option<RawDocument>,
}

/// Media envelope carried by image and video messages.
#[derive(Debug, Clone)]
pub struct RawMedia {
    pub handle: MediaHandle,
    pub mime_type: String,
    pub caption: Option<String>,
}

/// Audio envelope; `voice_note` distinguishes recorded voice notes from
/// forwarded audio files.
#[derive(Debug, Clone)]
pub struct RawAudio {
    pub handle: MediaHandle,
    pub mime_type: String,
    pub voice_note: bool,
}

/// Document envelope.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub handle: MediaHandle,
    pub mime_type: String,
    pub filename: Option<String>,
}

/// Outbound message content handed to the driver.
#[derive(Debug, Clone)]
pub enum OutboundContent {
    Text(String),
    Media {
        data: Vec<u8>,
        mime_type: String,
        caption: Option<String>,
    },
    Voice {
        data: Vec<u8>,
        mime_type: String,
    },
}

/// Downloaded media bytes plus their mime type.
#[derive(Debug, Clone)]
pub struct MediaBytes {
    pub data: Vec<u8>,
    pub mime_type: String,
}
