// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Normalization of heterogeneous raw driver events into canonical messages.
//!
//! Pure and total: any [`RawMessage`] -- including one with no recognizable
//! payload at all -- maps to a valid [`CanonicalMessage`]. The richest
//! available payload wins, resolved in a fixed precedence order:
//! conversation text, extended text, image, video, audio, document.

use parley_core::types::{CanonicalMessage, MediaHandle, MessageKind, RawMessage};

/// The payload shape selected for a raw message.
enum Payload<'a> {
    Conversation(&'a str),
    Extended(&'a str),
    Image(&'a parley_core::types::RawMedia),
    Video(&'a parley_core::types::RawMedia),
    Audio(&'a parley_core::types::RawAudio),
    Document(&'a parley_core::types::RawDocument),
    Unknown,
}

fn select_payload(raw: &RawMessage) -> Payload<'_> {
    if let Some(ref text) = raw.conversation {
        Payload::Conversation(text)
    } else if let Some(ref text) = raw.extended_text {
        Payload::Extended(text)
    } else if let Some(ref media) = raw.image {
        Payload::Image(media)
    } else if let Some(ref media) = raw.video {
        Payload::Video(media)
    } else if let Some(ref audio) = raw.audio {
        Payload::Audio(audio)
    } else if let Some(ref doc) = raw.document {
        Payload::Document(doc)
    } else {
        Payload::Unknown
    }
}

/// Maps one raw driver event to a canonical message. Never fails.
pub fn normalize(raw: &RawMessage) -> CanonicalMessage {
    let (kind, body, has_media) = match select_payload(raw) {
        Payload::Conversation(text) => (MessageKind::Text, text.to_string(), false),
        Payload::Extended(text) => (MessageKind::Text, text.to_string(), false),
        Payload::Image(media) => (
            MessageKind::Image,
            media.caption.clone().unwrap_or_else(|| "[Image]".to_string()),
            true,
        ),
        Payload::Video(media) => (
            MessageKind::Video,
            media.caption.clone().unwrap_or_else(|| "[Video]".to_string()),
            true,
        ),
        Payload::Audio(audio) => {
            if audio.voice_note {
                (MessageKind::Voice, "[Voice]".to_string(), true)
            } else {
                (MessageKind::Audio, "[Audio]".to_string(), true)
            }
        }
        Payload::Document(doc) => (
            MessageKind::Document,
            doc.filename.clone().unwrap_or_else(|| "[Document]".to_string()),
            true,
        ),
        Payload::Unknown => (MessageKind::Text, String::new(), false),
    };

    CanonicalMessage {
        id: raw.id.clone(),
        from: raw.from.clone(),
        to: raw.to.clone(),
        body,
        kind,
        timestamp: raw.timestamp,
        from_me: raw.from_me,
        has_media,
        media_ref: has_media.then(|| raw.id.clone()),
    }
}

/// The media handle and mime type of the selected payload, if it carries
/// media. Follows the same precedence as [`normalize`], so a message whose
/// text payload wins never yields a descriptor even if media fields are set.
pub fn media_descriptor(raw: &RawMessage) -> Option<(MediaHandle, String)> {
    match select_payload(raw) {
        Payload::Image(media) | Payload::Video(media) => {
            Some((media.handle.clone(), media.mime_type.clone()))
        }
        Payload::Audio(audio) => Some((audio.handle.clone(), audio.mime_type.clone())),
        Payload::Document(doc) => Some((doc.handle.clone(), doc.mime_type.clone())),
        _ => None,
    }
}
