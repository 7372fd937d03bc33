// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session driver trait wrapping the underlying chat-protocol client.
//!
//! The driver is the only component that speaks the wire protocol. It is
//! exclusively owned by the session supervisor; nothing else holds a
//! reference to it. Parley ships one deterministic implementation
//! (`parley-sim`); real protocol-backed drivers implement this trait
//! out of tree.

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::types::{
    DriverConnectionState, DriverEvent, MediaBytes, MediaHandle, MessageId, OutboundContent,
};

/// An opaque capability over one stateful chat-protocol session.
#[async_trait]
pub trait SessionDriver: Send + Sync + 'static {
    /// Returns the human-readable name of this driver implementation.
    fn name(&self) -> &str;

    /// Establishes the session. Emits [`DriverEvent`]s as authentication
    /// progresses (QR challenge, authenticated, ready).
    async fn connect(&mut self) -> Result<(), ParleyError>;

    /// Sends one message to a chat target. Fails with a typed
    /// [`ParleyError::Driver`] on transient network errors -- never panics.
    async fn send_message(
        &self,
        target: &str,
        content: OutboundContent,
    ) -> Result<MessageId, ParleyError>;

    /// Waits for the next event emitted by the driver, in emission order.
    async fn next_event(&self) -> Result<DriverEvent, ParleyError>;

    /// Returns the driver's own view of its connection.
    fn connection_state(&self) -> DriverConnectionState;

    /// Downloads the media payload behind an opaque handle.
    async fn download_media(&self, handle: &MediaHandle) -> Result<MediaBytes, ParleyError>;

    /// Tears the session down, releasing sockets and browser/process
    /// resources. Must be safe to call on a partially-initialized driver.
    async fn destroy(&self) -> Result<(), ParleyError>;
}

/// Factory for fresh driver instances.
///
/// The reconnection path destroys the failed driver and creates a new one
/// from the factory; the two instances never coexist as active sessions.
pub trait DriverFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn SessionDriver>;
}
