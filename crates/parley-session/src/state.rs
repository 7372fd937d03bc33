// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection state machine for the single chat-protocol session.
//!
//! [`ConnectionStateMachine`] is the sole authority over [`SessionState`] and
//! the current QR payload. It is owned by the session supervisor, which
//! applies driver events one at a time -- no transition ever races another.
//!
//! ```text
//! uninitialized -> qr_pending -> authenticating -> ready
//! ready -> disconnected -> reconnecting -> (ready | failed)
//! failed -> uninitialized   (fresh attempt after exhausting retries)
//! ```

use parley_core::error::ParleyError;
use parley_core::types::SessionState;
use tracing::info;

/// What `GET /qr` should report right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrStatus {
    /// A QR challenge is pending; present this payload.
    Available(String),
    /// The session is authenticated; no QR needed.
    Authenticated,
    /// No challenge has been issued yet (initializing, disconnected, failed).
    Waiting,
}

/// Single source of truth for session lifecycle.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: SessionState,
    qr: Option<String>,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            qr: None,
        }
    }

    /// The currently active state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The pending QR payload, if one has been issued and not yet consumed.
    ///
    /// Stable across repeated reads: the same payload is returned until the
    /// driver emits a new challenge or the session authenticates.
    pub fn qr(&self) -> Option<&str> {
        self.qr.as_deref()
    }

    /// Consumer-facing QR view.
    pub fn qr_status(&self) -> QrStatus {
        match self.state {
            SessionState::QrPending => self
                .qr
                .clone()
                .map(QrStatus::Available)
                .unwrap_or(QrStatus::Waiting),
            SessionState::Authenticating | SessionState::Ready => QrStatus::Authenticated,
            _ => QrStatus::Waiting,
        }
    }

    /// Outbound sends are only valid while ready.
    pub fn can_send(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Begins a fresh start cycle. Valid only from `uninitialized` or
    /// `failed`; resets to `uninitialized` and clears any stale QR payload.
    pub fn begin_start(&mut self) -> Result<(), ParleyError> {
        match self.state {
            SessionState::Uninitialized | SessionState::Failed => {
                self.qr = None;
                self.transition(SessionState::Uninitialized);
                Ok(())
            }
            other => Err(ParleyError::Internal(format!(
                "start is only valid from uninitialized or failed, not {other}"
            ))),
        }
    }

    /// A QR challenge was issued. Stores the payload for retrieval.
    pub fn on_qr(&mut self, payload: String) {
        self.qr = Some(payload);
        self.transition(SessionState::QrPending);
    }

    /// Credentials accepted; handshake in progress.
    pub fn on_authenticated(&mut self) {
        self.transition(SessionState::Authenticating);
    }

    /// Session established. Clears the QR payload.
    pub fn on_ready(&mut self) {
        self.qr = None;
        self.transition(SessionState::Ready);
    }

    /// Connection lost. Clears the QR payload.
    pub fn on_disconnected(&mut self) {
        self.qr = None;
        self.transition(SessionState::Disconnected);
    }

    /// Credentials were invalidated remotely. Terminal for the current
    /// session storage: the session restarts from `uninitialized` with a
    /// fresh QR instead of retrying.
    pub fn on_logged_out(&mut self) {
        self.qr = None;
        self.transition(SessionState::Uninitialized);
    }

    /// A retry has been scheduled or is running.
    pub fn begin_reconnecting(&mut self) {
        self.transition(SessionState::Reconnecting);
    }

    /// Retries exhausted without recovery.
    pub fn mark_failed(&mut self) {
        self.qr = None;
        self.transition(SessionState::Failed);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "session state changed");
            self.state = next;
        }
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uninitialized_without_qr() {
        let machine = ConnectionStateMachine::new();
        assert_eq!(machine.state(), SessionState::Uninitialized);
        assert!(machine.qr().is_none());
        assert!(!machine.can_send());
        assert_eq!(machine.qr_status(), QrStatus::Waiting);
    }

    #[test]
    fn full_authentication_sequence() {
        let mut machine = ConnectionStateMachine::new();
        machine.begin_start().unwrap();

        machine.on_qr("ABC".into());
        assert_eq!(machine.state(), SessionState::QrPending);
        assert_eq!(machine.qr(), Some("ABC"));

        machine.on_authenticated();
        assert_eq!(machine.state(), SessionState::Authenticating);

        machine.on_ready();
        assert_eq!(machine.state(), SessionState::Ready);
        assert!(machine.qr().is_none(), "ready must clear the QR payload");
        assert!(machine.can_send());
    }

    #[test]
    fn qr_reads_are_idempotent_until_new_challenge() {
        let mut machine = ConnectionStateMachine::new();
        machine.on_qr("FIRST".into());

        for _ in 0..3 {
            assert_eq!(machine.qr(), Some("FIRST"));
            assert_eq!(machine.qr_status(), QrStatus::Available("FIRST".into()));
        }

        machine.on_qr("SECOND".into());
        assert_eq!(machine.qr(), Some("SECOND"));
    }

    #[test]
    fn disconnect_clears_qr_and_blocks_sends() {
        let mut machine = ConnectionStateMachine::new();
        machine.on_qr("ABC".into());
        machine.on_ready();

        machine.on_disconnected();
        assert_eq!(machine.state(), SessionState::Disconnected);
        assert!(machine.qr().is_none());
        assert!(!machine.can_send());
        assert_eq!(machine.qr_status(), QrStatus::Waiting);
    }

    #[test]
    fn reconnecting_then_ready() {
        let mut machine = ConnectionStateMachine::new();
        machine.on_ready();
        machine.on_disconnected();
        machine.begin_reconnecting();
        assert_eq!(machine.state(), SessionState::Reconnecting);

        machine.on_ready();
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn reconnecting_then_failed_then_fresh_start() {
        let mut machine = ConnectionStateMachine::new();
        machine.on_ready();
        machine.on_disconnected();
        machine.begin_reconnecting();
        machine.mark_failed();
        assert_eq!(machine.state(), SessionState::Failed);

        machine.begin_start().unwrap();
        assert_eq!(machine.state(), SessionState::Uninitialized);
    }

    #[test]
    fn begin_start_rejected_while_active() {
        let mut machine = ConnectionStateMachine::new();
        machine.on_ready();
        assert!(machine.begin_start().is_err());

        machine.on_disconnected();
        assert!(machine.begin_start().is_err());
    }

    #[test]
    fn logged_out_returns_to_uninitialized() {
        let mut machine = ConnectionStateMachine::new();
        machine.on_qr("ABC".into());
        machine.on_ready();

        machine.on_logged_out();
        assert_eq!(machine.state(), SessionState::Uninitialized);
        assert!(machine.qr().is_none());
        assert!(machine.begin_start().is_ok());
    }

    #[test]
    fn qr_status_reports_authenticated_while_ready() {
        let mut machine = ConnectionStateMachine::new();
        machine.on_qr("ABC".into());
        machine.on_authenticated();
        assert_eq!(machine.qr_status(), QrStatus::Authenticated);

        machine.on_ready();
        assert_eq!(machine.qr_status(), QrStatus::Authenticated);
    }
}
