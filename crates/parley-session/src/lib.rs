// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session supervision for the Parley gateway.
//!
//! The [`SessionSupervisor`] is the single logical worker for the session:
//! it exclusively owns the driver instance and serializes every state
//! transition through the [`ConnectionStateMachine`]. Inputs are multiplexed
//! in one select loop -- driver events (in emission order), gateway commands
//! (mpsc with oneshot replies), the pending retry timer, and shutdown
//! cancellation. Background activities (memory guardian sampling, the HTTP
//! gateway) communicate with the session only through these channels, never
//! by touching shared state directly.

pub mod guardian;
pub mod media_cache;
pub mod normalize;
pub mod reconnect;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use parley_config::model::{ExhaustionPolicy, MediaConfig, ParleyConfig, SessionConfig};
use parley_core::error::ParleyError;
use parley_core::traits::{DriverFactory, SessionDriver};
use parley_core::types::{
    DisconnectReason, DriverConnectionState, DriverEvent, MediaBytes, MessageId, OutboundContent,
    RawMessage, SessionState,
};
use parley_webhook::WebhookDispatcher;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::guardian::MemoryGuardian;
use crate::media_cache::MediaCache;
use crate::reconnect::{ReconnectionPolicy, RetryDecision};
use crate::state::{ConnectionStateMachine, QrStatus};

/// Exit status for the restart posture after reconnect exhaustion.
pub const RECONNECT_EXHAUSTED_EXIT_CODE: i32 = 11;

/// Command sent to the supervisor by the gateway (or other callers).
#[derive(Debug)]
pub enum Command {
    SendText {
        chat_id: String,
        text: String,
        reply: oneshot::Sender<Result<MessageId, ParleyError>>,
    },
    SendMedia {
        chat_id: String,
        content: OutboundContent,
        reply: oneshot::Sender<Result<MessageId, ParleyError>>,
    },
    FetchMedia {
        message_id: String,
        reply: oneshot::Sender<Result<MediaBytes, ParleyError>>,
    },
}

/// Published view of the session, refreshed on every transition.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub qr: Option<String>,
    pub reconnect_attempts: u32,
    pub driver_state: DriverConnectionState,
}

impl StatusSnapshot {
    /// Consumer-facing QR view derived from the snapshot.
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
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Uninitialized,
            qr: None,
            reconnect_attempts: 0,
            driver_state: DriverConnectionState::Disconnected,
        }
    }
}

/// Cloneable handle for talking to a running supervisor.
#[derive(Clone)]
pub struct SessionHandle {
    pub commands: mpsc::Sender<Command>,
    pub status: watch::Receiver<StatusSnapshot>,
}

/// What a pending timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    /// Destroy the failed driver and try to reconnect.
    Retry,
    /// Degraded posture: begin one more full start cycle from scratch.
    FreshStart,
}

enum Wake {
    Cancelled,
    Timer(TimerAction),
    Event(Result<DriverEvent, ParleyError>),
    Command(Option<Command>),
}

/// Single owner of the driver and sole applier of state transitions.
pub struct SessionSupervisor {
    machine: ConnectionStateMachine,
    policy: ReconnectionPolicy,
    factory: Arc<dyn DriverFactory>,
    driver: Option<Box<dyn SessionDriver>>,
    cache: Arc<MediaCache>,
    dispatcher: WebhookDispatcher,
    guardian: Arc<MemoryGuardian>,
    session_cfg: SessionConfig,
    media_cfg: MediaConfig,
    connect_timeout: Duration,
    cleanup_timeout: Duration,
    degrade_cooldown: Duration,
    commands_rx: mpsc::Receiver<Command>,
    status_tx: watch::Sender<StatusSnapshot>,
    timer: Option<(Instant, TimerAction)>,
    reconnect_in_flight: bool,
}

impl SessionSupervisor {
    /// Builds a supervisor and the handle used to reach it.
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        cache: Arc<MediaCache>,
        dispatcher: WebhookDispatcher,
        guardian: Arc<MemoryGuardian>,
        config: &ParleyConfig,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());

        let supervisor = Self {
            machine: ConnectionStateMachine::new(),
            policy: ReconnectionPolicy::new(&config.reconnect),
            factory,
            driver: None,
            cache,
            dispatcher,
            guardian,
            session_cfg: config.session.clone(),
            media_cfg: config.media.clone(),
            connect_timeout: Duration::from_secs(config.session.connect_timeout_secs),
            cleanup_timeout: Duration::from_secs(config.session.cleanup_timeout_secs),
            degrade_cooldown: Duration::from_millis(config.reconnect.max_delay_ms),
            commands_rx,
            status_tx,
            timer: None,
            reconnect_in_flight: false,
        };

        let handle = SessionHandle {
            commands: commands_tx,
            status: status_rx,
        };

        (supervisor, handle)
    }

    /// Runs the session until cancellation or unrecoverable exhaustion.
    ///
    /// Returns `Err(ReconnectExhausted)` only under the `restart` exhaustion
    /// policy; the binary maps that to a distinct process exit so an external
    /// supervisor restarts it.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ParleyError> {
        self.start().await?;

        loop {
            let wake = {
                let driver = self.driver.as_ref();
                let deadline = self.timer.map(|(at, _)| at);
                tokio::select! {
                    _ = cancel.cancelled() => Wake::Cancelled,
                    _ = async {
                        match deadline {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending().await,
                        }
                    } => {
                        let action = self.timer.map(|(_, a)| a).unwrap_or(TimerAction::Retry);
                        Wake::Timer(action)
                    }
                    event = async {
                        match driver {
                            Some(d) => d.next_event().await,
                            None => std::future::pending().await,
                        }
                    } => Wake::Event(event),
                    cmd = self.commands_rx.recv() => Wake::Command(cmd),
                }
            };

            match wake {
                Wake::Cancelled => {
                    info!("shutdown signal received, stopping session supervisor");
                    break;
                }
                Wake::Timer(action) => {
                    self.timer = None;
                    match action {
                        TimerAction::Retry => self.attempt_reconnect().await?,
                        TimerAction::FreshStart => {
                            info!("degraded cool-down elapsed, starting fresh session cycle");
                            self.teardown_driver().await;
                            self.start().await?;
                        }
                    }
                }
                Wake::Event(event) => self.handle_event(event).await?,
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Command(None) => {
                    info!("command channel closed, stopping session supervisor");
                    break;
                }
            }
        }

        self.teardown_driver().await;
        self.publish_status();
        info!("session supervisor stopped");
        Ok(())
    }

    /// Begins a start cycle: fresh driver, bounded connect. A failed connect
    /// is a transient failure handed to the reconnection policy, not a hard
    /// error.
    async fn start(&mut self) -> Result<(), ParleyError> {
        self.machine.begin_start()?;
        self.publish_status();

        let mut driver = self.factory.create();
        info!(driver = driver.name(), "starting session driver");

        match tokio::time::timeout(self.connect_timeout, driver.connect()).await {
            Ok(Ok(())) => {
                self.driver = Some(driver);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "driver connect failed");
                self.destroy_bounded(driver).await;
                self.machine.on_disconnected();
                self.schedule_reconnect().await?;
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.connect_timeout.as_secs(),
                    "driver connect stalled, aborting attempt"
                );
                self.destroy_bounded(driver).await;
                self.machine.on_disconnected();
                self.schedule_reconnect().await?;
            }
        }

        self.publish_status();
        Ok(())
    }

    async fn handle_event(&mut self, event: Result<DriverEvent, ParleyError>) -> Result<(), ParleyError> {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "driver event stream failed");
                // The stream is dead; drop the driver so the loop cannot
                // spin on a broken event source while the retry is pending.
                self.teardown_driver().await;
                if self.machine.state() != SessionState::Reconnecting {
                    self.machine.on_disconnected();
                }
                self.schedule_reconnect().await?;
                self.publish_status();
                return Ok(());
            }
        };

        match event {
            DriverEvent::Qr(payload) => {
                info!("QR challenge received");
                self.machine.on_qr(payload);
                self.policy.reset();
            }
            DriverEvent::Authenticated => {
                debug!("driver authenticated");
                self.machine.on_authenticated();
            }
            DriverEvent::Ready => {
                info!("session ready");
                self.machine.on_ready();
                self.policy.reset();
            }
            DriverEvent::Disconnected(DisconnectReason::LoggedOut) => {
                warn!("session logged out remotely -- wiping credentials for a fresh QR");
                self.machine.on_logged_out();
                self.wipe_session_storage();
                self.teardown_driver().await;
                self.policy.reset();
                self.start().await?;
            }
            DriverEvent::Disconnected(DisconnectReason::Transient(detail)) => {
                warn!(reason = %detail, "session disconnected");
                if self.machine.state() != SessionState::Reconnecting {
                    self.machine.on_disconnected();
                }
                self.schedule_reconnect().await?;
            }
            DriverEvent::AuthFailure(detail) => {
                warn!(reason = %detail, "authentication failed -- wiping stale credentials");
                self.wipe_session_storage();
                if self.machine.state() != SessionState::Reconnecting {
                    self.machine.on_disconnected();
                }
                self.schedule_reconnect().await?;
            }
            DriverEvent::Message(raw) => {
                self.handle_message(raw).await;
            }
        }

        self.publish_status();
        Ok(())
    }

    /// Normalizes one inbound message, caches any media reference, and
    /// dispatches it to the webhook. Normalization and dispatch errors are
    /// fully absorbed here; they never reach the state machine.
    async fn handle_message(&mut self, raw: RawMessage) {
        if raw.from_me && !self.session_cfg.forward_own_messages {
            debug!(message_id = %raw.id, "skipping self-authored message");
            return;
        }

        let message = normalize::normalize(&raw);

        if let Some((handle, mime_type)) = normalize::media_descriptor(&raw) {
            self.cache.put(&message.id, handle, &mime_type).await;
        }

        if let Err(e) = self.dispatcher.dispatch(&message).await {
            warn!(message_id = %message.id, error = %e, "webhook dispatch failed, message dropped");
        }

        self.guardian.maybe_opportunistic_cleanup().await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SendText { chat_id, text, reply } => {
                let result = self
                    .send_content(&chat_id, OutboundContent::Text(text))
                    .await;
                let _ = reply.send(result);
            }
            Command::SendMedia { chat_id, content, reply } => {
                let result = self.send_content(&chat_id, content).await;
                let _ = reply.send(result);
            }
            Command::FetchMedia { message_id, reply } => {
                let result = self.fetch_media(&message_id).await;
                let _ = reply.send(result);
            }
        }
    }

    /// Readiness-gated outbound send. Returns a typed failure, never panics,
    /// and never alters session state on its own.
    async fn send_content(
        &mut self,
        chat_id: &str,
        content: OutboundContent,
    ) -> Result<MessageId, ParleyError> {
        if !self.machine.can_send() {
            return Err(ParleyError::NotReady {
                state: self.machine.state(),
            });
        }

        let Some(driver) = self.driver.as_ref() else {
            return Err(ParleyError::NotReady {
                state: self.machine.state(),
            });
        };

        let result = driver.send_message(chat_id, content).await;
        if let Err(ref e) = result {
            warn!(chat_id = %chat_id, error = %e, "outbound send failed");
        }

        self.guardian.maybe_opportunistic_cleanup().await;
        result
    }

    /// Resolves a cached media reference and streams the bytes through the
    /// driver. The cache entry is kept so the consumer can retry.
    async fn fetch_media(&mut self, message_id: &str) -> Result<MediaBytes, ParleyError> {
        let entry = self
            .cache
            .get(message_id)
            .await
            .ok_or_else(|| ParleyError::MediaNotFound {
                message_id: message_id.to_string(),
            })?;

        let Some(driver) = self.driver.as_ref() else {
            return Err(ParleyError::NotReady {
                state: self.machine.state(),
            });
        };

        let download_timeout = Duration::from_secs(self.media_cfg.download_timeout_secs);
        match tokio::time::timeout(download_timeout, driver.download_media(&entry.handle)).await {
            Ok(result) => result,
            Err(_) => Err(ParleyError::Timeout {
                duration: download_timeout,
            }),
        }
    }

    /// Records a failure with the policy and schedules at most one retry.
    async fn schedule_reconnect(&mut self) -> Result<(), ParleyError> {
        if self.reconnect_in_flight || self.timer.is_some() {
            debug!("reconnect already pending, ignoring additional failure");
            return Ok(());
        }

        self.machine.begin_reconnecting();

        match self.policy.on_failure() {
            RetryDecision::Retry { delay, attempt } => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.timer = Some((Instant::now() + delay, TimerAction::Retry));
                Ok(())
            }
            RetryDecision::Exhausted { attempts } => self.handle_exhaustion(attempts),
        }
    }

    /// Destroy-then-recreate, with the in-flight guard held for the whole
    /// sequence. Cleanup failure or timeout never blocks the new attempt.
    async fn attempt_reconnect(&mut self) -> Result<(), ParleyError> {
        self.reconnect_in_flight = true;

        if let Some(old) = self.driver.take() {
            self.destroy_bounded(old).await;
        }

        let mut driver = self.factory.create();
        debug!(driver = driver.name(), "reconnect attempt: connecting fresh driver");

        match tokio::time::timeout(self.connect_timeout, driver.connect()).await {
            Ok(Ok(())) => {
                self.driver = Some(driver);
                self.reconnect_in_flight = false;
                debug!("reconnect attempt connected, awaiting session events");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "reconnect attempt failed");
                self.destroy_bounded(driver).await;
                self.reconnect_in_flight = false;
                self.schedule_reconnect().await?;
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.connect_timeout.as_secs(),
                    "reconnect attempt stalled, aborting"
                );
                self.destroy_bounded(driver).await;
                self.reconnect_in_flight = false;
                self.schedule_reconnect().await?;
            }
        }

        self.publish_status();
        Ok(())
    }

    fn handle_exhaustion(&mut self, attempts: u32) -> Result<(), ParleyError> {
        self.machine.mark_failed();
        self.publish_status();

        match self.session_cfg.exhaustion_policy {
            ExhaustionPolicy::Restart => {
                error!(
                    attempts,
                    exit_code = RECONNECT_EXHAUSTED_EXIT_CODE,
                    "reconnection exhausted -- requesting process restart"
                );
                Err(ParleyError::ReconnectExhausted { attempts })
            }
            ExhaustionPolicy::Degrade => {
                warn!(
                    attempts,
                    cooldown_ms = self.degrade_cooldown.as_millis() as u64,
                    "reconnection exhausted -- degraded, fresh start after cool-down"
                );
                self.policy.reset();
                self.timer = Some((
                    Instant::now() + self.degrade_cooldown,
                    TimerAction::FreshStart,
                ));
                Ok(())
            }
        }
    }

    /// Bounded teardown of the current driver, if any.
    async fn teardown_driver(&mut self) {
        if let Some(driver) = self.driver.take() {
            self.destroy_bounded(driver).await;
        }
    }

    async fn destroy_bounded(&self, driver: Box<dyn SessionDriver>) {
        match tokio::time::timeout(self.cleanup_timeout, driver.destroy()).await {
            Ok(Ok(())) => debug!("driver destroyed"),
            Ok(Err(e)) => warn!(error = %e, "driver teardown failed, proceeding"),
            Err(_) => warn!(
                timeout_secs = self.cleanup_timeout.as_secs(),
                "driver teardown timed out, proceeding"
            ),
        }
    }

    fn wipe_session_storage(&self) {
        let path = std::path::Path::new(&self.session_cfg.storage_path);
        if !path.exists() {
            return;
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => info!(path = %path.display(), "session storage wiped"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to wipe session storage"),
        }
    }

    fn publish_status(&self) {
        let snapshot = StatusSnapshot {
            state: self.machine.state(),
            qr: self.machine.qr().map(str::to_string),
            reconnect_attempts: self.policy.attempts(),
            driver_state: self
                .driver
                .as_ref()
                .map(|d| d.connection_state())
                .unwrap_or(DriverConnectionState::Disconnected),
        };
        self.status_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::{MediaHandle, RawMedia};
    use parley_sim::{SimDriver, SimDriverFactory, SimHandle};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        handle: SessionHandle,
        factory: Arc<SimDriverFactory>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<Result<(), ParleyError>>,
        cache: Arc<MediaCache>,
    }

    fn test_config() -> ParleyConfig {
        let mut config = ParleyConfig::default();
        config.session.storage_path = "/nonexistent/parley-test-session".to_string();
        config.session.cleanup_timeout_secs = 1;
        config.session.connect_timeout_secs = 2;
        config.reconnect.initial_delay_ms = 10;
        config.reconnect.max_delay_ms = 50;
        config.reconnect.jitter_ms = 0;
        config
    }

    fn spawn_supervisor(config: ParleyConfig, factory: Arc<SimDriverFactory>) -> Fixture {
        let cache = Arc::new(MediaCache::new(config.media.cache_bound));
        let guardian = Arc::new(MemoryGuardian::new(&config.memory, Arc::clone(&cache)));
        let dispatcher = WebhookDispatcher::new(&config.webhook).unwrap();

        let driver_factory: Arc<dyn DriverFactory> = factory.clone();
        let (supervisor, handle) = SessionSupervisor::new(
            driver_factory,
            Arc::clone(&cache),
            dispatcher,
            guardian,
            &config,
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        Fixture {
            handle,
            factory,
            cancel,
            task,
            cache,
        }
    }

    async fn wait_for_state(fixture: &mut Fixture, state: SessionState) {
        tokio::time::timeout(
            Duration::from_secs(2),
            fixture.handle.status.wait_for(|s| s.state == state),
        )
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {state}"))
        .expect("status channel closed");
    }

    async fn driver_handle(fixture: &Fixture, index: usize) -> SimHandle {
        for _ in 0..100 {
            if let Some(handle) = fixture.factory.created_handle(index) {
                return handle;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("driver {index} was never created");
    }

    fn image_message(id: &str, token: &str) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            from: "alice@chat".into(),
            to: "me@chat".into(),
            timestamp: 1_700_000_000,
            image: Some(RawMedia {
                handle: MediaHandle(token.to_string()),
                mime_type: "image/jpeg".into(),
                caption: None,
            }),
            ..RawMessage::default()
        }
    }

    #[tokio::test]
    async fn qr_then_ready_reaches_ready_with_counter_zero() {
        let factory = Arc::new(SimDriverFactory::new());
        let mut fixture = spawn_supervisor(test_config(), factory);

        let driver = driver_handle(&fixture, 0).await;
        driver.push_event(DriverEvent::Qr("ABC".into()));

        tokio::time::timeout(
            Duration::from_secs(2),
            fixture
                .handle
                .status
                .wait_for(|s| s.qr.as_deref() == Some("ABC")),
        )
        .await
        .expect("QR never surfaced")
        .unwrap();

        driver.push_event(DriverEvent::Ready);
        wait_for_state(&mut fixture, SessionState::Ready).await;

        let status = fixture.handle.status.borrow().clone();
        assert!(status.qr.is_none(), "ready must clear the QR payload");
        assert_eq!(status.reconnect_attempts, 0);

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_text_while_not_ready_is_a_typed_failure() {
        let factory = Arc::new(SimDriverFactory::new());
        let fixture = spawn_supervisor(test_config(), factory);
        let driver = driver_handle(&fixture, 0).await;

        let (tx, rx) = oneshot::channel();
        fixture
            .handle
            .commands
            .send(Command::SendText {
                chat_id: "chat-1".into(),
                text: "hello".into(),
                reply: tx,
            })
            .await
            .unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ParleyError::NotReady { .. }));

        // The failed send must not have altered state or touched the driver.
        assert_eq!(
            fixture.handle.status.borrow().state,
            SessionState::Uninitialized
        );
        assert_eq!(driver.sent_count(), 0);

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_text_when_ready_reaches_the_driver() {
        let factory = Arc::new(SimDriverFactory::new());
        let mut fixture = spawn_supervisor(test_config(), factory);
        let driver = driver_handle(&fixture, 0).await;

        driver.push_event(DriverEvent::Ready);
        wait_for_state(&mut fixture, SessionState::Ready).await;

        let (tx, rx) = oneshot::channel();
        fixture
            .handle
            .commands
            .send(Command::SendText {
                chat_id: "chat-1".into(),
                text: "hello".into(),
                reply: tx,
            })
            .await
            .unwrap();

        rx.await.unwrap().unwrap();
        let sent = driver.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, "chat-1");

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn transient_disconnects_exhaust_after_max_attempts() {
        let mut config = test_config();
        config.reconnect.max_attempts = 2;

        let factory = Arc::new(SimDriverFactory::new());
        let mut fixture = spawn_supervisor(config, factory);

        let first = driver_handle(&fixture, 0).await;
        first.push_event(DriverEvent::Ready);
        wait_for_state(&mut fixture, SessionState::Ready).await;

        // First failure: schedules a retry, which creates driver #2.
        first.push_event(DriverEvent::Disconnected(DisconnectReason::Transient(
            "TIMEOUT".into(),
        )));
        let second = driver_handle(&fixture, 1).await;

        // Second failure: the policy signals exhaustion.
        second.push_event(DriverEvent::Disconnected(DisconnectReason::Transient(
            "TIMEOUT".into(),
        )));

        let result = tokio::time::timeout(Duration::from_secs(2), fixture.task)
            .await
            .expect("supervisor should exit on exhaustion")
            .unwrap();
        assert!(matches!(
            result,
            Err(ParleyError::ReconnectExhausted { attempts: 2 })
        ));

        // No third retry timer means no third driver.
        assert_eq!(fixture.factory.created_count(), 2);
        assert_eq!(fixture.handle.status.borrow().state, SessionState::Failed);
    }

    #[tokio::test]
    async fn degrade_policy_keeps_running_and_starts_fresh_cycle() {
        let mut config = test_config();
        config.reconnect.max_attempts = 1;
        config.reconnect.max_delay_ms = 200; // Short degrade cool-down.
        config.session.exhaustion_policy = ExhaustionPolicy::Degrade;

        let factory = Arc::new(SimDriverFactory::new());
        let mut fixture = spawn_supervisor(config, factory);

        let first = driver_handle(&fixture, 0).await;
        first.push_event(DriverEvent::Disconnected(DisconnectReason::Transient(
            "TIMEOUT".into(),
        )));

        wait_for_state(&mut fixture, SessionState::Failed).await;

        // After the cool-down a fresh cycle begins with a new driver.
        let second = driver_handle(&fixture, 1).await;
        second.push_event(DriverEvent::Qr("FRESH".into()));
        wait_for_state(&mut fixture, SessionState::QrPending).await;
        assert_eq!(
            fixture.handle.status.borrow().qr.as_deref(),
            Some("FRESH")
        );

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn logged_out_wipes_storage_and_restarts_uninitialized() {
        let storage = tempfile::tempdir().unwrap();
        let marker = storage.path().join("creds.json");
        std::fs::write(&marker, b"{}").unwrap();

        let mut config = test_config();
        config.session.storage_path = storage.path().to_string_lossy().into_owned();

        let factory = Arc::new(SimDriverFactory::new());
        let mut fixture = spawn_supervisor(config, factory);

        let first = driver_handle(&fixture, 0).await;
        first.push_event(DriverEvent::Ready);
        wait_for_state(&mut fixture, SessionState::Ready).await;

        first.push_event(DriverEvent::Disconnected(DisconnectReason::LoggedOut));

        // A fresh driver comes up instead of a retry of the old credentials.
        let second = driver_handle(&fixture, 1).await;
        assert!(first.destroyed(), "old driver must be torn down");
        assert!(!marker.exists(), "session storage must be wiped");

        second.push_event(DriverEvent::Qr("NEW-QR".into()));
        wait_for_state(&mut fixture, SessionState::QrPending).await;
        assert_eq!(fixture.handle.status.borrow().reconnect_attempts, 0);

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn auth_failure_wipes_storage_and_schedules_reconnect() {
        let storage = tempfile::tempdir().unwrap();
        std::fs::write(storage.path().join("creds.json"), b"{}").unwrap();

        let mut config = test_config();
        config.session.storage_path = storage.path().to_string_lossy().into_owned();

        let factory = Arc::new(SimDriverFactory::new());
        let fixture = spawn_supervisor(config, factory);

        let first = driver_handle(&fixture, 0).await;
        first.push_event(DriverEvent::AuthFailure("expired".into()));

        // The retry produces a fresh driver with no stored credentials left.
        let _second = driver_handle(&fixture, 1).await;
        assert!(!storage.path().exists());

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn inbound_media_message_is_cached_and_dispatched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = test_config();
        config.webhook.url = Some(format!("{}/hook", server.uri()));

        let factory = Arc::new(SimDriverFactory::new());
        let mut fixture = spawn_supervisor(config, factory);

        let driver = driver_handle(&fixture, 0).await;
        driver.register_media("tok-img", vec![0xFF, 0xD8], "image/jpeg");
        driver.push_event(DriverEvent::Ready);
        wait_for_state(&mut fixture, SessionState::Ready).await;

        driver.push_event(DriverEvent::Message(image_message("m1", "tok-img")));

        // Wait for the webhook delivery to land.
        for _ in 0..100 {
            if !server.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = requests[0].body_json().unwrap();
        assert_eq!(body["payload"]["id"], "m1");
        assert_eq!(body["payload"]["type"], "image");
        assert_eq!(body["payload"]["hasMedia"], true);
        assert_eq!(body["payload"]["mediaRef"], "m1");

        assert!(fixture.cache.get("m1").await.is_some());

        // The cached reference resolves to bytes through the driver.
        let (tx, rx) = oneshot::channel();
        fixture
            .handle
            .commands
            .send(Command::FetchMedia {
                message_id: "m1".into(),
                reply: tx,
            })
            .await
            .unwrap();
        let bytes = rx.await.unwrap().unwrap();
        assert_eq!(bytes.data, vec![0xFF, 0xD8]);
        assert_eq!(bytes.mime_type, "image/jpeg");

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn self_authored_messages_are_skipped_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = test_config();
        config.webhook.url = Some(server.uri());

        let factory = Arc::new(SimDriverFactory::new());
        let mut fixture = spawn_supervisor(config, factory);

        let driver = driver_handle(&fixture, 0).await;
        driver.push_event(DriverEvent::Ready);
        wait_for_state(&mut fixture, SessionState::Ready).await;

        let mut raw = RawMessage {
            id: "own-1".into(),
            from_me: true,
            ..RawMessage::default()
        };
        raw.conversation = Some("note to self".into());
        driver.push_event(DriverEvent::Message(raw));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(server.received_requests().await.unwrap().is_empty());

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn fetch_media_for_unknown_message_is_not_found() {
        let factory = Arc::new(SimDriverFactory::new());
        let fixture = spawn_supervisor(test_config(), factory);
        let _driver = driver_handle(&fixture, 0).await;

        let (tx, rx) = oneshot::channel();
        fixture
            .handle
            .commands
            .send(Command::FetchMedia {
                message_id: "missing".into(),
                reply: tx,
            })
            .await
            .unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ParleyError::MediaNotFound { .. }));

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_destroys_the_driver() {
        let factory = Arc::new(SimDriverFactory::new());
        let mut fixture = spawn_supervisor(test_config(), factory);

        let driver = driver_handle(&fixture, 0).await;
        driver.push_event(DriverEvent::Ready);
        wait_for_state(&mut fixture, SessionState::Ready).await;

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
        assert!(driver.destroyed());
    }

    #[tokio::test]
    async fn wedged_teardown_does_not_block_shutdown() {
        let factory = Arc::new(SimDriverFactory::new());
        let mut fixture = spawn_supervisor(test_config(), factory);

        let driver = driver_handle(&fixture, 0).await;
        driver.push_event(DriverEvent::Ready);
        wait_for_state(&mut fixture, SessionState::Ready).await;

        driver.hang_on_destroy();
        fixture.cancel.cancel();

        // cleanup_timeout_secs = 1 in the test config; shutdown must finish
        // shortly after that bound despite the wedged destroy.
        tokio::time::timeout(Duration::from_secs(3), fixture.task)
            .await
            .expect("shutdown must not hang on a wedged driver")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn failed_connect_counts_as_reconnect_failure() {
        let mut config = test_config();
        config.reconnect.max_attempts = 1;

        let factory = Arc::new(SimDriverFactory::new());
        let scripted = SimDriver::new();
        scripted.handle().fail_next_connect("socket refused");
        factory.push_driver(scripted);

        let fixture = spawn_supervisor(config, factory);

        let result = tokio::time::timeout(Duration::from_secs(2), fixture.task)
            .await
            .expect("supervisor should exit")
            .unwrap();
        assert!(matches!(
            result,
            Err(ParleyError::ReconnectExhausted { attempts: 1 })
        ));
    }

    #[tokio::test]
    async fn fresh_qr_resets_reconnect_counter() {
        let mut config = test_config();
        config.reconnect.max_attempts = 5;

        let factory = Arc::new(SimDriverFactory::new());
        let mut fixture = spawn_supervisor(config, factory);

        let first = driver_handle(&fixture, 0).await;
        first.push_event(DriverEvent::Ready);
        wait_for_state(&mut fixture, SessionState::Ready).await;

        first.push_event(DriverEvent::Disconnected(DisconnectReason::Transient(
            "TIMEOUT".into(),
        )));

        let second = driver_handle(&fixture, 1).await;
        second.push_event(DriverEvent::Qr("FRESH".into()));
        wait_for_state(&mut fixture, SessionState::QrPending).await;

        assert_eq!(fixture.handle.status.borrow().reconnect_attempts, 0);

        fixture.cancel.cancel();
        fixture.task.await.unwrap().unwrap();
    }
}
