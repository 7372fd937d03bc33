// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic [`SessionDriver`] implementation.
//!
//! [`SimDriver`] backs two uses: the scriptable test double for the session
//! supervisor's test suites, and the non-networked simulation posture of
//! `parley serve` (`session.driver = "sim"`). Events injected via a
//! [`SimHandle`] are returned by `next_event()` in order; outbound sends are
//! captured for assertion; media payloads are served from an in-memory map.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use parley_core::error::ParleyError;
use parley_core::traits::{DriverFactory, SessionDriver};
use parley_core::types::{
    DriverConnectionState, DriverEvent, MediaBytes, MediaHandle, MessageId, OutboundContent,
};
use tokio::sync::Notify;
use tracing::debug;

/// QR payload emitted by auto-connecting sim drivers.
pub const SIM_QR_PAYLOAD: &str = "SIM-QR-0001";

/// One captured outbound send.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub target: String,
    pub content: OutboundContent,
}

#[derive(Debug)]
struct SimShared {
    events: Mutex<VecDeque<DriverEvent>>,
    notify: Notify,
    sent: Mutex<Vec<SentMessage>>,
    media: Mutex<HashMap<String, MediaBytes>>,
    connection: RwLock<DriverConnectionState>,
    connect_error: Mutex<Option<String>>,
    send_error: Mutex<Option<String>>,
    destroyed: AtomicBool,
    hang_on_destroy: AtomicBool,
    /// Emit qr -> authenticated -> ready automatically on connect.
    auto_connect: bool,
}

impl SimShared {
    fn new(auto_connect: bool) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            sent: Mutex::new(Vec::new()),
            media: Mutex::new(HashMap::new()),
            connection: RwLock::new(DriverConnectionState::Disconnected),
            connect_error: Mutex::new(None),
            send_error: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            hang_on_destroy: AtomicBool::new(false),
            auto_connect,
        }
    }

    fn push_event(&self, event: DriverEvent) {
        if let Ok(mut queue) = self.events.lock() {
            queue.push_back(event);
        }
        self.notify.notify_one();
    }
}

/// A deterministic in-memory session driver.
pub struct SimDriver {
    shared: Arc<SimShared>,
}

impl SimDriver {
    /// Creates a sim driver that emits nothing until events are injected
    /// through its [`SimHandle`].
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SimShared::new(false)),
        }
    }

    /// Creates a sim driver that walks the full authentication sequence
    /// (qr, authenticated, ready) by itself on `connect()`.
    pub fn auto() -> Self {
        Self {
            shared: Arc::new(SimShared::new(true)),
        }
    }

    /// Returns a handle for injecting events and inspecting captured state
    /// after the driver has been moved into the supervisor.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared control handle for a [`SimDriver`].
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<SimShared>,
}

impl SimHandle {
    /// Injects an event into the driver's queue.
    ///
    /// The next call to `next_event()` will return it.
    pub fn push_event(&self, event: DriverEvent) {
        self.shared.push_event(event);
    }

    /// Registers a media payload retrievable by handle token.
    pub fn register_media(&self, token: &str, data: Vec<u8>, mime_type: &str) {
        if let Ok(mut media) = self.shared.media.lock() {
            media.insert(
                token.to_string(),
                MediaBytes {
                    data,
                    mime_type: mime_type.to_string(),
                },
            );
        }
    }

    /// Scripts the next `connect()` call to fail with the given message.
    pub fn fail_next_connect(&self, message: &str) {
        if let Ok(mut err) = self.shared.connect_error.lock() {
            *err = Some(message.to_string());
        }
    }

    /// Scripts all subsequent `send_message()` calls to fail.
    pub fn fail_sends(&self, message: &str) {
        if let Ok(mut err) = self.shared.send_error.lock() {
            *err = Some(message.to_string());
        }
    }

    /// Makes `destroy()` hang forever, for cleanup-timeout tests.
    pub fn hang_on_destroy(&self) {
        self.shared.hang_on_destroy.store(true, Ordering::SeqCst);
    }

    /// All messages captured by `send_message()`.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.shared
            .sent
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Count of captured sends.
    pub fn sent_count(&self) -> usize {
        self.shared.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether `destroy()` has been called.
    pub fn destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionDriver for SimDriver {
    fn name(&self) -> &str {
        "sim"
    }

    async fn connect(&mut self) -> Result<(), ParleyError> {
        if let Ok(mut scripted) = self.shared.connect_error.lock()
            && let Some(message) = scripted.take()
        {
            return Err(ParleyError::Driver {
                message,
                source: None,
            });
        }

        if let Ok(mut conn) = self.shared.connection.write() {
            *conn = DriverConnectionState::Connected;
        }

        if self.shared.auto_connect {
            debug!("sim driver auto-connecting");
            self.shared.push_event(DriverEvent::Qr(SIM_QR_PAYLOAD.to_string()));
            self.shared.push_event(DriverEvent::Authenticated);
            self.shared.push_event(DriverEvent::Ready);
        }

        Ok(())
    }

    async fn send_message(
        &self,
        target: &str,
        content: OutboundContent,
    ) -> Result<MessageId, ParleyError> {
        if let Ok(scripted) = self.shared.send_error.lock()
            && let Some(ref message) = *scripted
        {
            return Err(ParleyError::Driver {
                message: message.clone(),
                source: None,
            });
        }

        if let Ok(mut sent) = self.shared.sent.lock() {
            sent.push(SentMessage {
                target: target.to_string(),
                content,
            });
        }

        Ok(MessageId(format!("sim-{}", uuid::Uuid::new_v4())))
    }

    async fn next_event(&self) -> Result<DriverEvent, ParleyError> {
        loop {
            if let Ok(mut queue) = self.shared.events.lock()
                && let Some(event) = queue.pop_front()
            {
                return Ok(event);
            }
            self.shared.notify.notified().await;
        }
    }

    fn connection_state(&self) -> DriverConnectionState {
        self.shared
            .connection
            .read()
            .map(|c| *c)
            .unwrap_or(DriverConnectionState::Disconnected)
    }

    async fn download_media(&self, handle: &MediaHandle) -> Result<MediaBytes, ParleyError> {
        let found = self
            .shared
            .media
            .lock()
            .ok()
            .and_then(|m| m.get(&handle.0).cloned());

        found.ok_or_else(|| ParleyError::Driver {
            message: format!("sim driver has no media for handle {}", handle.0),
            source: None,
        })
    }

    async fn destroy(&self) -> Result<(), ParleyError> {
        if self.shared.hang_on_destroy.load(Ordering::SeqCst) {
            // Simulates a wedged browser/process teardown.
            std::future::pending::<()>().await;
        }

        self.shared.destroyed.store(true, Ordering::SeqCst);
        if let Ok(mut conn) = self.shared.connection.write() {
            *conn = DriverConnectionState::Disconnected;
        }
        Ok(())
    }
}

/// Factory handing out sim drivers.
///
/// Scripted instances (queued via [`SimDriverFactory::push_driver`]) are
/// consumed first; once the script runs dry the factory falls back to fresh
/// drivers in the configured mode. Handles for every created driver are
/// retained for post-hoc assertions.
pub struct SimDriverFactory {
    auto_connect: bool,
    scripted: Mutex<VecDeque<SimDriver>>,
    created: Mutex<Vec<SimHandle>>,
}

impl SimDriverFactory {
    /// Factory producing manually-scripted drivers.
    pub fn new() -> Self {
        Self {
            auto_connect: false,
            scripted: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Factory producing auto-connecting drivers (simulation posture).
    pub fn auto() -> Self {
        Self {
            auto_connect: true,
            scripted: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Queues a pre-configured driver to be handed out on the next create.
    pub fn push_driver(&self, driver: SimDriver) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.push_back(driver);
        }
    }

    /// Number of drivers created so far.
    pub fn created_count(&self) -> usize {
        self.created.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Handle of the `index`-th created driver.
    pub fn created_handle(&self, index: usize) -> Option<SimHandle> {
        self.created.lock().ok().and_then(|c| c.get(index).cloned())
    }
}

impl Default for SimDriverFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverFactory for SimDriverFactory {
    fn create(&self) -> Box<dyn SessionDriver> {
        let driver = self
            .scripted
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| {
                if self.auto_connect {
                    SimDriver::auto()
                } else {
                    SimDriver::new()
                }
            });

        if let Ok(mut created) = self.created.lock() {
            created.push(driver.handle());
        }
        Box::new(driver)
    }
}
