// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Best-effort webhook delivery of canonical messages.
//!
//! [`WebhookDispatcher`] posts one JSON envelope per message to the
//! configured endpoint with a bounded timeout. It never retries -- retry
//! policy belongs to the caller -- and it never blocks the event-processing
//! path beyond its own timeout. With no endpoint configured, dispatch is a
//! no-op rather than an error.

use std::time::Duration;

use parley_config::model::WebhookConfig;
use parley_core::error::ParleyError;
use parley_core::types::CanonicalMessage;
use serde::Serialize;
use tracing::{debug, info, warn};

/// JSON envelope posted to the webhook endpoint.
#[derive(Debug, Serialize)]
struct WebhookEnvelope<'a> {
    payload: &'a CanonicalMessage,
}

/// One-shot, timeout-bounded HTTP delivery of normalized messages.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: Option<String>,
    timeout: Duration,
}

impl WebhookDispatcher {
    /// Creates a dispatcher from webhook configuration.
    pub fn new(config: &WebhookConfig) -> Result<Self, ParleyError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::Dispatch {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            url: config.url.clone(),
            timeout,
        })
    }

    /// Whether an endpoint is configured.
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Delivers one message to the configured endpoint.
    ///
    /// Returns `Ok(())` immediately when no endpoint is configured. A non-2xx
    /// response or transport failure yields a typed [`ParleyError::Dispatch`];
    /// the caller decides whether that is worth more than a log line.
    pub async fn dispatch(&self, message: &CanonicalMessage) -> Result<(), ParleyError> {
        let Some(ref url) = self.url else {
            debug!(message_id = %message.id, "no webhook configured, skipping dispatch");
            return Ok(());
        };

        let envelope = WebhookEnvelope { payload: message };

        let response = self
            .client
            .post(url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ParleyError::Timeout {
                        duration: self.timeout,
                    }
                } else {
                    ParleyError::Dispatch {
                        message: format!("webhook request failed: {e}"),
                        source: Some(Box::new(e)),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            info!(
                message_id = %message.id,
                status = status.as_u16(),
                "webhook delivered"
            );
            Ok(())
        } else {
            warn!(
                message_id = %message.id,
                status = status.as_u16(),
                "webhook endpoint returned failure status"
            );
            Err(ParleyError::Dispatch {
                message: format!("webhook endpoint returned {status}"),
                source: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::MessageKind;
    use wiremock::matchers::{body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(url: Option<String>, timeout_ms: u64) -> WebhookConfig {
        WebhookConfig { url, timeout_ms }
    }

    fn make_message(id: &str) -> CanonicalMessage {
        CanonicalMessage {
            id: id.to_string(),
            from: "alice".into(),
            to: "bob".into(),
            body: "hello".into(),
            kind: MessageKind::Text,
            timestamp: 1_700_000_000,
            from_me: false,
            has_media: false,
            media_ref: None,
        }
    }

    #[tokio::test]
    async fn dispatch_posts_payload_envelope() {
        let server = MockServer::start().await;
        let expected = serde_json::json!({
            "payload": {
                "id": "m1",
                "from": "alice",
                "to": "bob",
                "body": "hello",
                "type": "text",
                "timestamp": 1_700_000_000,
                "fromMe": false,
                "hasMedia": false,
            }
        });

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json_string(expected.to_string()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher =
            WebhookDispatcher::new(&make_config(Some(format!("{}/hook", server.uri())), 5_000))
                .unwrap();

        dispatcher.dispatch(&make_message("m1")).await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_without_url_is_noop() {
        let dispatcher = WebhookDispatcher::new(&make_config(None, 5_000)).unwrap();
        assert!(!dispatcher.is_configured());
        assert!(dispatcher.dispatch(&make_message("m1")).await.is_ok());
    }

    #[tokio::test]
    async fn dispatch_surfaces_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dispatcher =
            WebhookDispatcher::new(&make_config(Some(server.uri()), 5_000)).unwrap();

        let err = dispatcher.dispatch(&make_message("m1")).await.unwrap_err();
        assert!(matches!(err, ParleyError::Dispatch { .. }));
    }

    #[tokio::test]
    async fn dispatch_times_out_on_slow_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let dispatcher =
            WebhookDispatcher::new(&make_config(Some(server.uri()), 50)).unwrap();

        let err = dispatcher.dispatch(&make_message("m1")).await.unwrap_err();
        assert!(matches!(err, ParleyError::Timeout { .. }));
    }

    #[tokio::test]
    async fn dispatch_never_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1) // Exactly one request despite the failure.
            .mount(&server)
            .await;

        let dispatcher =
            WebhookDispatcher::new(&make_config(Some(server.uri()), 5_000)).unwrap();

        let _ = dispatcher.dispatch(&make_message("m1")).await;
    }
}
