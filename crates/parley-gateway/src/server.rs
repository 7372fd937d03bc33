// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state. Handlers never touch the
//! driver or session internals directly: reads come from watch snapshots,
//! writes go through the supervisor's command channel.

use axum::routing::{get, post};
use axum::Router;
use parley_config::model::GatewayConfig;
use parley_core::error::ParleyError;
use parley_session::guardian::MemorySample;
use parley_session::SessionHandle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::handlers;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    /// Command and status access to the running session supervisor.
    pub session: SessionHandle,
    /// Latest memory sample from the guardian.
    pub memory: watch::Receiver<MemorySample>,
}

/// Builds the gateway router.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/qr", get(handlers::get_qr))
        .route("/send-text", post(handlers::post_send_text))
        .route("/send-media", post(handlers::post_send_media))
        .route("/send-voice", post(handlers::post_send_voice))
        .route("/media/{message_id}", get(handlers::get_media))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds the configured address and serves until cancelled.
pub async fn start_server(
    config: &GatewayConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), ParleyError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ParleyError::Internal(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");
    serve_on(listener, state, cancel).await
}

/// Serves the gateway on an already-bound listener. Exposed separately so
/// tests can bind an ephemeral port first.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), ParleyError> {
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ParleyError::Internal(format!("gateway server error: {e}")))
}
