// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway surface.
//!
//! Health and QR reads must always respond, even while the session is
//! unhealthy -- they report state, they never fail because the underlying
//! connection is down. Sends are readiness-gated by the supervisor and come
//! back as structured JSON errors (400 validation, 503 not-ready, 404
//! unknown media, 500 unexpected).

use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use parley_core::error::ParleyError;
use parley_core::types::{MediaBytes, MessageId, OutboundContent, SessionState};
use parley_session::state::QrStatus;
use parley_session::Command;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

/// How long a send waits for the supervisor before giving up.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a media fetch waits; downloads are bounded again inside the
/// supervisor by `media.download_timeout_secs`.
const MEDIA_TIMEOUT: Duration = Duration::from_secs(60);

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Current session state.
    pub status: String,
    pub ready: bool,
    #[serde(rename = "hasQR")]
    pub has_qr: bool,
    #[serde(rename = "memoryMB")]
    pub memory_mb: u64,
}

/// Response body for `GET /qr`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QrResponse {
    Qr { qr: String },
    Status { status: String },
}

/// Request body for `POST /send-text`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Success body for the send endpoints.
#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// GET /health
///
/// Always responds, whatever state the session is in.
pub async fn get_health(State(state): State<crate::server::GatewayState>) -> Json<HealthResponse> {
    let status = state.session.status.borrow().clone();
    let memory = state.memory.borrow().clone();

    Json(HealthResponse {
        status: status.state.to_string(),
        ready: status.state == SessionState::Ready,
        has_qr: status.qr.is_some(),
        memory_mb: memory.rss_mb,
    })
}

/// GET /qr
pub async fn get_qr(State(state): State<crate::server::GatewayState>) -> Json<QrResponse> {
    let status = state.session.status.borrow().clone();

    Json(match status.qr_status() {
        QrStatus::Available(qr) => QrResponse::Qr { qr },
        QrStatus::Authenticated => QrResponse::Status {
            status: "authenticated".to_string(),
        },
        QrStatus::Waiting => QrResponse::Status {
            status: "waiting".to_string(),
        },
    })
}

/// POST /send-text
pub async fn post_send_text(
    State(state): State<crate::server::GatewayState>,
    Json(body): Json<SendTextRequest>,
) -> Response {
    let chat_id = body.chat_id.filter(|s| !s.trim().is_empty());
    let text = body.text.filter(|s| !s.is_empty());

    let (Some(chat_id), Some(text)) = (chat_id, text) else {
        return validation_error("chatId and text are required");
    };

    submit_send(&state, |reply| Command::SendText {
        chat_id,
        text,
        reply,
    })
    .await
}

/// POST /send-media (multipart: chatId, file, optional caption)
pub async fn post_send_media(
    State(state): State<crate::server::GatewayState>,
    multipart: Multipart,
) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(response) => return response,
    };

    let (Some(chat_id), Some(data)) = (upload.chat_id, upload.data) else {
        return validation_error("chatId and file are required");
    };

    let content = OutboundContent::Media {
        data,
        mime_type: upload
            .mime_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        caption: upload.caption,
    };

    submit_send(&state, |reply| Command::SendMedia {
        chat_id,
        content,
        reply,
    })
    .await
}

/// POST /send-voice (multipart: chatId, file)
pub async fn post_send_voice(
    State(state): State<crate::server::GatewayState>,
    multipart: Multipart,
) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(response) => return response,
    };

    let (Some(chat_id), Some(data)) = (upload.chat_id, upload.data) else {
        return validation_error("chatId and file are required");
    };

    let content = OutboundContent::Voice {
        data,
        mime_type: upload
            .mime_type
            .unwrap_or_else(|| "audio/ogg; codecs=opus".to_string()),
    };

    submit_send(&state, |reply| Command::SendMedia {
        chat_id,
        content,
        reply,
    })
    .await
}

/// GET /media/{message_id}
///
/// Streams cached media bytes with their stored mime type, or 404.
pub async fn get_media(
    State(state): State<crate::server::GatewayState>,
    Path(message_id): Path<String>,
) -> Response {
    let (tx, rx) = oneshot::channel::<Result<MediaBytes, ParleyError>>();

    if state
        .session
        .commands
        .send(Command::FetchMedia { message_id, reply: tx })
        .await
        .is_err()
    {
        return error_response(&ParleyError::Internal(
            "session supervisor unavailable".to_string(),
        ));
    }

    match tokio::time::timeout(MEDIA_TIMEOUT, rx).await {
        Ok(Ok(Ok(bytes))) => {
            ([(header::CONTENT_TYPE, bytes.mime_type)], bytes.data).into_response()
        }
        Ok(Ok(Err(e))) => error_response(&e),
        Ok(Err(_)) => error_response(&ParleyError::Internal(
            "reply channel closed".to_string(),
        )),
        Err(_) => error_response(&ParleyError::Timeout {
            duration: MEDIA_TIMEOUT,
        }),
    }
}

/// Collected multipart fields for the upload endpoints.
struct UploadFields {
    chat_id: Option<String>,
    caption: Option<String>,
    data: Option<Vec<u8>>,
    mime_type: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadFields, Response> {
    let mut upload = UploadFields {
        chat_id: None,
        caption: None,
        data: None,
        mime_type: None,
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(validation_error(&format!("malformed multipart body: {e}"))),
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("chatId") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| validation_error(&format!("invalid chatId field: {e}")))?;
                upload.chat_id = Some(value).filter(|s| !s.trim().is_empty());
            }
            Some("caption") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| validation_error(&format!("invalid caption field: {e}")))?;
                upload.caption = Some(value).filter(|s| !s.is_empty());
            }
            Some("file") => {
                upload.mime_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| validation_error(&format!("invalid file field: {e}")))?;
                upload.data = Some(bytes.to_vec());
            }
            other => {
                debug!(field = ?other, "ignoring unexpected multipart field");
            }
        }
    }

    Ok(upload)
}

/// Routes a send command to the supervisor and maps the reply to HTTP.
async fn submit_send<F>(state: &crate::server::GatewayState, build: F) -> Response
where
    F: FnOnce(oneshot::Sender<Result<MessageId, ParleyError>>) -> Command,
{
    let (tx, rx) = oneshot::channel();

    if state.session.commands.send(build(tx)).await.is_err() {
        return error_response(&ParleyError::Internal(
            "session supervisor unavailable".to_string(),
        ));
    }

    match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
        Ok(Ok(Ok(_message_id))) => {
            (StatusCode::OK, Json(SendResponse { success: true })).into_response()
        }
        Ok(Ok(Err(e))) => error_response(&e),
        Ok(Err(_)) => error_response(&ParleyError::Internal(
            "reply channel closed".to_string(),
        )),
        Err(_) => error_response(&ParleyError::Timeout {
            duration: COMMAND_TIMEOUT,
        }),
    }
}

fn validation_error(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Maps the error taxonomy onto HTTP status codes.
fn error_response(err: &ParleyError) -> Response {
    let status = match err {
        ParleyError::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ParleyError::MediaNotFound { .. } => StatusCode::NOT_FOUND,
        ParleyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}
