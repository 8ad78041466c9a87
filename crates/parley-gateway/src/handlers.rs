// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers.
//!
//! Handles POST /webhook/{platform}, the /sessions control routes and GET /health.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use parley_core::types::{ConversationStatus, SessionRecord};
use parley_core::ParleyError;
use parley_session::{BulkCloseFilter, BulkCloseResult};
use parley_worker::Admission;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::normalize::{PlatformEvent, Rejection, SUPPORTED_PLATFORMS, parse_event};
use crate::server::GatewayState;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// A failed request, rendered as `{success: false, error}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ParleyError> for ApiError {
    fn from(e: ParleyError) -> Self {
        let status = match &e {
            ParleyError::Validation(_) => StatusCode::BAD_REQUEST,
            ParleyError::NotFound { .. } => StatusCode::NOT_FOUND,
            ParleyError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %e, "request failed");
        }
        Self::new(status, e.to_string())
    }
}

impl From<Rejection> for ApiError {
    fn from(r: Rejection) -> Self {
        debug!(reason = %r, "webhook rejected");
        Self::new(StatusCode::BAD_REQUEST, r.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                success: false,
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// What a lifecycle event did to the conversation's sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Closed,
    Paused,
    Resumed,
    None,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WebhookDetail {
    Admission(Admission),
    Lifecycle {
        action: LifecycleAction,
        sessions: usize,
    },
}

/// Response body for POST /webhook/{platform}.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub event: &'static str,
    #[serde(flatten)]
    pub detail: WebhookDetail,
}

/// POST /webhook/{platform}
///
/// Routes one platform event. Duplicates and buffered messages are successes.
pub async fn post_webhook(
    State(state): State<GatewayState>,
    Path(platform): Path<String>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    if !SUPPORTED_PLATFORMS.contains(&platform.as_str()) {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("platform `{platform}` is not supported"),
        ));
    }
    let event = parse_event(&body)?;
    let event_name = event.name();
    let inbox_id = event.inbox_id();
    let ctx = state
        .inboxes
        .resolve(inbox_id)
        .await?
        .ok_or_else(|| ParleyError::NotFound {
            entity: "inbox",
            id: inbox_id.to_string(),
        })?;
    let tenant_id = ctx.tenant.id;

    let detail = match event {
        PlatformEvent::Message(message) => {
            if let (Some(sent), Some(owner)) = (message.account_id, ctx.tenant.platform_account_id)
                && sent != owner
            {
                return Err(ParleyError::Validation(format!(
                    "account {sent} does not own inbox {inbox_id}"
                ))
                .into());
            }
            let admission = state
                .ingress
                .admit(message.into_normalized(tenant_id, Utc::now()))
                .await?;
            WebhookDetail::Admission(admission)
        }
        PlatformEvent::StatusChanged {
            conversation_id,
            status,
            ..
        } => {
            if status == ConversationStatus::Resolved {
                let sessions = state
                    .sessions
                    .close_conversation(tenant_id, inbox_id, conversation_id)
                    .await?;
                lifecycle(LifecycleAction::Closed, sessions)
            } else {
                lifecycle(LifecycleAction::None, 0)
            }
        }
        PlatformEvent::AssignmentChanged {
            conversation_id,
            assigned: true,
            ..
        } => {
            let sessions = state
                .sessions
                .pause_conversation(tenant_id, inbox_id, conversation_id)
                .await?;
            lifecycle(LifecycleAction::Paused, sessions)
        }
        PlatformEvent::AssignmentChanged {
            conversation_id,
            assigned: false,
            ..
        } => {
            let sessions = state
                .sessions
                .resume_conversation(tenant_id, inbox_id, conversation_id)
                .await?;
            lifecycle(LifecycleAction::Resumed, sessions)
        }
    };

    debug!(platform = %platform, event = event_name, inbox_id, ?detail, "webhook routed");
    Ok(Json(WebhookResponse {
        success: true,
        event: event_name,
        detail,
    }))
}

fn lifecycle(action: LifecycleAction, sessions: usize) -> WebhookDetail {
    WebhookDetail::Lifecycle { action, sessions }
}

/// Response body for single-session control routes.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub success: bool,
    pub session: SessionRecord,
}

/// POST /sessions/{id}/pause
pub async fn pause_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.sessions.pause(&id).await?;
    Ok(session_response(session))
}

/// POST /sessions/{id}/resume
pub async fn resume_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.sessions.resume(&id).await?;
    Ok(session_response(session))
}

/// POST /sessions/{id}/close
pub async fn close_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.sessions.close(&id).await?;
    Ok(session_response(session))
}

fn session_response(session: SessionRecord) -> Json<SessionResponse> {
    info!(session_id = %session.id, state = %session.state, "session changed by operator");
    Json(SessionResponse {
        success: true,
        session,
    })
}

#[derive(Debug, Serialize)]
pub struct BulkCloseResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: BulkCloseResult,
}

/// POST /sessions/bulk-close
pub async fn bulk_close(
    State(state): State<GatewayState>,
    Json(filter): Json<BulkCloseFilter>,
) -> Result<Json<BulkCloseResponse>, ApiError> {
    let result = state.sessions.bulk_close(&filter).await?;
    info!(?filter, closed = result.closed, "bulk close");
    Ok(Json(BulkCloseResponse {
        success: true,
        result,
    }))
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// Jobs waiting in the durable queue; absent when the queue is unreachable.
    pub queue_depth: Option<u64>,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Response {
    let uptime_secs = state.health.start_time.elapsed().as_secs();
    let (code, status, queue_depth) = match state.queue.pending_count().await {
        Ok(depth) => (StatusCode::OK, "ok", Some(depth)),
        Err(e) => {
            error!(error = %e, "health check could not reach the queue");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", None)
        }
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs,
            queue_depth,
        }),
    )
        .into_response()
}
