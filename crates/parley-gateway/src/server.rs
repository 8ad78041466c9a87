// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use parley_core::{JobQueue, ParleyError};
use parley_session::SessionStore;
use parley_worker::{InboxDirectory, IngressService};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthConfig, auth_middleware};
use crate::handlers;

#[derive(Clone)]
pub struct HealthState {
    pub start_time: std::time::Instant,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub ingress: IngressService,
    pub inboxes: Arc<InboxDirectory>,
    pub sessions: Arc<SessionStore>,
    pub queue: Arc<dyn JobQueue>,
    pub auth: AuthConfig,
    pub health: HealthState,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Builds the router:
/// - POST /webhook/{platform}
/// - GET /health
/// - POST /sessions/{id}/pause, /resume, /close and POST /sessions/bulk-close (bearer auth)
pub fn router(state: GatewayState) -> Router {
    let auth_state = state.auth.clone();

    let public_routes = Router::new()
        .route("/webhook/{platform}", post(handlers::post_webhook))
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    let control_routes = Router::new()
        .route("/sessions/bulk-close", post(handlers::bulk_close))
        .route("/sessions/{id}/pause", post(handlers::pause_session))
        .route("/sessions/{id}/resume", post(handlers::resume_session))
        .route("/sessions/{id}/close", post(handlers::close_session))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(control_routes)
        .layer(TraceLayer::new_for_http())
}

/// Serves the gateway until `shutdown` is cancelled.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), ParleyError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ParleyError::Config(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| ParleyError::Internal(format!("gateway server error: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_debug() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        };
        assert!(format!("{config:?}").contains("127.0.0.1"));
    }
}
