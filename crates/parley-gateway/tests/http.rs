// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use parley_core::JobQueue;
use parley_core::types::{ConversationKey, SessionRecord, SessionState};
use parley_gateway::{AuthConfig, GatewayState, HealthState, router};
use parley_test_utils::{TENANT_ID, TestHarness};
use parley_worker::{InboxDirectory, IngressService};
use serde_json::{Value, json};
use tower::ServiceExt;

const TOKEN: &str = "control-token";

struct App {
    harness: TestHarness,
    router: Router,
}

async fn app(bearer_token: Option<&str>) -> App {
    let harness = TestHarness::builder()
        .with_inbox(7, false)
        .build()
        .await
        .unwrap();
    let inboxes = Arc::new(InboxDirectory::new(harness.db.clone()));
    let queue: Arc<dyn JobQueue> = harness.queue.clone();
    let ingress = IngressService::new(
        inboxes.clone(),
        harness.dedup.clone(),
        harness.locks.clone(),
        harness.buffer.clone(),
        queue.clone(),
        harness.clock.clone(),
        &harness.config.lock,
    );
    let state = GatewayState {
        ingress,
        inboxes,
        sessions: harness.sessions.clone(),
        queue,
        auth: AuthConfig {
            bearer_token: bearer_token.map(str::to_string),
        },
        health: HealthState {
            start_time: std::time::Instant::now(),
        },
    };
    App {
        router: router(state),
        harness,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn webhook(platform: &str, body: Value) -> Request<Body> {
    Request::post(format!("/webhook/{platform}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn control(path: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::post(path).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
    builder.body(body).unwrap()
}

fn incoming(message_id: u64, account_id: i64) -> Value {
    json!({
        "event": "message_created",
        "id": message_id,
        "content": "hello",
        "message_type": "incoming",
        "private": false,
        "account": {"id": account_id},
        "inbox": {"id": 7},
        "conversation": {"id": 100},
        "sender": {"name": "Ada", "phone_number": "+15550001"}
    })
}

async fn seed_session(harness: &TestHarness, conversation_id: i64) -> SessionRecord {
    let key = ConversationKey {
        tenant_id: TENANT_ID,
        inbox_id: 7,
        conversation_id,
        contact_address: "+15550001".into(),
    };
    let record = harness
        .sessions
        .new_record(&key, Some("Ada".into()), format!("bot-{conversation_id}"), None);
    harness
        .sessions
        .create_or_update_session(record, Vec::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_queue_depth() {
    let app = app(None).await;
    let (status, body) = send(&app.router, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["queue_depth"], 0);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn message_is_enqueued_then_reported_in_flight() {
    let app = app(None).await;

    let (status, body) = send(&app.router, webhook("chatwoot", incoming(9001, 11))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["event"], "message_created");
    assert_eq!(body["outcome"], "enqueued");
    assert_eq!(app.harness.queue.enqueued().await.len(), 1);

    let (status, body) = send(&app.router, webhook("chatwoot", incoming(9001, 11))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "in_flight");
    assert_eq!(app.harness.queue.enqueued().await.len(), 1);
}

#[tokio::test]
async fn processed_message_is_acknowledged_as_duplicate() {
    let app = app(None).await;
    app.harness.dedup.mark_processed(7, Some("9001")).await.unwrap();

    let (status, body) = send(&app.router, webhook("chatwoot", incoming(9001, 11))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_processed");
    assert!(app.harness.queue.enqueued().await.is_empty());
}

#[tokio::test]
async fn webhook_rejections() {
    let app = app(None).await;

    let (status, _) = send(&app.router, webhook("telegram", incoming(1, 11))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app.router, webhook("chatwoot", json!({"id": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let mut outgoing = incoming(2, 11);
    outgoing["message_type"] = json!("outgoing");
    let (status, _) = send(&app.router, webhook("chatwoot", outgoing)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut unknown_inbox = incoming(3, 11);
    unknown_inbox["inbox"] = json!({"id": 404});
    let (status, body) = send(&app.router, webhook("chatwoot", unknown_inbox)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("404"));

    let (status, _) = send(&app.router, webhook("chatwoot", incoming(4, 99))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.harness.queue.enqueued().await.is_empty());
}

#[tokio::test]
async fn lifecycle_events_drive_sessions() {
    let app = app(None).await;
    let session = seed_session(&app.harness, 100).await;

    let (status, body) = send(
        &app.router,
        webhook(
            "chatwoot",
            json!({
                "event": "conversation_updated",
                "id": 100,
                "inbox_id": 7,
                "meta": {"assignee": {"id": 3}}
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "paused");
    assert_eq!(body["sessions"], 1);
    let stored = app.harness.sessions.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.state, SessionState::Paused);

    let (_, body) = send(
        &app.router,
        webhook(
            "chatwoot",
            json!({"event": "conversation_updated", "id": 100, "inbox_id": 7, "meta": {}}),
        ),
    )
    .await;
    assert_eq!(body["action"], "resumed");

    let (_, body) = send(
        &app.router,
        webhook(
            "chatwoot",
            json!({"event": "conversation_status_changed", "id": 100, "inbox_id": 7, "status": "pending"}),
        ),
    )
    .await;
    assert_eq!(body["action"], "none");

    let (status, body) = send(
        &app.router,
        webhook(
            "chatwoot",
            json!({"event": "conversation_status_changed", "id": 100, "inbox_id": 7, "status": "resolved"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "closed");
    assert_eq!(body["sessions"], 1);
    let stored = app.harness.sessions.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.state, SessionState::Closed);
}

#[tokio::test]
async fn control_routes_require_the_token() {
    let app = app(Some(TOKEN)).await;
    let session = seed_session(&app.harness, 100).await;
    let path = format!("/sessions/{}/pause", session.id);

    let (status, _) = send(&app.router, control(&path, None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app.router, control(&path, Some("wrong"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app.router, control(&path, Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["state"], "paused");
}

#[tokio::test]
async fn control_routes_are_closed_without_a_configured_token() {
    let app = app(None).await;
    let session = seed_session(&app.harness, 100).await;
    let (status, _) = send(
        &app.router,
        control(&format!("/sessions/{}/close", session.id), Some(""), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_control_maps_errors() {
    let app = app(Some(TOKEN)).await;
    let session = seed_session(&app.harness, 100).await;

    let (status, _) = send(&app.router, control("/sessions/missing/pause", Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let close = format!("/sessions/{}/close", session.id);
    let (status, body) = send(&app.router, control(&close, Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["state"], "closed");

    let resume = format!("/sessions/{}/resume", session.id);
    let (status, body) = send(&app.router, control(&resume, Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn bulk_close_applies_the_filter() {
    let app = app(Some(TOKEN)).await;
    let active = seed_session(&app.harness, 100).await;
    let paused = seed_session(&app.harness, 101).await;
    app.harness.sessions.pause(&paused.id).await.unwrap();

    let (status, body) = send(
        &app.router,
        control("/sessions/bulk-close", Some(TOKEN), Some(json!({"status": "paused"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["closed"], 1);

    let active = app.harness.sessions.get_by_id(&active.id).await.unwrap().unwrap();
    assert_eq!(active.state, SessionState::Active);
    let paused = app.harness.sessions.get_by_id(&paused.id).await.unwrap().unwrap();
    assert_eq!(paused.state, SessionState::Closed);
}
