// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end admission → queue → worker flows over the test harness.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_config::ParleyConfig;
use parley_core::types::{Attachment, NormalizedMessage};
use parley_test_utils::{BotCall, TENANT_ID, TestHarness};
use parley_worker::{
    Admission, IngestionWorker, InboxDirectory, IngressService, JobResult, MessageHandler,
    OutboundSender, WorkOutcome, WorkerPool,
};

struct Pipeline {
    harness: TestHarness,
    ingress: IngressService,
    pool: WorkerPool,
}

async fn pipeline(buffer_window_ms: u64) -> Pipeline {
    let mut config = ParleyConfig::default();
    config.buffer.window_ms = buffer_window_ms;
    let harness = TestHarness::builder()
        .with_config(config)
        .with_inbox(3, true)
        .with_inbox(7, false)
        .build()
        .await
        .unwrap();
    let inboxes = Arc::new(InboxDirectory::new(harness.db.clone()));
    let ingress = IngressService::new(
        inboxes.clone(),
        harness.dedup.clone(),
        harness.locks.clone(),
        harness.buffer.clone(),
        harness.queue.clone(),
        harness.clock.clone(),
        &harness.config.lock,
    );
    let handler = MessageHandler::new(
        harness.sessions.clone(),
        harness.bot.clone(),
        OutboundSender::new(harness.channel.clone(), &harness.config.outbound),
        harness.clock.clone(),
    );
    let worker = Arc::new(IngestionWorker::new(
        inboxes,
        harness.dedup.clone(),
        harness.locks.clone(),
        handler,
        &harness.config.lock,
    ));
    let pool = WorkerPool::new(harness.queue.clone(), worker, &harness.config.queue);
    Pipeline {
        harness,
        ingress,
        pool,
    }
}

fn image(inbox_id: i64, id: &str) -> NormalizedMessage {
    NormalizedMessage {
        tenant_id: TENANT_ID,
        inbox_id,
        conversation_id: 300,
        contact_address: "+15550003".into(),
        message_id: Some(id.into()),
        content: String::new(),
        attachments: vec![Attachment {
            kind: "image".into(),
            url: format!("https://media.example/{id}.jpg"),
            mime_type: Some("image/jpeg".into()),
            file_name: None,
        }],
        contact_name: None,
        received_at: Utc::now(),
    }
}

#[tokio::test]
async fn image_burst_becomes_one_bot_turn() {
    let p = pipeline(300).await;

    for id in ["img1", "img2", "img3"] {
        let admission = p.ingress.admit(image(3, id)).await.unwrap();
        assert!(matches!(admission, Admission::Buffered { .. }));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while p.harness.queue.enqueued().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("buffer was never flushed");

    let jobs = p.harness.queue.enqueued().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].batch.len(), 3);
    assert_eq!(jobs[0].message.message_id.as_deref(), Some("img1"));

    let result = p.pool.process_next().await.unwrap().unwrap();
    assert!(matches!(result, JobResult::Acked(WorkOutcome::Processed(_))));

    let calls = p.harness.bot.calls().await;
    assert_eq!(calls.len(), 1);
    let BotCall::Start { request, .. } = &calls[0] else {
        panic!("expected start_chat, got {:?}", calls[0]);
    };
    assert_eq!(request.attachments[0].url, "https://media.example/img1.jpg");

    for id in ["img1", "img2", "img3"] {
        assert_eq!(
            p.ingress.admit(image(3, id)).await.unwrap(),
            Admission::AlreadyProcessed
        );
    }
}

#[tokio::test]
async fn sessions_are_per_thread() {
    let p = pipeline(300).await;
    let mut other = image(7, "m2");
    other.contact_address = "+15550009".into();

    p.ingress.admit(image(7, "m1")).await.unwrap();
    p.ingress.admit(other).await.unwrap();
    while p.pool.process_next().await.unwrap().is_some() {}

    let starts = p
        .harness
        .bot
        .calls()
        .await
        .into_iter()
        .filter(|c| matches!(c, BotCall::Start { .. }))
        .count();
    assert_eq!(starts, 2);
    assert_eq!(p.harness.sessions.active_sessions(7).await.unwrap().len(), 2);
}
