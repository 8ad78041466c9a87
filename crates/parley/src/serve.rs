// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley serve` command implementation.
//!
//! Opens the shared SQLite database, wires the coordination services, the
//! session store and the collaborator clients together, then runs the HTTP
//! gateway alongside the worker pool, buffer sweeper, trigger scheduler,
//! auto-close sweeper and KV purge until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use parley_config::ParleyConfig;
use parley_coord::{BufferService, DedupService, LockService};
use parley_core::{
    BotEngine, Clock, ConversationPlatform, JobQueue, KvStore, MessagingChannel, ParleyError,
    SystemClock,
};
use parley_gateway::{
    AuthConfig, GatewayState, HealthState, ServerConfig as GatewayServerConfig, start_server,
};
use parley_scheduler::{AutoCloseSweeper, SchedulerDeps, TriggerScheduler};
use parley_session::SessionStore;
use parley_storage::{Database, SqliteJobQueue, SqliteKv};
use parley_worker::{
    InboxDirectory, IngestionWorker, IngressService, MessageHandler, OutboundSender, WorkerPool,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::{HttpBotEngine, HttpChannel, HttpPlatform};
use crate::shutdown;

/// How often expired rows are purged from the shared KV table.
const KV_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Everything `serve` runs, wired but not yet started.
pub(crate) struct Services {
    pub(crate) kv: Arc<SqliteKv>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) buffer: BufferService,
    pub(crate) pool: WorkerPool,
    pub(crate) scheduler: TriggerScheduler,
    pub(crate) auto_close: AutoCloseSweeper,
    pub(crate) gateway: GatewayState,
}

/// Wires every service against the configured database and collaborators.
pub(crate) async fn build_services(config: &ParleyConfig) -> Result<Services, ParleyError> {
    let bot: Arc<dyn BotEngine> = Arc::new(HttpBotEngine::new(&config.bot_engine)?);
    let channel: Arc<dyn MessagingChannel> = Arc::new(HttpChannel::new(&config.channel)?);
    let platform: Arc<dyn ConversationPlatform> = Arc::new(HttpPlatform::new(&config.platform)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let db = Database::open_with(&config.storage).await?;
    info!(path = %config.storage.database_path, "database opened");

    let kv = Arc::new(SqliteKv::new(db.clone(), clock.clone()));
    let shared_kv: Arc<dyn KvStore> = kv.clone();
    let queue: Arc<dyn JobQueue> =
        Arc::new(SqliteJobQueue::new(db.clone(), clock.clone(), &config.queue));

    let locks = LockService::new(shared_kv.clone(), &config.lock);
    let dedup = DedupService::new(shared_kv.clone(), &config.dedup);
    let buffer = BufferService::new(
        shared_kv.clone(),
        queue.clone(),
        locks.clone(),
        clock.clone(),
        &config.buffer,
    );
    let sessions = Arc::new(
        SessionStore::new(db.clone(), shared_kv, clock.clone(), &config.session)
            .with_platform(platform.clone()),
    );
    let inboxes = Arc::new(InboxDirectory::new(db.clone()));
    let outbound = OutboundSender::new(channel, &config.outbound);

    let ingress = IngressService::new(
        inboxes.clone(),
        dedup.clone(),
        locks.clone(),
        buffer.clone(),
        queue.clone(),
        clock.clone(),
        &config.lock,
    );
    let handler = MessageHandler::new(sessions.clone(), bot.clone(), outbound.clone(), clock.clone());
    let worker = Arc::new(IngestionWorker::new(
        inboxes.clone(),
        dedup,
        locks,
        handler,
        &config.lock,
    ));
    let pool = WorkerPool::new(queue.clone(), worker, &config.queue);

    let scheduler = TriggerScheduler::new(
        SchedulerDeps {
            db,
            sessions: sessions.clone(),
            bot,
            platform,
            outbound,
            clock,
        },
        &config.scheduler,
    );
    let auto_close = AutoCloseSweeper::new(sessions.clone(), &config.auto_close);

    let gateway = GatewayState {
        ingress,
        inboxes,
        sessions,
        queue: queue.clone(),
        auth: AuthConfig {
            bearer_token: config.server.control_token.clone(),
        },
        health: HealthState {
            start_time: std::time::Instant::now(),
        },
    };

    Ok(Services {
        kv,
        queue,
        buffer,
        pool,
        scheduler,
        auto_close,
        gateway,
    })
}

/// Runs the `parley serve` command.
pub async fn run_serve(config: ParleyConfig) -> Result<(), ParleyError> {
    init_tracing(&config.log.level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting parley serve");

    let services = build_services(&config).await?;
    let cancel = shutdown::install_signal_handler();

    let mut tasks = JoinSet::new();
    tasks.spawn(services.buffer.clone().run_sweeper(
        Duration::from_millis(config.buffer.sweep_interval_ms.max(1)),
        cancel.clone(),
    ));
    tasks.spawn(services.pool.run(cancel.clone()));
    if config.scheduler.enabled {
        tasks.spawn(services.scheduler.run(cancel.clone()));
    } else {
        info!("trigger scheduler disabled");
    }
    if config.auto_close.enabled {
        tasks.spawn(services.auto_close.run(cancel.clone()));
    } else {
        info!("auto-close sweeper disabled");
    }
    tasks.spawn(purge_kv(services.kv, cancel.clone()));

    if config.server.control_token.is_none() {
        warn!("no control token configured, session control routes will reject every request");
    }
    let server_config = GatewayServerConfig {
        host: config.server.bind_address.clone(),
        port: config.server.port,
    };
    let served = start_server(&server_config, services.gateway, cancel.clone()).await;
    if let Err(e) = &served {
        error!(error = %e, "gateway stopped");
    }

    cancel.cancel();
    let drained = services.buffer.drain().await;
    if drained > 0 {
        info!(drained, "open buffers flushed to the queue");
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "background task panicked");
        }
    }
    match services.queue.pending_count().await {
        Ok(pending) => info!(pending, "parley stopped"),
        Err(e) => warn!(error = %e, "parley stopped, queue depth unknown"),
    }
    served
}

/// Deletes expired rows from the shared KV table until cancelled.
async fn purge_kv(kv: Arc<SqliteKv>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(KV_PURGE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match kv.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "expired kv rows purged"),
                Err(e) => warn!(error = %e, "kv purge failed"),
            },
        }
    }
}

/// Initialize the tracing subscriber with an env filter.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_config::model::StorageConfig;

    fn config(dir: &tempfile::TempDir) -> ParleyConfig {
        ParleyConfig {
            storage: StorageConfig {
                database_path: dir.path().join("parley.db").display().to_string(),
                ..StorageConfig::default()
            },
            ..ParleyConfig::default()
        }
    }

    #[tokio::test]
    async fn services_wire_against_a_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let services = build_services(&config(&dir)).await.unwrap();

        assert_eq!(services.queue.pending_count().await.unwrap(), 0);
        assert!(services.gateway.inboxes.resolve(7).await.unwrap().is_none());
        let report = services.scheduler.reconcile().await.unwrap();
        assert!(report.added.is_empty());
        assert!(services.scheduler.bucket_frequencies().is_empty());
        assert_eq!(services.auto_close.sweep().await.unwrap(), 0);
        assert!(services.pool.process_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let services = build_services(&config(&dir)).await.unwrap();
        let cancel = CancellationToken::new();
        let purge = tokio::spawn(purge_kv(services.kv.clone(), cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), purge)
            .await
            .unwrap()
            .unwrap();
    }
}
