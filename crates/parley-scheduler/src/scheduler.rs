// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Frequency-bucketed idle-trigger scheduler.
//!
//! Active triggers are grouped by check frequency. Each bucket owns one
//! periodic task; on every tick it walks the active sessions of the inboxes
//! linked to its triggers, fetches each conversation's upstream state once
//! and evaluates every trigger of the bucket against it. A periodic
//! reconciliation pass re-reads the trigger table and adds, updates or
//! cancels buckets.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parley_config::model::SchedulerConfig;
use parley_core::types::{InboxContext, LastTrigger, SessionRecord, TriggerRecord};
use parley_core::{BotEngine, Clock, ConversationPlatform, ParleyError};
use parley_session::SessionStore;
use parley_storage::Database;
use parley_storage::queries::tenants;
use parley_storage::queries::triggers::{self, ExecutionKey};
use parley_worker::OutboundSender;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::evaluate::should_trigger;
use crate::ledger::TriggerLedger;

/// Changes applied by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<u32>,
    pub updated: Vec<u32>,
    pub removed: Vec<u32>,
}

/// Work done by one bucket tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sessions_checked: usize,
    pub fired: usize,
    /// Firings lost to another replica or an earlier tick.
    pub already_claimed: usize,
    pub failed: usize,
}

struct Bucket {
    triggers: Vec<TriggerRecord>,
    cancel: CancellationToken,
}

/// Services the scheduler is built from.
pub struct SchedulerDeps {
    pub db: Database,
    pub sessions: Arc<SessionStore>,
    pub bot: Arc<dyn BotEngine>,
    pub platform: Arc<dyn ConversationPlatform>,
    pub outbound: OutboundSender,
    pub clock: Arc<dyn Clock>,
}

struct Inner {
    db: Database,
    sessions: Arc<SessionStore>,
    bot: Arc<dyn BotEngine>,
    platform: Arc<dyn ConversationPlatform>,
    outbound: OutboundSender,
    clock: Arc<dyn Clock>,
    ledger: TriggerLedger,
    audit_notes: bool,
    resync_interval: Duration,
    buckets: DashMap<u32, Bucket>,
    root: CancellationToken,
}

#[derive(Clone)]
pub struct TriggerScheduler {
    inner: Arc<Inner>,
}

impl TriggerScheduler {
    pub fn new(deps: SchedulerDeps, config: &SchedulerConfig) -> Self {
        let ledger = TriggerLedger::new(deps.db.clone(), config);
        Self {
            inner: Arc::new(Inner {
                db: deps.db,
                sessions: deps.sessions,
                bot: deps.bot,
                platform: deps.platform,
                outbound: deps.outbound,
                clock: deps.clock,
                ledger,
                audit_notes: config.audit_notes,
                resync_interval: Duration::from_secs(config.resync_interval_secs.max(1)),
                buckets: DashMap::new(),
                root: CancellationToken::new(),
            }),
        }
    }

    pub fn ledger(&self) -> &TriggerLedger {
        &self.inner.ledger
    }

    /// Frequencies (in minutes) that currently have a running bucket.
    pub fn bucket_frequencies(&self) -> Vec<u32> {
        let mut frequencies: Vec<u32> = self.inner.buckets.iter().map(|b| *b.key()).collect();
        frequencies.sort_unstable();
        frequencies
    }

    /// Runs reconciliation immediately and then every resync interval until
    /// `cancel` fires. Cancelling also stops every bucket task.
    pub async fn run(self, cancel: CancellationToken) {
        let mut resync = tokio::time::interval(self.inner.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("trigger scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = resync.tick() => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "trigger reconciliation failed");
                    }
                }
            }
        }
        self.shutdown();
        info!("trigger scheduler stopped");
    }

    /// Cancels every bucket task.
    pub fn shutdown(&self) {
        self.inner.root.cancel();
        self.inner.buckets.clear();
    }

    /// Brings the bucket registry in line with the active triggers.
    ///
    /// Buckets with no remaining trigger are cancelled, new frequencies get
    /// a task, and existing buckets pick up the new trigger set on their
    /// next tick.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ParleyError> {
        let active = triggers::list_active(&self.inner.db).await?;
        let mut wanted: BTreeMap<u32, Vec<TriggerRecord>> = BTreeMap::new();
        for trigger in active {
            if trigger.inbox_ids.is_empty() {
                continue;
            }
            wanted
                .entry(trigger.check_frequency_minutes.max(1))
                .or_default()
                .push(trigger);
        }

        let mut report = ReconcileReport::default();
        let stale: Vec<u32> = self
            .inner
            .buckets
            .iter()
            .map(|b| *b.key())
            .filter(|f| !wanted.contains_key(f))
            .collect();
        for frequency in stale {
            if let Some((_, bucket)) = self.inner.buckets.remove(&frequency) {
                bucket.cancel.cancel();
                report.removed.push(frequency);
            }
        }

        for (frequency, list) in wanted {
            if let Some(mut bucket) = self.inner.buckets.get_mut(&frequency) {
                if bucket.triggers != list {
                    bucket.triggers = list;
                    report.updated.push(frequency);
                }
                continue;
            }
            let cancel = self.inner.root.child_token();
            self.inner.buckets.insert(
                frequency,
                Bucket {
                    triggers: list,
                    cancel: cancel.clone(),
                },
            );
            tokio::spawn(self.clone().run_bucket(frequency, cancel));
            report.added.push(frequency);
        }

        if report != ReconcileReport::default() {
            info!(
                added = ?report.added,
                updated = ?report.updated,
                removed = ?report.removed,
                "trigger buckets reconciled"
            );
        }
        Ok(report)
    }

    async fn run_bucket(self, frequency: u32, cancel: CancellationToken) {
        let period = Duration::from_secs(60 * u64::from(frequency));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(frequency, "trigger bucket started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_bucket_tick(frequency).await {
                        Ok(report) if report.fired > 0 || report.failed > 0 => {
                            info!(frequency, ?report, "trigger bucket tick");
                        }
                        Ok(_) => {}
                        Err(e) => error!(frequency, error = %e, "trigger bucket tick failed"),
                    }
                }
            }
        }
        debug!(frequency, "trigger bucket stopped");
    }

    /// Evaluates the bucket's triggers against every active session once.
    pub async fn run_bucket_tick(&self, frequency: u32) -> Result<TickReport, ParleyError> {
        let Some(bucket_triggers) = self
            .inner
            .buckets
            .get(&frequency)
            .map(|b| b.triggers.clone())
        else {
            return Ok(TickReport::default());
        };
        let inbox_ids: BTreeSet<i64> = bucket_triggers
            .iter()
            .flat_map(|t| t.inbox_ids.iter().copied())
            .collect();

        let mut report = TickReport::default();
        for inbox_id in inbox_ids {
            let Some(ctx) = tenants::inbox_context(&self.inner.db, inbox_id).await? else {
                debug!(inbox_id, "trigger inbox not configured");
                continue;
            };
            if !ctx.inbox.active {
                continue;
            }
            let Some(account_id) = ctx.platform_account() else {
                warn!(inbox_id, "tenant has no platform credentials, triggers skipped");
                continue;
            };
            let applicable: Vec<&TriggerRecord> = bucket_triggers
                .iter()
                .filter(|t| t.inbox_ids.contains(&inbox_id))
                .collect();

            for session in self.inner.sessions.active_sessions(inbox_id).await? {
                report.sessions_checked += 1;
                self.check_session(&ctx, account_id, &session, &applicable, &mut report)
                    .await;
            }
        }
        Ok(report)
    }

    async fn check_session(
        &self,
        ctx: &InboxContext,
        account_id: i64,
        session: &SessionRecord,
        triggers: &[&TriggerRecord],
        report: &mut TickReport,
    ) {
        let snapshot = match self
            .inner
            .platform
            .get_conversation(ctx, account_id, session.conversation_id)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    conversation_id = session.conversation_id,
                    error = %e,
                    "conversation lookup failed, session skipped this tick"
                );
                return;
            }
        };

        let now = self.inner.clock.now();
        for trigger in triggers {
            if !should_trigger(trigger, &snapshot, now) {
                continue;
            }
            match self.fire(ctx, account_id, session, trigger).await {
                Ok(true) => report.fired += 1,
                Ok(false) => report.already_claimed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        session_id = %session.id,
                        trigger = %trigger.name,
                        error = %e,
                        "trigger firing failed"
                    );
                }
            }
        }
    }

    /// Claims and executes one firing. Returns `false` when the ledger
    /// already holds the tuple.
    async fn fire(
        &self,
        ctx: &InboxContext,
        account_id: i64,
        session: &SessionRecord,
        trigger: &TriggerRecord,
    ) -> Result<bool, ParleyError> {
        let key = ExecutionKey {
            conversation_id: session.conversation_id,
            trigger_id: trigger.id,
            bot_session_id: session.bot_session_id.clone(),
        };
        let now = self.inner.clock.now();
        if !self.inner.ledger.claim(&key, now).await? {
            debug!(
                conversation_id = key.conversation_id,
                trigger = %trigger.name,
                "trigger already claimed"
            );
            return Ok(false);
        }

        let turn = match self
            .inner
            .bot
            .send_command(&session.bot_session_id, &trigger.name)
            .await
        {
            Ok(turn) => turn,
            Err(e) => {
                self.inner
                    .ledger
                    .failed(&key, &e.to_string(), self.inner.clock.now())
                    .await?;
                if matches!(e, ParleyError::BotSessionNotFound { .. }) {
                    self.inner.sessions.expire_stale(session).await?;
                }
                return Err(e);
            }
        };
        self.inner.ledger.succeeded(&key, self.inner.clock.now()).await?;
        info!(
            session_id = %session.id,
            conversation_id = session.conversation_id,
            trigger = %trigger.name,
            "trigger fired"
        );

        let last = LastTrigger {
            trigger_id: trigger.id,
            trigger_name: trigger.name.clone(),
            fired_at: now,
        };
        if let Err(e) = self.inner.sessions.record_trigger(session, &last).await {
            warn!(session_id = %session.id, error = %e, "failed to record last trigger");
        }
        if let Err(e) = self
            .inner
            .outbound
            .deliver(ctx, &session.contact_address, &turn.messages)
            .await
        {
            warn!(session_id = %session.id, error = %e, "trigger replies not delivered");
        }
        if self.inner.audit_notes {
            let note = format!("Parley: trigger \"{}\" fired after inactivity", trigger.name);
            if let Err(e) = self
                .inner
                .platform
                .post_message(ctx, account_id, session.conversation_id, &note, true)
                .await
            {
                warn!(session_id = %session.id, error = %e, "audit note not posted");
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
impl TriggerScheduler {
    /// Registers a bucket without spawning its task, for tick tests.
    pub(crate) fn install_bucket(&self, frequency: u32, triggers: Vec<TriggerRecord>) {
        self.inner.buckets.insert(
            frequency,
            Bucket {
                triggers,
                cancel: self.inner.root.child_token(),
            },
        );
    }
}
