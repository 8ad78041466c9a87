// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time-driven work for Parley: idle triggers and auto-close.

pub mod autoclose;
pub mod evaluate;
pub mod ledger;
pub mod scheduler;

pub use autoclose::AutoCloseSweeper;
pub use evaluate::{idle_minutes, should_trigger};
pub use ledger::{TriggerLedger, claim_policy};
pub use scheduler::{ReconcileReport, SchedulerDeps, TickReport, TriggerScheduler};
