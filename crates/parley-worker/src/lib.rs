// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound message pipeline for Parley.
//!
//! [`IngressService`] admits normalized messages (dedup, job-creation lock,
//! buffer-or-enqueue). [`WorkerPool`] consumes the durable queue and hands
//! each job to the [`IngestionWorker`], which runs the [`MessageHandler`]
//! under the job-processing lock.

pub mod handler;
pub mod inbox;
pub mod ingress;
pub mod outbound;
pub mod pool;
pub mod worker;

pub use handler::{HandleOutcome, MessageHandler};
pub use inbox::InboxDirectory;
pub use ingress::{Admission, IngressService};
pub use outbound::{Delivered, OutboundSender};
pub use pool::{JobResult, WorkerPool};
pub use worker::{IngestionWorker, WorkOutcome};
