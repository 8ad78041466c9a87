// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed statement modules. Each function takes `&Database` and runs on its connection thread.

pub mod kv;
pub mod message_log;
pub mod queue;
pub mod sessions;
pub mod tenants;
pub mod triggers;
