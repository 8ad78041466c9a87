// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator trait definitions.
//!
//! Every seam where Parley talks to shared infrastructure or an external
//! service is a trait here, so services can be constructed against SQLite
//! and HTTP backends in production and against in-memory mocks in tests.
//! All async traits use `#[async_trait]` for dynamic dispatch.

pub mod bot;
pub mod channel;
pub mod clock;
pub mod kv;
pub mod platform;
pub mod queue;

pub use bot::BotEngine;
pub use channel::MessagingChannel;
pub use clock::{Clock, MonotonicClock, SystemClock};
pub use kv::KvStore;
pub use platform::ConversationPlatform;
pub use queue::JobQueue;
