// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Parley.
//!
//! Provides deterministic mocks for the three external collaborators, an
//! in-memory queue, a hand-driven clock and a harness that wires them over
//! a temp SQLite database.
//!
//! # Components
//!
//! - [`MockBotEngine`] - scripted bot engine with call capture
//! - [`MockChannel`] - outbound channel that records sends
//! - [`MockPlatform`] - conversation platform with settable snapshots
//! - [`MemoryQueue`] - in-memory job queue
//! - [`ManualClock`] - clock moved by hand
//! - [`TestHarness`] - everything above, plus the coordination services

pub mod clock;
pub mod harness;
pub mod memory_queue;
pub mod mock_bot;
pub mod mock_channel;
pub mod mock_platform;

pub use clock::ManualClock;
pub use harness::{PLATFORM_ACCOUNT_ID, TENANT_ID, TestHarness, test_inbox};
pub use memory_queue::MemoryQueue;
pub use mock_bot::{BotCall, MockBotEngine};
pub use mock_channel::{MockChannel, SentMessage};
pub use mock_platform::{MockPlatform, PostedNote};
