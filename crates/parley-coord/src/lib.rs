// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-replica coordination primitives for Parley.
//!
//! Everything here is built on the shared [`KvStore`](parley_core::KvStore):
//! - [`LockService`]: token-owned locks with retry, jitter and auto-extension.
//! - [`DedupService`]: processed-message markers that fail open.
//! - [`BufferService`]: debounced per-thread message buffers flushed to the queue.
//! - [`MemoryKv`]: an in-process store for single-replica runs and tests.

pub mod buffer;
pub mod dedup;
pub mod lock;
pub mod memory;

pub use buffer::{BufferEntry, BufferOutcome, BufferService, BufferedMessage, buffer_key};
pub use dedup::{DedupService, processed_key};
pub use lock::{LockService, LockToken, job_creation_key, job_processing_key};
pub use memory::MemoryKv;
