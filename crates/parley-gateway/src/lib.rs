// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP surface of Parley.
//!
//! Accepts conversation platform webhooks, exposes operator session control
//! behind a bearer token, and reports health with the durable queue depth.

pub mod auth;
pub mod handlers;
pub mod normalize;
pub mod server;

pub use auth::AuthConfig;
pub use normalize::{InboundMessage, PlatformEvent, Rejection, parse_event};
pub use server::{GatewayState, HealthState, ServerConfig, router, start_server};
