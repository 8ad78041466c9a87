// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP clients for the three external collaborators.
//!
//! Each client maps Parley's request and response types to one JSON call.
//! Retries belong to the durable queue, so a failed call is returned as is.

mod bot;
mod channel;
mod platform;

pub use bot::HttpBotEngine;
pub use channel::HttpChannel;
pub use platform::HttpPlatform;

use std::time::Duration;

use parley_core::ParleyError;
use serde::de::DeserializeOwned;

/// Builds the shared reqwest client with a per-request timeout.
fn build_client(timeout_secs: u64) -> Result<reqwest::Client, ParleyError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| ParleyError::Config(format!("failed to build HTTP client: {e}")))
}

/// A non-success response, with whatever body the server sent.
struct Rejected {
    status: reqwest::StatusCode,
    body: String,
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.body.is_empty() {
            write!(f, "API returned {}", self.status)
        } else {
            write!(f, "API returned {}: {}", self.status, self.body)
        }
    }
}

/// Reads a JSON body from a successful response, or the rejection otherwise.
async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Result<T, Rejected>, reqwest::Error> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Ok(Err(Rejected { status, body }));
    }
    response.json::<T>().await.map(Ok)
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
