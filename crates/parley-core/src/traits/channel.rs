// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound messaging channel client.

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::types::{InboxContext, OutboundContent, ProviderMessageId};

/// Delivers bot output to the end user.
#[async_trait]
pub trait MessagingChannel: Send + Sync + 'static {
    async fn send(
        &self,
        inbox: &InboxContext,
        to: &str,
        content: &OutboundContent,
    ) -> Result<ProviderMessageId, ParleyError>;
}
