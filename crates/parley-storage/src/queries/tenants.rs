// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tenant and inbox lookups.
//!
//! Rows are maintained by the admin surface; this crate only needs upserts
//! for seeding and the read paths used while processing work.

use parley_core::ParleyError;
use parley_core::types::{InboxConfig, InboxContext, TenantConfig};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};

fn row_to_context(row: &Row<'_>) -> rusqlite::Result<InboxContext> {
    Ok(InboxContext {
        inbox: InboxConfig {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            bot_id: row.get(3)?,
            channel_sender_id: row.get(4)?,
            buffer_enabled: row.get(5)?,
            auto_close_hours: row.get(6)?,
            active: row.get(7)?,
        },
        tenant: TenantConfig {
            id: row.get(1)?,
            name: row.get(8)?,
            platform_account_id: row.get(9)?,
            platform_api_token: row.get(10)?,
            channel_api_token: row.get(11)?,
        },
    })
}

const CONTEXT_SELECT: &str = "SELECT i.id, i.tenant_id, i.name, i.bot_id, i.channel_sender_id, \
     i.buffer_enabled, i.auto_close_hours, i.active, t.name, t.platform_account_id, \
     t.platform_api_token, t.channel_api_token \
     FROM inboxes i JOIN tenants t ON t.id = i.tenant_id";

pub async fn upsert_tenant(db: &Database, tenant: &TenantConfig) -> Result<(), ParleyError> {
    let tenant = tenant.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO tenants (id, name, platform_account_id, platform_api_token, channel_api_token)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    platform_account_id = excluded.platform_account_id,
                    platform_api_token = excluded.platform_api_token,
                    channel_api_token = excluded.channel_api_token",
                params![
                    tenant.id,
                    tenant.name,
                    tenant.platform_account_id,
                    tenant.platform_api_token,
                    tenant.channel_api_token
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn upsert_inbox(db: &Database, inbox: &InboxConfig) -> Result<(), ParleyError> {
    let inbox = inbox.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO inboxes
                    (id, tenant_id, name, bot_id, channel_sender_id, buffer_enabled, auto_close_hours, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    tenant_id = excluded.tenant_id,
                    name = excluded.name,
                    bot_id = excluded.bot_id,
                    channel_sender_id = excluded.channel_sender_id,
                    buffer_enabled = excluded.buffer_enabled,
                    auto_close_hours = excluded.auto_close_hours,
                    active = excluded.active",
                params![
                    inbox.id,
                    inbox.tenant_id,
                    inbox.name,
                    inbox.bot_id,
                    inbox.channel_sender_id,
                    inbox.buffer_enabled,
                    inbox.auto_close_hours,
                    inbox.active
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Resolves an inbox and its tenant. Inactive inboxes are returned too; callers decide.
pub async fn inbox_context(db: &Database, inbox_id: i64) -> Result<Option<InboxContext>, ParleyError> {
    db.connection()
        .call(move |conn| -> Result<Option<InboxContext>, rusqlite::Error> {
            conn.query_row(
                &format!("{CONTEXT_SELECT} WHERE i.id = ?1"),
                params![inbox_id],
                row_to_context,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Active inboxes with an auto-close window configured.
pub async fn auto_close_inboxes(db: &Database) -> Result<Vec<InboxContext>, ParleyError> {
    db.connection()
        .call(move |conn| -> Result<Vec<InboxContext>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "{CONTEXT_SELECT} WHERE i.active = 1 AND i.auto_close_hours IS NOT NULL ORDER BY i.id"
            ))?;
            let rows = stmt.query_map([], row_to_context)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
