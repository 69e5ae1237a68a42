// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `remote_multicast_setup` rows.

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use tracing::info;

use super::{
    ACTIVE_SLOT_INDEX, dev_eui_column, from_interval, is_unique_violation, lock_clause,
    not_found, state_column, to_interval, u32_column,
};
use crate::error::{ProvisioningError, Result};
use crate::persistence::TaskRepository;
use crate::records::{MulticastGroupKey, ProvisioningTask, RemoteMulticastSetup, RetryState};
use crate::types::{Aes128Key, DesiredState, DevAddr, DevEui};

const ENTITY: &str = "remote_multicast_setup";

const COLUMNS: &str = r#"
    dev_eui, multicast_group_id, created_at, updated_at, mc_group_id, mc_addr,
    mc_key_encrypted, min_mc_f_cnt, max_mc_f_cnt, state, state_provisioned,
    retry_after, retry_count, retry_interval
"#;

fn from_row(row: &PgRow) -> Result<RemoteMulticastSetup> {
    let mc_addr: Vec<u8> = row.try_get("mc_addr")?;
    let mc_key: Vec<u8> = row.try_get("mc_key_encrypted")?;

    Ok(RemoteMulticastSetup {
        dev_eui: dev_eui_column(row)?,
        multicast_group_id: row.try_get("multicast_group_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        mc_group_id: row.try_get("mc_group_id")?,
        mc_addr: DevAddr::from_column("mc_addr", &mc_addr)?,
        mc_key_encrypted: Aes128Key::from_column("mc_key_encrypted", &mc_key)?,
        min_mc_f_cnt: u32_column(row, "min_mc_f_cnt")?,
        max_mc_f_cnt: u32_column(row, "max_mc_f_cnt")?,
        state: state_column(row)?,
        provisioned: row.try_get("state_provisioned")?,
        retry: RetryState {
            retry_count: row.try_get("retry_count")?,
            retry_after: row.try_get("retry_after")?,
            retry_interval: from_interval(row.try_get("retry_interval")?),
        },
    })
}

fn write_error(err: sqlx::Error, task: &RemoteMulticastSetup) -> ProvisioningError {
    match is_unique_violation(&err) {
        Some(Some(constraint)) if constraint == ACTIVE_SLOT_INDEX => ProvisioningError::SlotInUse {
            dev_eui: task.dev_eui,
            mc_group_id: task.mc_group_id,
        },
        Some(_) => ProvisioningError::AlreadyExists {
            entity: ENTITY,
            key: task.key().to_string(),
        },
        None => err.into(),
    }
}

#[async_trait]
impl TaskRepository for RemoteMulticastSetup {
    async fn create(conn: &mut PgConnection, task: &mut Self) -> Result<()> {
        task.validate()?;
        let now = Utc::now().trunc_subsecs(6);
        task.created_at = now;
        task.updated_at = now;

        let sql = format!(
            r#"
            INSERT INTO remote_multicast_setup ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#
        );
        sqlx::query(&sql)
            .bind(task.dev_eui.as_bytes().as_slice())
            .bind(task.multicast_group_id)
            .bind(task.created_at)
            .bind(task.updated_at)
            .bind(task.mc_group_id)
            .bind(task.mc_addr.as_bytes().as_slice())
            .bind(task.mc_key_encrypted.as_bytes().as_slice())
            .bind(i64::from(task.min_mc_f_cnt))
            .bind(i64::from(task.max_mc_f_cnt))
            .bind(task.state.as_str())
            .bind(task.provisioned)
            .bind(task.retry.retry_after)
            .bind(task.retry.retry_count)
            .bind(to_interval("retry_interval", task.retry.retry_interval)?)
            .execute(&mut *conn)
            .await
            .map_err(|e| write_error(e, task))?;

        info!(
            dev_eui = %task.dev_eui,
            multicast_group_id = %task.multicast_group_id,
            mc_group_id = task.mc_group_id,
            state = %task.state,
            "Remote multicast-setup created"
        );
        Ok(())
    }

    async fn get(conn: &mut PgConnection, key: &MulticastGroupKey, for_update: bool) -> Result<Self> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM remote_multicast_setup
            WHERE dev_eui = $1 AND multicast_group_id = $2{}
            "#,
            lock_clause(for_update)
        );
        let row = sqlx::query(&sql)
            .bind(key.dev_eui.as_bytes().as_slice())
            .bind(key.multicast_group_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| not_found(ENTITY, key))?;

        from_row(&row)
    }

    async fn update(conn: &mut PgConnection, task: &mut Self) -> Result<()> {
        task.validate()?;
        let updated_at = Utc::now().trunc_subsecs(6);

        let result = sqlx::query(
            r#"
            UPDATE remote_multicast_setup
            SET updated_at = $3,
                mc_group_id = $4,
                mc_addr = $5,
                mc_key_encrypted = $6,
                min_mc_f_cnt = $7,
                max_mc_f_cnt = $8,
                state = $9,
                state_provisioned = $10,
                retry_after = $11,
                retry_count = $12,
                retry_interval = $13
            WHERE dev_eui = $1 AND multicast_group_id = $2
            "#,
        )
        .bind(task.dev_eui.as_bytes().as_slice())
        .bind(task.multicast_group_id)
        .bind(updated_at)
        .bind(task.mc_group_id)
        .bind(task.mc_addr.as_bytes().as_slice())
        .bind(task.mc_key_encrypted.as_bytes().as_slice())
        .bind(i64::from(task.min_mc_f_cnt))
        .bind(i64::from(task.max_mc_f_cnt))
        .bind(task.state.as_str())
        .bind(task.provisioned)
        .bind(task.retry.retry_after)
        .bind(task.retry.retry_count)
        .bind(to_interval("retry_interval", task.retry.retry_interval)?)
        .execute(&mut *conn)
        .await
        .map_err(|e| write_error(e, task))?;

        if result.rows_affected() == 0 {
            return Err(not_found(ENTITY, task.key()));
        }
        task.updated_at = updated_at;

        info!(
            dev_eui = %task.dev_eui,
            multicast_group_id = %task.multicast_group_id,
            provisioned = task.provisioned,
            retry_count = task.retry.retry_count,
            "Remote multicast-setup updated"
        );
        Ok(())
    }

    async fn delete(conn: &mut PgConnection, key: &MulticastGroupKey) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM remote_multicast_setup
            WHERE dev_eui = $1 AND multicast_group_id = $2
            "#,
        )
        .bind(key.dev_eui.as_bytes().as_slice())
        .bind(key.multicast_group_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(ENTITY, key));
        }

        info!(
            dev_eui = %key.dev_eui,
            multicast_group_id = %key.multicast_group_id,
            "Remote multicast-setup deleted"
        );
        Ok(())
    }

    async fn select_pending(
        conn: &mut PgConnection,
        limit: i64,
        max_retry_count: i32,
    ) -> Result<Vec<Self>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM remote_multicast_setup
            WHERE state_provisioned = FALSE
              AND retry_count < $1
              AND retry_after < NOW()
            ORDER BY retry_after
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(max_retry_count)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(from_row).collect()
    }

    async fn list_exhausted(
        conn: &mut PgConnection,
        max_retry_count: i32,
        limit: i64,
    ) -> Result<Vec<Self>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM remote_multicast_setup
            WHERE state_provisioned = FALSE
              AND retry_count >= $1
            ORDER BY updated_at
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(max_retry_count)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(from_row).collect()
    }
}

/// Look up the row occupying a device-local slot in the given desired state.
///
/// Several `DELETE` rows may share a slot; the most recently written wins.
pub(super) async fn get_by_slot(
    conn: &mut PgConnection,
    dev_eui: DevEui,
    mc_group_id: i16,
    state: DesiredState,
    for_update: bool,
) -> Result<RemoteMulticastSetup> {
    let sql = format!(
        r#"
        SELECT {COLUMNS}
        FROM remote_multicast_setup
        WHERE dev_eui = $1 AND mc_group_id = $2 AND state = $3
        ORDER BY updated_at DESC
        LIMIT 1{}
        "#,
        lock_clause(for_update)
    );
    let row = sqlx::query(&sql)
        .bind(dev_eui.as_bytes().as_slice())
        .bind(mc_group_id)
        .bind(state.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| not_found(ENTITY, format!("{}/slot {} ({})", dev_eui, mc_group_id, state)))?;

    from_row(&row)
}
