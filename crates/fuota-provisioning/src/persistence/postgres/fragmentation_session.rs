// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `remote_fragmentation_session` rows.

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use tracing::info;

use super::{
    dev_eui_column, from_interval, is_unique_violation, lock_clause, not_found, state_column,
    to_interval,
};
use crate::error::{ProvisioningError, Result};
use crate::persistence::TaskRepository;
use crate::records::{
    FragmentationParams, FragmentationSessionKey, ProvisioningTask, RemoteFragmentationSession,
    RetryState,
};

const ENTITY: &str = "remote_fragmentation_session";

const COLUMNS: &str = r#"
    fs.dev_eui, fs.frag_index, fs.created_at, fs.updated_at, fs.mc_group_ids, fs.nb_frag,
    fs.frag_size, fs.fragmentation_matrix, fs.block_ack_delay, fs.padding, fs.descriptor,
    fs.state, fs.state_provisioned, fs.retry_after, fs.retry_count, fs.retry_interval
"#;

fn fixed_column<const N: usize>(row: &PgRow, field: &'static str) -> Result<[u8; N]> {
    let bytes: Vec<u8> = row.try_get(field)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ProvisioningError::Malformed {
            field,
            expected: N,
            actual: bytes.len(),
        })
}

fn from_row(row: &PgRow) -> Result<RemoteFragmentationSession> {
    let [fragmentation_matrix] = fixed_column::<1>(row, "fragmentation_matrix")?;
    let descriptor = fixed_column::<4>(row, "descriptor")?;

    Ok(RemoteFragmentationSession {
        dev_eui: dev_eui_column(row)?,
        frag_index: row.try_get("frag_index")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        mc_group_ids: row.try_get("mc_group_ids")?,
        params: FragmentationParams {
            nb_frag: row.try_get("nb_frag")?,
            frag_size: row.try_get("frag_size")?,
            fragmentation_matrix,
            block_ack_delay: row.try_get("block_ack_delay")?,
            padding: row.try_get("padding")?,
            descriptor,
        },
        state: state_column(row)?,
        provisioned: row.try_get("state_provisioned")?,
        retry: RetryState {
            retry_count: row.try_get("retry_count")?,
            retry_after: row.try_get("retry_after")?,
            retry_interval: from_interval(row.try_get("retry_interval")?),
        },
    })
}

#[async_trait]
impl TaskRepository for RemoteFragmentationSession {
    async fn create(conn: &mut PgConnection, task: &mut Self) -> Result<()> {
        task.validate()?;
        let now = Utc::now().trunc_subsecs(6);
        task.created_at = now;
        task.updated_at = now;

        sqlx::query(
            r#"
            INSERT INTO remote_fragmentation_session (
                dev_eui, frag_index, created_at, updated_at, mc_group_ids, nb_frag,
                frag_size, fragmentation_matrix, block_ack_delay, padding, descriptor,
                state, state_provisioned, retry_after, retry_count, retry_interval
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(task.dev_eui.as_bytes().as_slice())
        .bind(task.frag_index)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(&task.mc_group_ids)
        .bind(task.params.nb_frag)
        .bind(task.params.frag_size)
        .bind([task.params.fragmentation_matrix].as_slice())
        .bind(task.params.block_ack_delay)
        .bind(task.params.padding)
        .bind(task.params.descriptor.as_slice())
        .bind(task.state.as_str())
        .bind(task.provisioned)
        .bind(task.retry.retry_after)
        .bind(task.retry.retry_count)
        .bind(to_interval("retry_interval", task.retry.retry_interval)?)
        .execute(&mut *conn)
        .await
        .map_err(|e| match is_unique_violation(&e) {
            Some(_) => ProvisioningError::AlreadyExists {
                entity: ENTITY,
                key: task.key().to_string(),
            },
            None => e.into(),
        })?;

        info!(
            dev_eui = %task.dev_eui,
            frag_index = task.frag_index,
            mc_group_ids = ?task.mc_group_ids,
            state = %task.state,
            "Remote fragmentation-session created"
        );
        Ok(())
    }

    async fn get(
        conn: &mut PgConnection,
        key: &FragmentationSessionKey,
        for_update: bool,
    ) -> Result<Self> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM remote_fragmentation_session fs
            WHERE fs.dev_eui = $1 AND fs.frag_index = $2{}
            "#,
            lock_clause(for_update)
        );
        let row = sqlx::query(&sql)
            .bind(key.dev_eui.as_bytes().as_slice())
            .bind(key.frag_index)
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
            UPDATE remote_fragmentation_session
            SET updated_at = $3,
                mc_group_ids = $4,
                nb_frag = $5,
                frag_size = $6,
                fragmentation_matrix = $7,
                block_ack_delay = $8,
                padding = $9,
                descriptor = $10,
                state = $11,
                state_provisioned = $12,
                retry_after = $13,
                retry_count = $14,
                retry_interval = $15
            WHERE dev_eui = $1 AND frag_index = $2
            "#,
        )
        .bind(task.dev_eui.as_bytes().as_slice())
        .bind(task.frag_index)
        .bind(updated_at)
        .bind(&task.mc_group_ids)
        .bind(task.params.nb_frag)
        .bind(task.params.frag_size)
        .bind([task.params.fragmentation_matrix].as_slice())
        .bind(task.params.block_ack_delay)
        .bind(task.params.padding)
        .bind(task.params.descriptor.as_slice())
        .bind(task.state.as_str())
        .bind(task.provisioned)
        .bind(task.retry.retry_after)
        .bind(task.retry.retry_count)
        .bind(to_interval("retry_interval", task.retry.retry_interval)?)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(ENTITY, task.key()));
        }
        task.updated_at = updated_at;

        info!(
            dev_eui = %task.dev_eui,
            frag_index = task.frag_index,
            provisioned = task.provisioned,
            retry_count = task.retry.retry_count,
            "Remote fragmentation-session updated"
        );
        Ok(())
    }

    async fn delete(conn: &mut PgConnection, key: &FragmentationSessionKey) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM remote_fragmentation_session
            WHERE dev_eui = $1 AND frag_index = $2
            "#,
        )
        .bind(key.dev_eui.as_bytes().as_slice())
        .bind(key.frag_index)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(ENTITY, key));
        }

        info!(
            dev_eui = %key.dev_eui,
            frag_index = key.frag_index,
            "Remote fragmentation-session deleted"
        );
        Ok(())
    }

    /// Unicast sessions (empty slot list) are always ready. Multicast-bound
    /// sessions wait until at least one referenced slot on the same device
    /// has a provisioned multicast setup.
    async fn select_pending(
        conn: &mut PgConnection,
        limit: i64,
        max_retry_count: i32,
    ) -> Result<Vec<Self>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM remote_fragmentation_session fs
            WHERE fs.state_provisioned = FALSE
              AND fs.retry_count < $1
              AND fs.retry_after < NOW()
              AND (
                  cardinality(fs.mc_group_ids) = 0
                  OR EXISTS (
                      SELECT 1
                      FROM remote_multicast_setup ms
                      WHERE ms.dev_eui = fs.dev_eui
                        AND ms.state_provisioned = TRUE
                        AND ms.mc_group_id = ANY(fs.mc_group_ids)
                  )
              )
            ORDER BY fs.retry_after
            LIMIT $2
            FOR UPDATE OF fs SKIP LOCKED
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
            FROM remote_fragmentation_session fs
            WHERE fs.state_provisioned = FALSE
              AND fs.retry_count >= $1
            ORDER BY fs.updated_at
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
