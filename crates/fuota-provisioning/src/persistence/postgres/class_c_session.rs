// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `remote_multicast_class_c_session` rows.

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use tracing::info;

use super::{dev_eui_column, from_interval, is_unique_violation, lock_clause, not_found, to_interval};
use crate::error::{ProvisioningError, Result};
use crate::persistence::TaskRepository;
use crate::records::{
    MulticastGroupKey, ProvisioningTask, RemoteMulticastClassCSession, RetryState,
};
use crate::types::DevEui;

const ENTITY: &str = "remote_multicast_class_c_session";

const COLUMNS: &str = r#"
    sess.dev_eui, sess.multicast_group_id, sess.created_at, sess.updated_at,
    sess.mc_group_id, sess.session_time, sess.session_time_out, sess.dl_frequency,
    sess.dr, sess.state_provisioned, sess.retry_after, sess.retry_count,
    sess.retry_interval
"#;

fn from_row(row: &PgRow) -> Result<RemoteMulticastClassCSession> {
    Ok(RemoteMulticastClassCSession {
        dev_eui: dev_eui_column(row)?,
        multicast_group_id: row.try_get("multicast_group_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        mc_group_id: row.try_get("mc_group_id")?,
        session_time: row.try_get("session_time")?,
        session_time_out: row.try_get("session_time_out")?,
        dl_frequency: row.try_get("dl_frequency")?,
        dr: row.try_get("dr")?,
        provisioned: row.try_get("state_provisioned")?,
        retry: RetryState {
            retry_count: row.try_get("retry_count")?,
            retry_after: row.try_get("retry_after")?,
            retry_interval: from_interval(row.try_get("retry_interval")?),
        },
    })
}

#[async_trait]
impl TaskRepository for RemoteMulticastClassCSession {
    async fn create(conn: &mut PgConnection, task: &mut Self) -> Result<()> {
        task.validate()?;
        let now = Utc::now().trunc_subsecs(6);
        task.created_at = now;
        task.updated_at = now;

        sqlx::query(
            r#"
            INSERT INTO remote_multicast_class_c_session (
                dev_eui, multicast_group_id, created_at, updated_at, mc_group_id,
                session_time, session_time_out, dl_frequency, dr, state_provisioned,
                retry_after, retry_count, retry_interval
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(task.dev_eui.as_bytes().as_slice())
        .bind(task.multicast_group_id)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.mc_group_id)
        .bind(task.session_time)
        .bind(task.session_time_out)
        .bind(task.dl_frequency)
        .bind(task.dr)
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
            multicast_group_id = %task.multicast_group_id,
            mc_group_id = task.mc_group_id,
            session_time = %task.session_time,
            "Remote multicast Class-C session created"
        );
        Ok(())
    }

    async fn get(conn: &mut PgConnection, key: &MulticastGroupKey, for_update: bool) -> Result<Self> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM remote_multicast_class_c_session sess
            WHERE sess.dev_eui = $1 AND sess.multicast_group_id = $2{}
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
            UPDATE remote_multicast_class_c_session
            SET updated_at = $3,
                mc_group_id = $4,
                session_time = $5,
                session_time_out = $6,
                dl_frequency = $7,
                dr = $8,
                state_provisioned = $9,
                retry_after = $10,
                retry_count = $11,
                retry_interval = $12
            WHERE dev_eui = $1 AND multicast_group_id = $2
            "#,
        )
        .bind(task.dev_eui.as_bytes().as_slice())
        .bind(task.multicast_group_id)
        .bind(updated_at)
        .bind(task.mc_group_id)
        .bind(task.session_time)
        .bind(task.session_time_out)
        .bind(task.dl_frequency)
        .bind(task.dr)
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
            multicast_group_id = %task.multicast_group_id,
            provisioned = task.provisioned,
            retry_count = task.retry.retry_count,
            "Remote multicast Class-C session updated"
        );
        Ok(())
    }

    async fn delete(conn: &mut PgConnection, key: &MulticastGroupKey) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM remote_multicast_class_c_session
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
            "Remote multicast Class-C session deleted"
        );
        Ok(())
    }

    /// A session becomes ready once the setup row for the same device, group
    /// and slot is a provisioned `SETUP`.
    async fn select_pending(
        conn: &mut PgConnection,
        limit: i64,
        max_retry_count: i32,
    ) -> Result<Vec<Self>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM remote_multicast_class_c_session sess
            WHERE sess.state_provisioned = FALSE
              AND sess.retry_count < $1
              AND sess.retry_after < NOW()
              AND EXISTS (
                  SELECT 1
                  FROM remote_multicast_setup ms
                  WHERE ms.dev_eui = sess.dev_eui
                    AND ms.multicast_group_id = sess.multicast_group_id
                    AND ms.mc_group_id = sess.mc_group_id
                    AND ms.state = 'SETUP'
                    AND ms.state_provisioned = TRUE
              )
            ORDER BY sess.retry_after
            LIMIT $2
            FOR UPDATE OF sess SKIP LOCKED
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
            FROM remote_multicast_class_c_session sess
            WHERE sess.state_provisioned = FALSE
              AND sess.retry_count >= $1
            ORDER BY sess.updated_at
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

/// Look up a session by device-local slot. An unprovisioned row wins over
/// older provisioned ones that reused the slot.
pub(super) async fn get_by_slot(
    conn: &mut PgConnection,
    dev_eui: DevEui,
    mc_group_id: i16,
    for_update: bool,
) -> Result<RemoteMulticastClassCSession> {
    let sql = format!(
        r#"
        SELECT {COLUMNS}
        FROM remote_multicast_class_c_session sess
        WHERE sess.dev_eui = $1 AND sess.mc_group_id = $2
        ORDER BY sess.state_provisioned, sess.updated_at DESC
        LIMIT 1{}
        "#,
        lock_clause(for_update)
    );
    let row = sqlx::query(&sql)
        .bind(dev_eui.as_bytes().as_slice())
        .bind(mc_group_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| not_found(ENTITY, format!("{}/slot {}", dev_eui, mc_group_id)))?;

    from_row(&row)
}
