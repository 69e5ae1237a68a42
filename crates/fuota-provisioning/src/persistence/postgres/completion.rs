// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Completion queries used to sequence a rollout.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::types::DevEui;

fn decode(rows: Vec<Vec<u8>>) -> Result<Vec<DevEui>> {
    rows.iter()
        .map(|bytes| DevEui::from_column("dev_eui", bytes))
        .collect()
}

/// Devices whose multicast setup for the group is a provisioned `SETUP`.
pub(super) async fn devices_with_multicast_setup(
    pool: &PgPool,
    multicast_group_id: Uuid,
) -> Result<Vec<DevEui>> {
    let rows: Vec<Vec<u8>> = sqlx::query_scalar(
        r#"
        SELECT dev_eui
        FROM remote_multicast_setup
        WHERE multicast_group_id = $1
          AND state = 'SETUP'
          AND state_provisioned = TRUE
        ORDER BY dev_eui
        "#,
    )
    .bind(multicast_group_id)
    .fetch_all(pool)
    .await?;

    decode(rows)
}

/// Devices ready on both axes: provisioned multicast setup for the group and
/// provisioned `SETUP` fragmentation session at `frag_index`.
pub(super) async fn devices_with_fragmentation_session_setup(
    pool: &PgPool,
    multicast_group_id: Uuid,
    frag_index: i16,
) -> Result<Vec<DevEui>> {
    let rows: Vec<Vec<u8>> = sqlx::query_scalar(
        r#"
        SELECT ms.dev_eui
        FROM remote_multicast_setup ms
        INNER JOIN remote_fragmentation_session fs
            ON fs.dev_eui = ms.dev_eui
        WHERE ms.multicast_group_id = $1
          AND ms.state = 'SETUP'
          AND ms.state_provisioned = TRUE
          AND fs.frag_index = $2
          AND fs.state = 'SETUP'
          AND fs.state_provisioned = TRUE
        ORDER BY ms.dev_eui
        "#,
    )
    .bind(multicast_group_id)
    .bind(frag_index)
    .fetch_all(pool)
    .await?;

    decode(rows)
}

/// Devices with a provisioned Class-C session for the group.
pub(super) async fn devices_with_class_c_session_setup(
    pool: &PgPool,
    multicast_group_id: Uuid,
) -> Result<Vec<DevEui>> {
    let rows: Vec<Vec<u8>> = sqlx::query_scalar(
        r#"
        SELECT dev_eui
        FROM remote_multicast_class_c_session
        WHERE multicast_group_id = $1
          AND state_provisioned = TRUE
        ORDER BY dev_eui
        "#,
    )
    .bind(multicast_group_id)
    .fetch_all(pool)
    .await?;

    decode(rows)
}
