// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and the PostgreSQL backend.
//!
//! Every task kind implements [`TaskRepository`]. Its operations take an
//! explicit connection so they run either on a pooled connection or inside a
//! [`ProvisioningTx`]. Claiming (`select_pending`) only locks rows for the
//! lifetime of the surrounding transaction, so claim and update must share it.

pub mod postgres;

pub use self::postgres::{PostgresStore, ProvisioningTx};

use async_trait::async_trait;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::Result;
use crate::records::ProvisioningTask;
use crate::types::DevEui;

/// Store operations for one task kind.
#[async_trait]
pub trait TaskRepository: ProvisioningTask + Sized + Send + Sync {
    /// Insert a new task. Fails with `AlreadyExists` on a duplicate key.
    ///
    /// Sets `created_at` and `updated_at`.
    async fn create(conn: &mut PgConnection, task: &mut Self) -> Result<()>;

    /// Fetch a task. With `for_update` the row stays locked until the
    /// surrounding transaction ends.
    async fn get(conn: &mut PgConnection, key: &Self::Key, for_update: bool) -> Result<Self>;

    /// Overwrite a task's mutable columns. Fails with `NotFound` when no row matched.
    async fn update(conn: &mut PgConnection, task: &mut Self) -> Result<()>;

    /// Remove a task. A second delete of the same key fails with `NotFound`.
    async fn delete(conn: &mut PgConnection, key: &Self::Key) -> Result<()>;

    /// Claim up to `limit` eligible tasks.
    ///
    /// Eligible means not provisioned, `retry_count < max_retry_count`,
    /// `retry_after` in the past and, for dependent kinds, the multicast setup
    /// they rely on already provisioned. Rows locked by another transaction are
    /// skipped, never waited on.
    async fn select_pending(
        conn: &mut PgConnection,
        limit: i64,
        max_retry_count: i32,
    ) -> Result<Vec<Self>>;

    /// Unprovisioned tasks whose retry budget is spent.
    async fn list_exhausted(
        conn: &mut PgConnection,
        max_retry_count: i32,
        limit: i64,
    ) -> Result<Vec<Self>>;
}

/// Read-side queries used to sequence a rollout.
///
/// Plain reads under read-committed isolation; results are advisory.
#[async_trait]
pub trait CompletionOracle: Send + Sync {
    /// Devices with a provisioned `SETUP` multicast setup for the group.
    async fn devices_with_multicast_setup(&self, multicast_group_id: Uuid) -> Result<Vec<DevEui>>;

    /// Devices with a provisioned multicast setup for the group **and** a
    /// provisioned fragmentation session at `frag_index`.
    async fn devices_with_fragmentation_session_setup(
        &self,
        multicast_group_id: Uuid,
        frag_index: i16,
    ) -> Result<Vec<DevEui>>;

    /// Devices with a provisioned Class-C session for the group.
    async fn devices_with_class_c_session_setup(
        &self,
        multicast_group_id: Uuid,
    ) -> Result<Vec<DevEui>>;
}
