// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed task store.
//!
//! Work selection relies on `SELECT ... FOR UPDATE SKIP LOCKED`: two open
//! transactions never receive the same row, and a busy claimant never stalls
//! another one.

mod class_c_session;
mod completion;
mod fragmentation_session;
mod multicast_setup;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{CompletionOracle, TaskRepository};
use crate::bookkeeping::{AttemptOutcome, apply_outcome};
use crate::config::StoreConfig;
use crate::error::{ProvisioningError, Result};
use crate::records::{RemoteMulticastClassCSession, RemoteMulticastSetup};
use crate::types::{DesiredState, DevEui};

/// Name of the partial unique index guarding device-local slots.
const ACTIVE_SLOT_INDEX: &str = "idx_remote_multicast_setup_active_slot";

/// PostgreSQL-backed task store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    transaction_timeout: Duration,
    lock_timeout: Duration,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool_size", &self.pool.size())
            .field("transaction_timeout", &self.transaction_timeout)
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

impl PostgresStore {
    /// Wrap an existing pool with default timeouts (30s idle transaction, 5s lock wait).
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            transaction_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
        }
    }

    /// Open a pool as described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;

        Ok(Self {
            pool,
            transaction_timeout: config.transaction_timeout,
            lock_timeout: config.lock_timeout,
        })
    }

    /// Override transaction and lock timeouts.
    pub fn with_timeouts(mut self, transaction_timeout: Duration, lock_timeout: Duration) -> Self {
        self.transaction_timeout = transaction_timeout;
        self.lock_timeout = lock_timeout;
        self
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a bounded-lifetime transaction.
    ///
    /// The server aborts the transaction if it sits idle longer than the
    /// configured transaction timeout, which releases any claimed rows.
    pub async fn begin(&self) -> Result<ProvisioningTx> {
        let mut tx = self.pool.begin().await?;

        // SET LOCAL does not accept bind parameters; both values are integers.
        sqlx::query(&format!(
            "SET LOCAL idle_in_transaction_session_timeout = {}",
            self.transaction_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = {}",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(ProvisioningTx { tx })
    }

    /// Create a task in its own transaction.
    pub async fn create<T: TaskRepository>(&self, task: &mut T) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        T::create(&mut conn, task).await
    }

    /// Read a task without locking it.
    pub async fn get<T: TaskRepository>(&self, key: &T::Key) -> Result<T> {
        let mut conn = self.pool.acquire().await?;
        T::get(&mut conn, key, false).await
    }

    /// Delete a task in its own transaction.
    pub async fn delete<T: TaskRepository>(&self, key: &T::Key) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        T::delete(&mut conn, key).await
    }

    /// Unprovisioned tasks of kind `T` whose retry budget is spent.
    pub async fn list_exhausted<T: TaskRepository>(
        &self,
        max_retry_count: i32,
        limit: i64,
    ) -> Result<Vec<T>> {
        let mut conn = self.pool.acquire().await?;
        T::list_exhausted(&mut conn, max_retry_count, limit).await
    }
}

#[async_trait]
impl CompletionOracle for PostgresStore {
    async fn devices_with_multicast_setup(&self, multicast_group_id: Uuid) -> Result<Vec<DevEui>> {
        completion::devices_with_multicast_setup(&self.pool, multicast_group_id).await
    }

    async fn devices_with_fragmentation_session_setup(
        &self,
        multicast_group_id: Uuid,
        frag_index: i16,
    ) -> Result<Vec<DevEui>> {
        completion::devices_with_fragmentation_session_setup(
            &self.pool,
            multicast_group_id,
            frag_index,
        )
        .await
    }

    async fn devices_with_class_c_session_setup(
        &self,
        multicast_group_id: Uuid,
    ) -> Result<Vec<DevEui>> {
        completion::devices_with_class_c_session_setup(&self.pool, multicast_group_id).await
    }
}

/// One claim-and-update transaction.
///
/// Rows returned by [`ProvisioningTx::select_pending`] stay exclusively locked
/// until [`commit`](ProvisioningTx::commit) or
/// [`rollback`](ProvisioningTx::rollback). Dropping the value rolls back.
pub struct ProvisioningTx {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for ProvisioningTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningTx").finish_non_exhaustive()
    }
}

impl ProvisioningTx {
    /// Connection bound to this transaction, for ad-hoc queries.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Claim up to `limit` eligible tasks of kind `T`.
    pub async fn select_pending<T: TaskRepository>(
        &mut self,
        limit: i64,
        max_retry_count: i32,
    ) -> Result<Vec<T>> {
        let items = T::select_pending(&mut self.tx, limit, max_retry_count).await?;
        debug!(
            kind = %T::KIND,
            count = items.len(),
            limit,
            max_retry_count,
            "Claimed pending tasks"
        );
        Ok(items)
    }

    /// Insert a task.
    pub async fn create<T: TaskRepository>(&mut self, task: &mut T) -> Result<()> {
        T::create(&mut self.tx, task).await
    }

    /// Fetch a task, optionally locking it for the rest of the transaction.
    pub async fn get<T: TaskRepository>(&mut self, key: &T::Key, for_update: bool) -> Result<T> {
        T::get(&mut self.tx, key, for_update).await
    }

    /// Overwrite a task.
    pub async fn update<T: TaskRepository>(&mut self, task: &mut T) -> Result<()> {
        T::update(&mut self.tx, task).await
    }

    /// Delete a task.
    pub async fn delete<T: TaskRepository>(&mut self, key: &T::Key) -> Result<()> {
        T::delete(&mut self.tx, key).await
    }

    /// Apply an attempt outcome to a claimed task and persist it.
    pub async fn record_outcome<T: TaskRepository>(
        &mut self,
        task: &mut T,
        outcome: &AttemptOutcome,
    ) -> Result<()> {
        apply_outcome(task, outcome);
        T::update(&mut self.tx, task).await
    }

    /// Look up a multicast setup by its device-local slot.
    pub async fn get_multicast_setup_by_slot(
        &mut self,
        dev_eui: DevEui,
        mc_group_id: i16,
        state: DesiredState,
        for_update: bool,
    ) -> Result<RemoteMulticastSetup> {
        multicast_setup::get_by_slot(&mut self.tx, dev_eui, mc_group_id, state, for_update).await
    }

    /// Look up a Class-C session by its device-local slot.
    pub async fn get_class_c_session_by_slot(
        &mut self,
        dev_eui: DevEui,
        mc_group_id: i16,
        for_update: bool,
    ) -> Result<RemoteMulticastClassCSession> {
        class_c_session::get_by_slot(&mut self.tx, dev_eui, mc_group_id, for_update).await
    }

    /// Commit, releasing all claimed rows.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Roll back, releasing all claimed rows unchanged.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ============================================================================
// Shared column helpers
// ============================================================================

fn lock_clause(for_update: bool) -> &'static str {
    if for_update { " FOR UPDATE" } else { "" }
}

fn to_interval(field: &'static str, duration: Duration) -> Result<PgInterval> {
    PgInterval::try_from(duration).map_err(|e| {
        ProvisioningError::validation(field, format!("cannot store {:?}: {}", duration, e))
    })
}

/// Months are counted as 30 days; the store only ever writes microseconds.
fn from_interval(interval: PgInterval) -> Duration {
    const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;
    let micros = interval
        .microseconds
        .saturating_add(i64::from(interval.days).saturating_mul(MICROS_PER_DAY))
        .saturating_add(i64::from(interval.months).saturating_mul(30 * MICROS_PER_DAY));
    Duration::from_micros(micros.max(0) as u64)
}

fn dev_eui_column(row: &PgRow) -> Result<DevEui> {
    let bytes: Vec<u8> = row.try_get("dev_eui")?;
    DevEui::from_column("dev_eui", &bytes)
}

fn state_column(row: &PgRow) -> Result<DesiredState> {
    let state: String = row.try_get("state")?;
    state.parse()
}

fn u32_column(row: &PgRow, field: &'static str) -> Result<u32> {
    let value: i64 = row.try_get(field)?;
    u32::try_from(value).map_err(|_| {
        ProvisioningError::validation(field, format!("stored value {} is out of range", value))
    })
}

fn is_unique_violation(err: &sqlx::Error) -> Option<Option<String>> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Some(db.constraint().map(str::to_string))
        }
        _ => None,
    }
}

fn not_found(entity: &'static str, key: impl ToString) -> ProvisioningError {
    ProvisioningError::NotFound {
        entity,
        key: key.to_string(),
    }
}
