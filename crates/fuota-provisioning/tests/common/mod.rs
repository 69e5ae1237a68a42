// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for fuota-provisioning integration tests.
//!
//! Provides TestContext for connecting to the test database and building tasks.

#![allow(dead_code)]

use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use fuota_provisioning::{
    Aes128Key, DesiredState, DevAddr, DevEui, FragmentationParams, FragmentationSessionKey,
    MulticastGroupKey, PostgresStore, RemoteFragmentationSession, RemoteMulticastClassCSession,
    RemoteMulticastSetup, migrations,
};

/// Work selection scans whole tables, so database tests run one at a time.
static DB_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub const RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Test context holding an empty task store.
pub struct TestContext {
    pub pool: PgPool,
    pub store: PostgresStore,
    _guard: MutexGuard<'static, ()>,
}

impl TestContext {
    /// Connect to TEST_DATABASE_URL, run migrations and empty the task tables.
    pub async fn new() -> Option<Self> {
        init_test_logging();
        let guard = DB_LOCK.lock().await;

        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&database_url).await.ok()?;
        migrations::run_postgres(&pool).await.ok()?;

        let ctx = Self {
            store: PostgresStore::new(pool.clone())
                .with_timeouts(Duration::from_secs(10), Duration::from_secs(2)),
            pool,
            _guard: guard,
        };
        ctx.cleanup().await;
        Some(ctx)
    }

    /// Delete every task row.
    pub async fn cleanup(&self) {
        for table in [
            "remote_multicast_class_c_session",
            "remote_fragmentation_session",
            "remote_multicast_setup",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&self.pool)
                .await
                .ok();
        }
    }

    /// Move `retry_after` of every row of `dev_eui` in `table` into the past.
    pub async fn make_due(&self, table: &str, dev_eui: DevEui) {
        sqlx::query(&format!(
            "UPDATE {} SET retry_after = NOW() - INTERVAL '1 second' WHERE dev_eui = $1",
            table
        ))
        .bind(dev_eui.as_bytes().as_slice())
        .execute(&self.pool)
        .await
        .expect("Failed to backdate retry_after");
    }

    /// Overwrite a raw column with arbitrary bytes.
    pub async fn corrupt_column(&self, table: &str, column: &str, dev_eui: DevEui, bytes: &[u8]) {
        sqlx::query(&format!(
            "UPDATE {} SET {} = $2 WHERE dev_eui = $1",
            table, column
        ))
        .bind(dev_eui.as_bytes().as_slice())
        .bind(bytes)
        .execute(&self.pool)
        .await
        .expect("Failed to corrupt column");
    }
}

/// Initialize test logging. Later calls are no-ops.
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fuota_provisioning=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}

/// A device EUI no other test uses.
pub fn unique_dev_eui() -> DevEui {
    let id = Uuid::new_v4();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&id.as_bytes()[..8]);
    DevEui::from(bytes)
}

/// Pending multicast setup, due immediately.
pub fn multicast_setup(
    dev_eui: DevEui,
    multicast_group_id: Uuid,
    slot: i16,
    state: DesiredState,
) -> RemoteMulticastSetup {
    let mut task = RemoteMulticastSetup::new(
        MulticastGroupKey {
            dev_eui,
            multicast_group_id,
        },
        slot,
        DevAddr::from([0x01, 0x02, 0x03, 0x04]),
        Aes128Key::from([0xab; 16]),
        state,
        RETRY_INTERVAL,
    );
    task.retry.retry_after = Utc::now() - chrono::Duration::seconds(1);
    task
}

/// Pending fragmentation session, due immediately.
pub fn fragmentation_session(
    dev_eui: DevEui,
    frag_index: i16,
    mc_group_ids: Vec<i16>,
) -> RemoteFragmentationSession {
    let params = FragmentationParams::for_payload(1_000, 50, 1, 2, [0xde, 0xad, 0xbe, 0xef])
        .expect("valid fragmentation params");
    let mut task = RemoteFragmentationSession::new(
        FragmentationSessionKey {
            dev_eui,
            frag_index,
        },
        mc_group_ids,
        params,
        DesiredState::Setup,
        RETRY_INTERVAL,
    );
    task.retry.retry_after = Utc::now() - chrono::Duration::seconds(1);
    task
}

/// Pending Class-C session, due immediately.
pub fn class_c_session(
    dev_eui: DevEui,
    multicast_group_id: Uuid,
    slot: i16,
) -> RemoteMulticastClassCSession {
    let mut task = RemoteMulticastClassCSession::new(
        MulticastGroupKey {
            dev_eui,
            multicast_group_id,
        },
        slot,
        Utc::now() + chrono::Duration::minutes(10),
        8,
        869_525_000,
        3,
        RETRY_INTERVAL,
    );
    task.retry.retry_after = Utc::now() - chrono::Duration::seconds(1);
    task
}
