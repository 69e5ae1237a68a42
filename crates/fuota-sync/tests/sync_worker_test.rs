// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sync worker tests.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use fuota_provisioning::{
    DesiredState, FragmentationSessionKey, MulticastGroupKey, RemoteFragmentationSession,
    RemoteMulticastClassCSession, RemoteMulticastSetup,
};
use fuota_sync::{BackoffPolicy, DeviceAnswer, DownlinkCommand, SyncWorkerConfig};
use uuid::Uuid;

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

#[tokio::test]
async fn test_sync_once_enqueues_and_accounts_attempt() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let dev = unique_dev_eui();
    let group = Uuid::new_v4();
    let mut task = multicast_setup(dev, group, 1, DesiredState::Setup);
    ctx.store.create(&mut task).await.unwrap();

    let worker = ctx.worker::<RemoteMulticastSetup>(fast_config(), BackoffPolicy::default());
    let before = Utc::now();
    assert_eq!(worker.sync_once().await.unwrap(), 1);

    let sent = ctx.enqueuer.sent_to(dev).await;
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        sent[0],
        DownlinkCommand::McGroupSetupReq { mc_group_id: 1, .. }
    ));

    let key = MulticastGroupKey {
        dev_eui: dev,
        multicast_group_id: group,
    };
    let stored: RemoteMulticastSetup = ctx.store.get(&key).await.unwrap();
    assert_eq!(stored.retry.retry_count, 1);
    assert!(!stored.provisioned);
    assert!(stored.retry.retry_after >= before + chrono::Duration::seconds(29));
    assert_eq!(stored.retry.retry_interval, RETRY_INTERVAL);

    // Backing off: nothing to do until retry_after passes.
    assert_eq!(worker.sync_once().await.unwrap(), 0);
    assert_eq!(ctx.enqueuer.sent_to(dev).await.len(), 1);
}

#[tokio::test]
async fn test_delete_state_sends_delete_command() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let dev = unique_dev_eui();
    let mut task = multicast_setup(dev, Uuid::new_v4(), 3, DesiredState::Delete);
    ctx.store.create(&mut task).await.unwrap();

    let worker = ctx.worker::<RemoteMulticastSetup>(fast_config(), BackoffPolicy::default());
    worker.sync_once().await.unwrap();

    assert_eq!(
        ctx.enqueuer.sent_to(dev).await,
        vec![DownlinkCommand::McGroupDeleteReq { mc_group_id: 3 }]
    );
}

#[tokio::test]
async fn test_enqueue_failure_does_not_abort_batch() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let group = Uuid::new_v4();
    let (good, bad) = (unique_dev_eui(), unique_dev_eui());
    for dev in [good, bad] {
        let mut task = multicast_setup(dev, group, 0, DesiredState::Setup);
        ctx.store.create(&mut task).await.unwrap();
    }
    ctx.enqueuer.fail_for(bad).await;

    let worker = ctx.worker::<RemoteMulticastSetup>(fast_config(), BackoffPolicy::default());
    assert_eq!(worker.sync_once().await.unwrap(), 2);

    assert_eq!(ctx.enqueuer.sent_to(good).await.len(), 1);
    assert!(ctx.enqueuer.sent_to(bad).await.is_empty());

    for dev in [good, bad] {
        let key = MulticastGroupKey {
            dev_eui: dev,
            multicast_group_id: group,
        };
        let stored: RemoteMulticastSetup = ctx.store.get(&key).await.unwrap();
        assert_eq!(stored.retry.retry_count, 1, "device {} should be rescheduled", dev);
    }
}

#[tokio::test]
async fn test_retry_budget_is_exhausted() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let dev = unique_dev_eui();
    let mut task = multicast_setup(dev, Uuid::new_v4(), 0, DesiredState::Setup);
    ctx.store.create(&mut task).await.unwrap();

    let config = SyncWorkerConfig {
        max_retries: 2,
        ..fast_config()
    };
    let worker = ctx.worker::<RemoteMulticastSetup>(config, BackoffPolicy::default());

    for _ in 0..2 {
        assert_eq!(worker.sync_once().await.unwrap(), 1);
        ctx.make_due("remote_multicast_setup", dev).await;
    }
    assert_eq!(worker.sync_once().await.unwrap(), 0);
    assert_eq!(ctx.enqueuer.sent_to(dev).await.len(), 2);

    let exhausted: Vec<RemoteMulticastSetup> = ctx.store.list_exhausted(2, 10).await.unwrap();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].dev_eui, dev);
}

#[tokio::test]
async fn test_backoff_grows_stored_interval() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let dev = unique_dev_eui();
    let group = Uuid::new_v4();
    let mut task = multicast_setup(dev, group, 0, DesiredState::Setup);
    ctx.store.create(&mut task).await.unwrap();

    let backoff = BackoffPolicy {
        factor: 2.0,
        max: Duration::from_secs(100),
    };
    let worker = ctx.worker::<RemoteMulticastSetup>(fast_config(), backoff);
    let key = MulticastGroupKey {
        dev_eui: dev,
        multicast_group_id: group,
    };

    let mut intervals = Vec::new();
    for _ in 0..3 {
        let before = Utc::now();
        worker.sync_once().await.unwrap();
        let stored: RemoteMulticastSetup = ctx.store.get(&key).await.unwrap();
        // retry_after uses the interval in force before the attempt.
        let previous = intervals.last().copied().unwrap_or(RETRY_INTERVAL);
        assert!(
            stored.retry.retry_after
                >= before + chrono::Duration::from_std(previous).unwrap()
                    - chrono::Duration::seconds(1)
        );
        intervals.push(stored.retry.retry_interval);
        ctx.make_due("remote_multicast_setup", dev).await;
    }

    assert_eq!(
        intervals,
        vec![
            Duration::from_secs(60),
            Duration::from_secs(100),
            Duration::from_secs(100)
        ]
    );
}

#[tokio::test]
async fn test_fragmentation_waits_for_group_setup() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let dev = unique_dev_eui();
    let mut setup = multicast_setup(dev, Uuid::new_v4(), 2, DesiredState::Setup);
    ctx.store.create(&mut setup).await.unwrap();
    let mut session = fragmentation_session(dev, 1, vec![2], DesiredState::Setup);
    ctx.store.create(&mut session).await.unwrap();

    let worker =
        ctx.worker::<RemoteFragmentationSession>(fast_config(), BackoffPolicy::default());
    assert_eq!(worker.sync_once().await.unwrap(), 0);

    ctx.answers()
        .handle(
            dev,
            &DeviceAnswer::McGroupSetupAns {
                mc_group_id: 2,
                id_error: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(worker.sync_once().await.unwrap(), 1);
    let sent = ctx.enqueuer.sent_to(dev).await;
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        sent[0],
        DownlinkCommand::FragSessionSetupReq {
            frag_index: 1,
            mc_group_bit_mask: 0b0100,
            nb_frag: 20,
            ..
        }
    ));

    let key = FragmentationSessionKey {
        dev_eui: dev,
        frag_index: 1,
    };
    let stored: RemoteFragmentationSession = ctx.store.get(&key).await.unwrap();
    assert_eq!(stored.retry.retry_count, 1);
}

#[tokio::test]
async fn test_class_c_waits_for_group_setup() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let dev = unique_dev_eui();
    let group = Uuid::new_v4();
    let mut setup = multicast_setup(dev, group, 0, DesiredState::Setup);
    ctx.store.create(&mut setup).await.unwrap();
    let mut session = class_c_session(dev, group, 0);
    ctx.store.create(&mut session).await.unwrap();

    let worker =
        ctx.worker::<RemoteMulticastClassCSession>(fast_config(), BackoffPolicy::default());
    assert_eq!(worker.sync_once().await.unwrap(), 0);

    ctx.answers()
        .handle(
            dev,
            &DeviceAnswer::McGroupSetupAns {
                mc_group_id: 0,
                id_error: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(worker.sync_once().await.unwrap(), 1);
    assert!(matches!(
        ctx.enqueuer.sent_to(dev).await[..],
        [DownlinkCommand::McClassCSessionReq {
            mc_group_id: 0,
            session_time_out: 8,
            dl_frequency: 869_525_000,
            dr: 3,
            ..
        }]
    ));
}

#[tokio::test]
async fn test_run_loop_syncs_and_stops() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let dev = unique_dev_eui();
    let mut task = multicast_setup(dev, Uuid::new_v4(), 0, DesiredState::Setup);
    ctx.store.create(&mut task).await.unwrap();

    let worker = ctx.worker::<RemoteMulticastSetup>(fast_config(), BackoffPolicy::default());
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    let enqueuer = ctx.enqueuer.clone();
    let synced = eventually(Duration::from_secs(5), || {
        let enqueuer = enqueuer.clone();
        async move { !enqueuer.sent_to(dev).await.is_empty() }
    })
    .await;
    assert!(synced, "worker should enqueue the pending task");

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop after shutdown")
        .unwrap();

    // Backing off for 30s, so exactly one attempt was made.
    assert_eq!(ctx.enqueuer.sent_to(dev).await.len(), 1);
}

#[tokio::test]
async fn test_disabled_worker_returns_immediately() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let dev = unique_dev_eui();
    let mut task = multicast_setup(dev, Uuid::new_v4(), 0, DesiredState::Setup);
    ctx.store.create(&mut task).await.unwrap();

    let config = SyncWorkerConfig {
        enabled: false,
        ..fast_config()
    };
    let worker = ctx.worker::<RemoteMulticastSetup>(config, BackoffPolicy::default());

    tokio::time::timeout(Duration::from_secs(1), worker.run())
        .await
        .expect("disabled worker should return");
    assert!(ctx.enqueuer.sent().await.is_empty());
}
