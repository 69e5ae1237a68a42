// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Completion oracle tests.

mod common;

use std::collections::BTreeSet;

use common::*;
use fuota_provisioning::{CompletionOracle, DesiredState, DevEui};
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
async fn test_devices_with_multicast_setup() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let group = Uuid::new_v4();
    let (joined, pending, left) = (unique_dev_eui(), unique_dev_eui(), unique_dev_eui());

    let mut t = multicast_setup(joined, group, 0, DesiredState::Setup);
    t.provisioned = true;
    ctx.store.create(&mut t).await.unwrap();

    let mut t = multicast_setup(pending, group, 0, DesiredState::Setup);
    ctx.store.create(&mut t).await.unwrap();

    let mut t = multicast_setup(left, group, 0, DesiredState::Delete);
    t.provisioned = true;
    ctx.store.create(&mut t).await.unwrap();

    // Same device, different group.
    let mut t = multicast_setup(pending, Uuid::new_v4(), 1, DesiredState::Setup);
    t.provisioned = true;
    ctx.store.create(&mut t).await.unwrap();

    let devices = ctx.store.devices_with_multicast_setup(group).await.unwrap();
    assert_eq!(devices, vec![joined]);

    assert!(
        ctx.store
            .devices_with_multicast_setup(Uuid::new_v4())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_fragmentation_completion_is_an_intersection() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let group = Uuid::new_v4();
    let both = unique_dev_eui();
    let only_group = unique_dev_eui();
    let only_session = unique_dev_eui();
    let wrong_index = unique_dev_eui();

    for dev in [both, only_group, wrong_index] {
        let mut t = multicast_setup(dev, group, 0, DesiredState::Setup);
        t.provisioned = true;
        ctx.store.create(&mut t).await.unwrap();
    }
    let mut t = multicast_setup(only_session, group, 0, DesiredState::Setup);
    ctx.store.create(&mut t).await.unwrap();

    for (dev, index) in [(both, 1), (only_session, 1), (wrong_index, 2)] {
        let mut f = fragmentation_session(dev, index, vec![0]);
        f.provisioned = true;
        ctx.store.create(&mut f).await.unwrap();
    }
    let mut f = fragmentation_session(only_group, 1, vec![0]);
    ctx.store.create(&mut f).await.unwrap();

    let ready = ctx
        .store
        .devices_with_fragmentation_session_setup(group, 1)
        .await
        .unwrap();
    assert_eq!(ready, vec![both]);

    // Exactly the intersection of the two axes.
    let with_group: BTreeSet<DevEui> = ctx
        .store
        .devices_with_multicast_setup(group)
        .await
        .unwrap()
        .into_iter()
        .collect();
    let with_session: BTreeSet<DevEui> = [both, only_session].into_iter().collect();
    let expected: Vec<DevEui> = with_group.intersection(&with_session).copied().collect();
    assert_eq!(ready, expected);
}

#[tokio::test]
async fn test_deleted_fragmentation_session_is_not_ready() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let group = Uuid::new_v4();
    let dev = unique_dev_eui();

    let mut t = multicast_setup(dev, group, 0, DesiredState::Setup);
    t.provisioned = true;
    ctx.store.create(&mut t).await.unwrap();

    // Session at index 1 was removed from the device and the removal acknowledged.
    let mut f = fragmentation_session(dev, 1, vec![0]);
    f.state = DesiredState::Delete;
    f.provisioned = true;
    ctx.store.create(&mut f).await.unwrap();

    assert!(
        ctx.store
            .devices_with_fragmentation_session_setup(group, 1)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        ctx.store.devices_with_multicast_setup(group).await.unwrap(),
        vec![dev]
    );
}

#[tokio::test]
async fn test_completion_results_are_sorted() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let group = Uuid::new_v4();
    let mut devices: Vec<DevEui> = (0..5).map(|_| unique_dev_eui()).collect();
    for dev in &devices {
        let mut t = multicast_setup(*dev, group, 3, DesiredState::Setup);
        t.provisioned = true;
        ctx.store.create(&mut t).await.unwrap();
    }
    devices.sort();

    let found = ctx.store.devices_with_multicast_setup(group).await.unwrap();
    assert_eq!(found, devices);
}

#[tokio::test]
async fn test_devices_with_class_c_session_setup() {
    skip_if_no_db!();
    let ctx = TestContext::new().await.expect("Failed to create test context");

    let group = Uuid::new_v4();
    let (done, waiting) = (unique_dev_eui(), unique_dev_eui());

    let mut s = class_c_session(done, group, 0);
    s.provisioned = true;
    ctx.store.create(&mut s).await.unwrap();
    let mut s = class_c_session(waiting, group, 0);
    ctx.store.create(&mut s).await.unwrap();

    let devices = ctx
        .store
        .devices_with_class_c_session_setup(group)
        .await
        .unwrap();
    assert_eq!(devices, vec![done]);
}
