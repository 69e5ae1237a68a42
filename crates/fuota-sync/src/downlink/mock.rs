// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recording enqueuer for testing.
//!
//! Keeps every queued command in memory instead of encoding it, and can be
//! told to refuse commands for chosen devices.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use fuota_provisioning::DevEui;
use tokio::sync::Mutex;

use super::command::DownlinkCommand;
use super::traits::{DownlinkEnqueuer, DownlinkError};

/// Enqueuer that records commands.
#[derive(Debug, Clone, Default)]
pub struct RecordingEnqueuer {
    sent: Arc<Mutex<Vec<(DevEui, DownlinkCommand)>>>,
    failing: Arc<Mutex<HashSet<DevEui>>>,
}

impl RecordingEnqueuer {
    /// Create an enqueuer that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse commands for `dev_eui` from now on.
    pub async fn fail_for(&self, dev_eui: DevEui) {
        self.failing.lock().await.insert(dev_eui);
    }

    /// Accept commands for `dev_eui` again.
    pub async fn recover(&self, dev_eui: DevEui) {
        self.failing.lock().await.remove(&dev_eui);
    }

    /// All accepted commands, in enqueue order.
    pub async fn sent(&self) -> Vec<(DevEui, DownlinkCommand)> {
        self.sent.lock().await.clone()
    }

    /// Accepted commands for one device.
    pub async fn sent_to(&self, dev_eui: DevEui) -> Vec<DownlinkCommand> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(dev, _)| *dev == dev_eui)
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Forget recorded commands.
    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait]
impl DownlinkEnqueuer for RecordingEnqueuer {
    async fn enqueue(
        &self,
        dev_eui: DevEui,
        command: &DownlinkCommand,
    ) -> std::result::Result<(), DownlinkError> {
        if self.failing.lock().await.contains(&dev_eui) {
            return Err(DownlinkError::Rejected {
                dev_eui,
                reason: "device queue refused".to_string(),
            });
        }
        self.sent.lock().await.push((dev_eui, command.clone()));
        Ok(())
    }
}
