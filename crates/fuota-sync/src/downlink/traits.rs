// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Downlink collaborator trait and its errors.

use async_trait::async_trait;
use fuota_provisioning::DevEui;
use thiserror::Error;

use super::command::DownlinkCommand;

/// Errors reported by a downlink collaborator.
#[derive(Debug, Error)]
pub enum DownlinkError {
    /// The downlink queue could not be reached.
    #[error("Downlink queue unavailable: {0}")]
    Unavailable(String),

    /// The queue refused the command for this device.
    #[error("Downlink for {dev_eui} rejected: {reason}")]
    Rejected {
        /// Target device.
        dev_eui: DevEui,
        /// Reason given by the queue.
        reason: String,
    },
}

/// Places commands in a device's downlink queue.
///
/// Implementations encode the command for its application port and enqueue
/// it unconfirmed. The call returns once the command is queued, not when it
/// reaches the device.
#[async_trait]
pub trait DownlinkEnqueuer: Send + Sync {
    /// Queue `command` for `dev_eui`.
    async fn enqueue(
        &self,
        dev_eui: DevEui,
        command: &DownlinkCommand,
    ) -> std::result::Result<(), DownlinkError>;
}
