// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fuota-sync.

use fuota_provisioning::{ConfigError, DevEui, ProvisioningError};
use thiserror::Error;

use crate::downlink::{CommandError, DownlinkError};

/// Sync errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Task store operation failed.
    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database operation failed outside the task store.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Downlink collaborator refused a command.
    #[error("Downlink error: {0}")]
    Downlink(#[from] DownlinkError),

    /// A stored task could not be turned into a command.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// The device answered with error flags set.
    #[error("Device {dev_eui} rejected {command}: {reason}")]
    DeviceRejected {
        /// Answering device.
        dev_eui: DevEui,
        /// Answer name.
        command: &'static str,
        /// Error flags that were set.
        reason: String,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the error is a missing task row.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Provisioning(ProvisioningError::NotFound { .. })
        )
    }
}

/// Result type using sync Error.
pub type Result<T> = std::result::Result<T, Error>;
