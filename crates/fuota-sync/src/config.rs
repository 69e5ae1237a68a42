// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sync worker configuration loading from environment variables.

use std::time::Duration;

use fuota_provisioning::config::millis_var;
use fuota_provisioning::{ConfigError, TaskKind};

use crate::backoff::BackoffPolicy;

/// Configuration for one sync worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWorkerConfig {
    /// Whether the worker runs at all.
    pub enabled: bool,
    /// Pause between sync cycles.
    pub poll_interval: Duration,
    /// Attempts per task before it is left for operators.
    pub max_retries: i32,
    /// Maximum tasks claimed per cycle.
    pub batch_size: i64,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(1),
            max_retries: 3,
            batch_size: 100,
        }
    }
}

impl SyncWorkerConfig {
    /// Load the worker for `kind` from environment variables.
    ///
    /// Environment variables, with `<KIND>` one of `MULTICAST_SETUP`,
    /// `FRAGMENTATION_SESSION`, `CLASS_C_SESSION`:
    /// - `FUOTA_<KIND>_SYNC_ENABLED`: "false" or "0" to disable (default: true)
    /// - `FUOTA_<KIND>_SYNC_INTERVAL_MS`: milliseconds between cycles (default: 1000)
    /// - `FUOTA_<KIND>_SYNC_RETRIES`: attempts per task (default: 3)
    /// - `FUOTA_<KIND>_SYNC_BATCH_SIZE`: tasks per cycle (default: 100)
    pub fn from_env(kind: TaskKind) -> Result<Self, ConfigError> {
        let vars = EnvNames::for_kind(kind);

        let enabled = std::env::var(vars.enabled)
            .map(|v| !(v == "false" || v == "0"))
            .unwrap_or(true);

        let poll_interval = millis_var(vars.interval, 1_000)?;

        let max_retries: i32 = std::env::var(vars.retries)
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .ok()
            .filter(|n| *n >= 0)
            .ok_or(ConfigError::Invalid(
                vars.retries,
                "must be a non-negative integer",
            ))?;

        let batch_size: i64 = std::env::var(vars.batch_size)
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                vars.batch_size,
                "must be a positive integer",
            ))?;

        Ok(Self {
            enabled,
            poll_interval,
            max_retries,
            batch_size,
        })
    }
}

struct EnvNames {
    enabled: &'static str,
    interval: &'static str,
    retries: &'static str,
    batch_size: &'static str,
}

impl EnvNames {
    fn for_kind(kind: TaskKind) -> Self {
        match kind {
            TaskKind::MulticastSetup => Self {
                enabled: "FUOTA_MULTICAST_SETUP_SYNC_ENABLED",
                interval: "FUOTA_MULTICAST_SETUP_SYNC_INTERVAL_MS",
                retries: "FUOTA_MULTICAST_SETUP_SYNC_RETRIES",
                batch_size: "FUOTA_MULTICAST_SETUP_SYNC_BATCH_SIZE",
            },
            TaskKind::FragmentationSession => Self {
                enabled: "FUOTA_FRAGMENTATION_SESSION_SYNC_ENABLED",
                interval: "FUOTA_FRAGMENTATION_SESSION_SYNC_INTERVAL_MS",
                retries: "FUOTA_FRAGMENTATION_SESSION_SYNC_RETRIES",
                batch_size: "FUOTA_FRAGMENTATION_SESSION_SYNC_BATCH_SIZE",
            },
            TaskKind::ClassCSession => Self {
                enabled: "FUOTA_CLASS_C_SESSION_SYNC_ENABLED",
                interval: "FUOTA_CLASS_C_SESSION_SYNC_INTERVAL_MS",
                retries: "FUOTA_CLASS_C_SESSION_SYNC_RETRIES",
                batch_size: "FUOTA_CLASS_C_SESSION_SYNC_BATCH_SIZE",
            },
        }
    }
}

/// Configuration for all sync workers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncConfig {
    /// Multicast-setup worker.
    pub multicast_setup: SyncWorkerConfig,
    /// Fragmentation-session worker.
    pub fragmentation_session: SyncWorkerConfig,
    /// Class-C session worker.
    pub class_c_session: SyncWorkerConfig,
    /// Retry interval growth shared by all workers.
    pub backoff: BackoffPolicy,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Besides the per-worker variables of [`SyncWorkerConfig::from_env`]:
    /// - `FUOTA_BACKOFF_FACTOR`: interval growth factor, at least 1.0 (default: 1.0)
    /// - `FUOTA_BACKOFF_MAX_MS`: interval cap in milliseconds (default: 3600000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let factor: f64 = std::env::var("FUOTA_BACKOFF_FACTOR")
            .unwrap_or_else(|_| "1.0".to_string())
            .parse()
            .ok()
            .filter(|f: &f64| f.is_finite() && *f >= 1.0)
            .ok_or(ConfigError::Invalid(
                "FUOTA_BACKOFF_FACTOR",
                "must be a finite number >= 1.0",
            ))?;

        let max = millis_var("FUOTA_BACKOFF_MAX_MS", 3_600_000)?;

        Ok(Self {
            multicast_setup: SyncWorkerConfig::from_env(TaskKind::MulticastSetup)?,
            fragmentation_session: SyncWorkerConfig::from_env(TaskKind::FragmentationSession)?,
            class_c_session: SyncWorkerConfig::from_env(TaskKind::ClassCSession)?,
            backoff: BackoffPolicy { factor, max },
        })
    }

    /// Worker configuration for `kind`.
    pub fn worker(&self, kind: TaskKind) -> &SyncWorkerConfig {
        match kind {
            TaskKind::MulticastSetup => &self.multicast_setup,
            TaskKind::FragmentationSession => &self.fragmentation_session,
            TaskKind::ClassCSession => &self.class_c_session,
        }
    }
}
