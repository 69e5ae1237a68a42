// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store configuration loading from environment variables.

use std::time::Duration;

/// Task store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Maximum pool connections.
    pub max_connections: u32,
    /// Upper bound on how long a claim transaction may sit idle holding row locks.
    pub transaction_timeout: Duration,
    /// Upper bound on waiting for an ordinary row lock.
    pub lock_timeout: Duration,
}

impl StoreConfig {
    /// Configuration with defaults for everything but the URL.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            transaction_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FUOTA_DATABASE_URL`: PostgreSQL connection string
    ///
    /// Optional (with defaults):
    /// - `FUOTA_DB_MAX_CONNECTIONS`: pool size (default: 10)
    /// - `FUOTA_TX_TIMEOUT_MS`: claim transaction idle timeout (default: 30000)
    /// - `FUOTA_LOCK_TIMEOUT_MS`: row lock wait timeout (default: 5000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FUOTA_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("FUOTA_DATABASE_URL"))?;

        let max_connections: u32 = std::env::var("FUOTA_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "FUOTA_DB_MAX_CONNECTIONS",
                "must be a positive integer",
            ))?;

        let transaction_timeout = millis_var("FUOTA_TX_TIMEOUT_MS", 30_000)?;
        let lock_timeout = millis_var("FUOTA_LOCK_TIMEOUT_MS", 5_000)?;

        Ok(Self {
            database_url,
            max_connections,
            transaction_timeout,
            lock_timeout,
        })
    }
}

/// Parse a positive millisecond duration, falling back to `default_ms` when unset.
pub fn millis_var(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(Duration::from_millis(default_ms)),
        Ok(v) => v
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .ok_or(ConfigError::Invalid(name, "must be a positive number of milliseconds")),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
