// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fuota-provisioning.
//!
//! Store errors fall into four families: missing rows, duplicate rows,
//! corrupt fixed-width columns, and transient database failures. The engine
//! never retries any of them itself.

use thiserror::Error;

use crate::types::DevEui;

/// Result type using ProvisioningError.
pub type Result<T> = std::result::Result<T, ProvisioningError>;

/// Errors returned by the task store and the work-selection protocol.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvisioningError {
    /// Get, update or delete against a key that has no row.
    #[error("{entity} '{key}' not found")]
    NotFound {
        /// Table-level name of the task kind.
        entity: &'static str,
        /// Rendered task key.
        key: String,
    },

    /// Create with a key that already has a row.
    #[error("{entity} '{key}' already exists")]
    AlreadyExists {
        /// Table-level name of the task kind.
        entity: &'static str,
        /// Rendered task key.
        key: String,
    },

    /// A device-local multicast slot is already taken by another active setup.
    #[error("multicast slot {mc_group_id} on device {dev_eui} is already in use")]
    SlotInUse {
        /// Device owning the slot.
        dev_eui: DevEui,
        /// Device-local slot index.
        mc_group_id: i16,
    },

    /// A fixed-width column decoded to the wrong length. Indicates corruption.
    #[error("malformed column '{field}': expected {expected} bytes, got {actual}")]
    Malformed {
        /// Column name.
        field: &'static str,
        /// Required length in bytes.
        expected: usize,
        /// Length that was read.
        actual: usize,
    },

    /// A task value is out of range before it reaches the store.
    #[error("validation error for '{field}': {message}")]
    Validation {
        /// Field that failed validation.
        field: &'static str,
        /// Validation error message.
        message: String,
    },

    /// Connectivity, serialization or any other database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ProvisioningError {
    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::SlotInUse { .. } => "SLOT_IN_USE",
            Self::Malformed { .. } => "MALFORMED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Whether a caller may reasonably retry the whole transaction.
    ///
    /// Only database-level failures qualify. Malformed rows stay malformed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }

    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}
