// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FUOTA Sync - Reconciliation Driver for fuota-provisioning
//!
//! Drives provisioning tasks to completion: sync workers claim pending tasks,
//! queue the matching command for each device, and account every attempt;
//! the answer handler marks tasks provisioned when devices acknowledge.
//!
//! # Reconciliation Loop
//!
//! ```text
//!   ┌──────────────┐  claim (SKIP LOCKED)   ┌──────────────────────┐
//!   │  SyncWorker  │ ─────────────────────► │  fuota-provisioning  │
//!   │  (per kind)  │ ◄── retry accounting ─ │  task store          │
//!   └──────────────┘                        └──────────────────────┘
//!          │ DownlinkCommand                          ▲
//!          ▼                                          │ Acknowledged
//!   ┌──────────────────┐     uplink answer    ┌───────────────┐
//!   │ DownlinkEnqueuer │ ──► device ────────► │ AnswerHandler │
//!   └──────────────────┘                      └───────────────┘
//! ```
//!
//! Every attempt counts against the task's retry budget. Only an answer
//! without error flags sets `provisioned`.
//!
//! # Configuration
//!
//! Per kind (`MULTICAST_SETUP`, `FRAGMENTATION_SESSION`, `CLASS_C_SESSION`):
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `FUOTA_<KIND>_SYNC_ENABLED` | true | Run this worker |
//! | `FUOTA_<KIND>_SYNC_INTERVAL_MS` | 1000 | Pause between cycles |
//! | `FUOTA_<KIND>_SYNC_RETRIES` | 3 | Attempts per task |
//! | `FUOTA_<KIND>_SYNC_BATCH_SIZE` | 100 | Tasks per cycle |
//!
//! Shared: `FUOTA_BACKOFF_FACTOR` (default 1.0) and `FUOTA_BACKOFF_MAX_MS`
//! (default 3600000).

#![deny(missing_docs)]

/// Device answer handling.
pub mod answers;

/// Retry interval growth.
pub mod backoff;

/// Worker configuration loaded from environment variables.
pub mod config;

/// Downlink commands and the queue collaborator.
pub mod downlink;

/// Error types.
pub mod error;

/// Embeddable runtime running all sync workers.
pub mod runtime;

/// Per-kind sync worker.
pub mod worker;

pub use answers::{AnswerHandler, DeviceAnswer};
pub use backoff::BackoffPolicy;
pub use config::{SyncConfig, SyncWorkerConfig};
pub use downlink::{
    CommandError, DownlinkCommand, DownlinkEnqueuer, DownlinkError, RecordingEnqueuer,
    ToDownlinkCommand,
};
pub use error::{Error, Result};
pub use runtime::{SyncRuntime, SyncRuntimeBuilder, SyncRuntimeConfig};
pub use worker::SyncWorker;
