// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FUOTA Provisioning - Remote Multicast & Fragmentation-Session Task Engine
//!
//! This crate tracks, per device, the provisioning state of multicast group
//! membership, fragmentation sessions and Class-C receive windows, and lets
//! any number of workers claim outstanding work from one PostgreSQL database
//! without ever handing the same row to two of them.
//!
//! It is a passive library: it owns no tasks and no threads. The
//! reconciliation loop that drives it lives in `fuota-sync`.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐          ┌─────────────────────────────┐
//! │  FUOTA orchestrator   │          │   Sync workers (1..N)       │
//! │  create / delete rows │          │   claim, enqueue, account   │
//! │  poll completion      │          │                             │
//! └───────────────────────┘          └─────────────────────────────┘
//!           │                                      │
//!           ▼                                      ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 fuota-provisioning (This Crate)                 │
//! │  ┌─────────────┐  ┌─────────────────┐  ┌───────────────────┐    │
//! │  │ Task Store  │  │ Work Selection  │  │ Completion Oracle │    │
//! │  │ CRUD        │  │ SKIP LOCKED     │  │ read-only joins   │    │
//! │  └─────────────┘  └─────────────────┘  └───────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//!                       ┌───────────────────────┐
//!                       │      PostgreSQL       │
//!                       └───────────────────────┘
//! ```
//!
//! # Task Kinds
//!
//! | Kind | Key | Ready when |
//! |------|-----|------------|
//! | [`RemoteMulticastSetup`] | (DevEUI, group) | always |
//! | [`RemoteFragmentationSession`] | (DevEUI, frag index) | unicast, or one bound slot's setup is provisioned |
//! | [`RemoteMulticastClassCSession`] | (DevEUI, group) | the group's setup is a provisioned `SETUP` |
//!
//! # Task State Machine
//!
//! ```text
//!                 attempt + fail
//!               ┌────────────────┐
//!               ▼                │
//!   ──► PENDING(retry_count, retry_after) ──attempt + ack──► PROVISIONED
//!               │
//!               │ retry_count >= max_retry_count
//!               ▼
//!          EXHAUSTED  (never selected again; see `list_exhausted`)
//! ```
//!
//! `DELETE` tasks end when the orchestrator removes the acknowledged row.
//!
//! # Claiming Work
//!
//! Claim and update always share one [`ProvisioningTx`]:
//!
//! ```ignore
//! let mut tx = store.begin().await?;
//! let mut items: Vec<RemoteMulticastSetup> = tx.select_pending(100, 3).await?;
//! for item in &mut items {
//!     tx.record_outcome(item, &AttemptOutcome::Failed { retry_after, retry_interval }).await?;
//! }
//! tx.commit().await?;
//! ```
//!
//! # Configuration
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `FUOTA_DATABASE_URL` | required | PostgreSQL connection string |
//! | `FUOTA_DB_MAX_CONNECTIONS` | 10 | Pool size |
//! | `FUOTA_TX_TIMEOUT_MS` | 30000 | Idle limit for claim transactions |
//! | `FUOTA_LOCK_TIMEOUT_MS` | 5000 | Wait limit for ordinary row locks |

#![deny(missing_docs)]

/// Attempt outcomes and retry accounting.
pub mod bookkeeping;

/// Store configuration loaded from environment variables.
pub mod config;

/// Error types with stable error codes.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Repository traits and the PostgreSQL backend.
pub mod persistence;

/// Task records for the three provisioning kinds.
pub mod records;

/// Fixed-width identifiers and shared enums.
pub mod types;

pub use bookkeeping::{AttemptOutcome, TaskPhase, apply_outcome, phase};
pub use config::{ConfigError, StoreConfig};
pub use error::{ProvisioningError, Result};
pub use persistence::{CompletionOracle, PostgresStore, ProvisioningTx, TaskRepository};
pub use records::{
    FragmentationParams, FragmentationSessionKey, MulticastGroupKey, ProvisioningTask,
    RemoteFragmentationSession, RemoteMulticastClassCSession, RemoteMulticastSetup, RetryState,
};
pub use types::{Aes128Key, DesiredState, DevAddr, DevEui, TaskKind};
