// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry accounting applied after a delivery attempt.
//!
//! The engine does not compute backoff. Callers hand in the next
//! `retry_after` and `retry_interval`, and this module only records them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::ProvisioningTask;

/// Result of one delivery attempt, as reported by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The device acknowledged the desired state.
    Acknowledged,
    /// Delivery failed or no answer arrived in time.
    Failed {
        /// Earliest instant the task may be selected again.
        retry_after: DateTime<Utc>,
        /// Interval the caller's policy used to derive `retry_after`.
        retry_interval: Duration,
    },
}

/// Where a task stands with respect to a retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Eligible for selection now.
    Ready,
    /// Pending, but backing off until `retry_after`.
    BackingOff,
    /// Acknowledged by the device.
    Provisioned,
    /// Retry budget spent. Never selected again; operators must intervene.
    Exhausted,
}

/// Record an attempt outcome on a task.
///
/// Acknowledgement leaves the retry fields untouched as a historical record.
pub fn apply_outcome<T: ProvisioningTask>(task: &mut T, outcome: &AttemptOutcome) {
    match outcome {
        AttemptOutcome::Acknowledged => task.mark_provisioned(),
        AttemptOutcome::Failed {
            retry_after,
            retry_interval,
        } => {
            let retry = task.retry_mut();
            retry.retry_count = retry.retry_count.saturating_add(1);
            retry.retry_after = *retry_after;
            retry.retry_interval = *retry_interval;
        }
    }
}

/// Classify a task the same way the selection query filters it.
pub fn phase<T: ProvisioningTask>(task: &T, max_retry_count: i32, now: DateTime<Utc>) -> TaskPhase {
    let retry = task.retry();
    if task.is_provisioned() {
        TaskPhase::Provisioned
    } else if retry.retry_count >= max_retry_count {
        TaskPhase::Exhausted
    } else if retry.retry_after >= now {
        TaskPhase::BackingOff
    } else {
        TaskPhase::Ready
    }
}
