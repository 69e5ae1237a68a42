// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry interval growth.
//!
//! Each failed attempt stores `retry_after = now + interval` and hands the
//! next interval, `min(interval × factor, max)`, to the task store. With
//! `factor = 1.0` the interval stays constant (capped at `max`).
//!
//! ```rust
//! use std::time::Duration;
//! use fuota_sync::BackoffPolicy;
//!
//! let backoff = BackoffPolicy {
//!     factor: 2.0,
//!     max: Duration::from_secs(60),
//! };
//!
//! assert_eq!(backoff.next(Duration::from_secs(10)), Duration::from_secs(20));
//! assert_eq!(backoff.next(Duration::from_secs(40)), Duration::from_secs(60));
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Retry interval growth policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Multiplicative growth factor.
    pub factor: f64,
    /// Interval cap.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    /// Constant interval, capped at one hour.
    fn default() -> Self {
        Self {
            factor: 1.0,
            max: Duration::from_secs(3600),
        }
    }
}

impl BackoffPolicy {
    /// Interval to store after a failed attempt made with `interval`.
    ///
    /// Non-finite or negative products clamp to [`BackoffPolicy::max`].
    pub fn next(&self, interval: Duration) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let secs = interval.as_secs_f64() * self.factor;

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Earliest time the next attempt may run.
    pub fn retry_after(&self, now: DateTime<Utc>, interval: Duration) -> Result<DateTime<Utc>> {
        let delay = chrono::Duration::from_std(interval)
            .map_err(|e| Error::Other(format!("Invalid duration: {}", e)))?;
        now.checked_add_signed(delay)
            .ok_or_else(|| Error::Other(format!("retry_after overflows: {:?}", interval)))
    }
}
