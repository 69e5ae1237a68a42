// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Downlink side of the reconciliation loop.
//!
//! Claimed tasks become [`DownlinkCommand`]s. Byte encoding and radio
//! scheduling belong to the [`DownlinkEnqueuer`] collaborator.

mod command;
pub mod mock;
mod traits;

pub use command::*;
pub use mock::RecordingEnqueuer;
pub use traits::*;
