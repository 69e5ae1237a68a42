// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning task records.
//!
//! All three task kinds share the same shape: an owning device, a key that
//! distinguishes tasks of one kind on one device, a desired state, a
//! provisioned flag, and [`RetryState`].

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProvisioningError, Result};
use crate::types::{Aes128Key, DesiredState, DevAddr, DevEui, TaskKind};

/// Highest device-local multicast slot index (LoRaWAN McGroupID is 2 bits).
pub const MAX_MC_GROUP_SLOT: i16 = 3;

/// Highest device-local fragmentation session index.
pub const MAX_FRAG_INDEX: i16 = 3;

/// Highest Class-C session timeout exponent (session lasts 2^n seconds).
pub const MAX_SESSION_TIME_OUT: i16 = 15;

/// Retry bookkeeping carried by every task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Number of recorded failed attempts.
    pub retry_count: i32,
    /// The task is not eligible for selection before this instant.
    pub retry_after: DateTime<Utc>,
    /// Interval last supplied by the caller's backoff policy.
    pub retry_interval: Duration,
}

impl RetryState {
    /// Fresh state: no attempts, eligible immediately.
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            retry_count: 0,
            retry_after: Utc::now(),
            retry_interval,
        }
    }
}

/// Key of multicast-setup and Class-C session tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MulticastGroupKey {
    /// Owning device.
    pub dev_eui: DevEui,
    /// Logical multicast group.
    pub multicast_group_id: Uuid,
}

impl fmt::Display for MulticastGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dev_eui, self.multicast_group_id)
    }
}

/// Key of fragmentation-session tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentationSessionKey {
    /// Owning device.
    pub dev_eui: DevEui,
    /// Device-local fragmentation session index.
    pub frag_index: i16,
}

impl fmt::Display for FragmentationSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dev_eui, self.frag_index)
    }
}

/// Behaviour common to the three task kinds.
pub trait ProvisioningTask {
    /// Key type distinguishing tasks of this kind on one device.
    type Key: fmt::Display + Clone + Send + Sync;

    /// Task kind.
    const KIND: TaskKind;

    /// The task's key.
    fn key(&self) -> Self::Key;

    /// Owning device.
    fn dev_eui(&self) -> DevEui;

    /// Whether the device acknowledged this task.
    fn is_provisioned(&self) -> bool;

    /// Mark the task acknowledged.
    fn mark_provisioned(&mut self);

    /// Retry bookkeeping.
    fn retry(&self) -> &RetryState;

    /// Mutable retry bookkeeping.
    fn retry_mut(&mut self) -> &mut RetryState;

    /// Range checks applied before any write.
    fn validate(&self) -> Result<()>;
}

fn check_slot(field: &'static str, slot: i16) -> Result<()> {
    if !(0..=MAX_MC_GROUP_SLOT).contains(&slot) {
        return Err(ProvisioningError::validation(
            field,
            format!("slot index must be in 0..={}, got {}", MAX_MC_GROUP_SLOT, slot),
        ));
    }
    Ok(())
}

fn check_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<()> {
    if value < min || value > max {
        return Err(ProvisioningError::validation(
            field,
            format!("must be in {}..={}, got {}", min, max, value),
        ));
    }
    Ok(())
}

// ============================================================================
// Multicast setup
// ============================================================================

/// Multicast group membership to be installed on, or removed from, a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMulticastSetup {
    /// Owning device.
    pub dev_eui: DevEui,
    /// Logical multicast group.
    pub multicast_group_id: Uuid,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
    /// Device-local slot index (0..=3).
    pub mc_group_id: i16,
    /// Multicast network address.
    pub mc_addr: DevAddr,
    /// Multicast session key, encrypted for the device.
    pub mc_key_encrypted: Aes128Key,
    /// Lowest accepted multicast frame counter.
    pub min_mc_f_cnt: u32,
    /// Highest accepted multicast frame counter.
    pub max_mc_f_cnt: u32,
    /// Join or leave.
    pub state: DesiredState,
    /// Whether the device acknowledged the desired state.
    pub provisioned: bool,
    /// Retry bookkeeping.
    pub retry: RetryState,
}

impl RemoteMulticastSetup {
    /// New pending task accepting the whole frame-counter range.
    pub fn new(
        key: MulticastGroupKey,
        mc_group_id: i16,
        mc_addr: DevAddr,
        mc_key_encrypted: Aes128Key,
        state: DesiredState,
        retry_interval: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            dev_eui: key.dev_eui,
            multicast_group_id: key.multicast_group_id,
            created_at: now,
            updated_at: now,
            mc_group_id,
            mc_addr,
            mc_key_encrypted,
            min_mc_f_cnt: 0,
            max_mc_f_cnt: u32::MAX,
            state,
            provisioned: false,
            retry: RetryState::new(retry_interval),
        }
    }
}

impl ProvisioningTask for RemoteMulticastSetup {
    type Key = MulticastGroupKey;
    const KIND: TaskKind = TaskKind::MulticastSetup;

    fn key(&self) -> MulticastGroupKey {
        MulticastGroupKey {
            dev_eui: self.dev_eui,
            multicast_group_id: self.multicast_group_id,
        }
    }

    fn dev_eui(&self) -> DevEui {
        self.dev_eui
    }

    fn is_provisioned(&self) -> bool {
        self.provisioned
    }

    fn mark_provisioned(&mut self) {
        self.provisioned = true;
    }

    fn retry(&self) -> &RetryState {
        &self.retry
    }

    fn retry_mut(&mut self) -> &mut RetryState {
        &mut self.retry
    }

    fn validate(&self) -> Result<()> {
        check_slot("mc_group_id", self.mc_group_id)?;
        if self.min_mc_f_cnt > self.max_mc_f_cnt {
            return Err(ProvisioningError::validation(
                "min_mc_f_cnt",
                format!(
                    "must not exceed max_mc_f_cnt ({} > {})",
                    self.min_mc_f_cnt, self.max_mc_f_cnt
                ),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Fragmentation session
// ============================================================================

/// Parameters of a fragmentation session as announced to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentationParams {
    /// Number of uncoded fragments.
    pub nb_frag: i32,
    /// Fragment size in bytes.
    pub frag_size: i16,
    /// Redundancy / coding-matrix selector.
    pub fragmentation_matrix: u8,
    /// Block acknowledgement delay exponent.
    pub block_ack_delay: i16,
    /// Padding bytes appended to the last fragment.
    pub padding: i16,
    /// Opaque file descriptor.
    pub descriptor: [u8; 4],
}

impl FragmentationParams {
    /// Derive fragment count and padding for a payload of `payload_len` bytes.
    pub fn for_payload(
        payload_len: usize,
        frag_size: i16,
        fragmentation_matrix: u8,
        block_ack_delay: i16,
        descriptor: [u8; 4],
    ) -> Result<Self> {
        check_range("frag_size", frag_size.into(), 1, 255)?;
        let size = frag_size as usize;
        let padding = (size - payload_len % size) % size;
        let nb_frag = (payload_len + padding) / size;
        let nb_frag = i32::try_from(nb_frag)
            .map_err(|_| ProvisioningError::validation("nb_frag", "payload too large"))?;

        let params = Self {
            nb_frag,
            frag_size,
            fragmentation_matrix,
            block_ack_delay,
            padding: padding as i16,
            descriptor,
        };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        check_range("nb_frag", self.nb_frag.into(), 1, u16::MAX.into())?;
        check_range("frag_size", self.frag_size.into(), 1, 255)?;
        check_range("block_ack_delay", self.block_ack_delay.into(), 0, 7)?;
        check_range("padding", self.padding.into(), 0, 255)?;
        Ok(())
    }
}

/// Fragmentation session to be set up on, or removed from, a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFragmentationSession {
    /// Owning device.
    pub dev_eui: DevEui,
    /// Device-local session index (0..=3).
    pub frag_index: i16,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
    /// Multicast slot indices the session listens on. Empty means unicast only.
    pub mc_group_ids: Vec<i16>,
    /// Session parameters.
    pub params: FragmentationParams,
    /// Set up or delete.
    pub state: DesiredState,
    /// Whether the device acknowledged the desired state.
    pub provisioned: bool,
    /// Retry bookkeeping.
    pub retry: RetryState,
}

impl RemoteFragmentationSession {
    /// New pending task.
    pub fn new(
        key: FragmentationSessionKey,
        mc_group_ids: Vec<i16>,
        params: FragmentationParams,
        state: DesiredState,
        retry_interval: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            dev_eui: key.dev_eui,
            frag_index: key.frag_index,
            created_at: now,
            updated_at: now,
            mc_group_ids,
            params,
            state,
            provisioned: false,
            retry: RetryState::new(retry_interval),
        }
    }

    /// Whether the session is bound to no multicast group.
    pub fn is_unicast(&self) -> bool {
        self.mc_group_ids.is_empty()
    }
}

impl ProvisioningTask for RemoteFragmentationSession {
    type Key = FragmentationSessionKey;
    const KIND: TaskKind = TaskKind::FragmentationSession;

    fn key(&self) -> FragmentationSessionKey {
        FragmentationSessionKey {
            dev_eui: self.dev_eui,
            frag_index: self.frag_index,
        }
    }

    fn dev_eui(&self) -> DevEui {
        self.dev_eui
    }

    fn is_provisioned(&self) -> bool {
        self.provisioned
    }

    fn mark_provisioned(&mut self) {
        self.provisioned = true;
    }

    fn retry(&self) -> &RetryState {
        &self.retry
    }

    fn retry_mut(&mut self) -> &mut RetryState {
        &mut self.retry
    }

    fn validate(&self) -> Result<()> {
        check_range("frag_index", self.frag_index.into(), 0, MAX_FRAG_INDEX.into())?;
        for slot in &self.mc_group_ids {
            check_slot("mc_group_ids", *slot)?;
        }
        self.params.validate()
    }
}

// ============================================================================
// Class-C session
// ============================================================================

/// Class-C receive window to be scheduled on a device.
///
/// Only eligible for work once the multicast setup with the same key is
/// provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMulticastClassCSession {
    /// Owning device.
    pub dev_eui: DevEui,
    /// Logical multicast group.
    pub multicast_group_id: Uuid,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
    /// Device-local slot index (0..=3).
    pub mc_group_id: i16,
    /// Absolute session start.
    pub session_time: DateTime<Utc>,
    /// Timeout exponent: the window stays open 2^n seconds.
    pub session_time_out: i16,
    /// Downlink frequency in Hz.
    pub dl_frequency: i64,
    /// Data-rate index.
    pub dr: i16,
    /// Whether the device acknowledged the session.
    pub provisioned: bool,
    /// Retry bookkeeping.
    pub retry: RetryState,
}

impl RemoteMulticastClassCSession {
    /// New pending task.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: MulticastGroupKey,
        mc_group_id: i16,
        session_time: DateTime<Utc>,
        session_time_out: i16,
        dl_frequency: i64,
        dr: i16,
        retry_interval: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            dev_eui: key.dev_eui,
            multicast_group_id: key.multicast_group_id,
            created_at: now,
            updated_at: now,
            mc_group_id,
            session_time,
            session_time_out,
            dl_frequency,
            dr,
            provisioned: false,
            retry: RetryState::new(retry_interval),
        }
    }

    /// How long the window stays open.
    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(1u64 << self.session_time_out.clamp(0, MAX_SESSION_TIME_OUT))
    }
}

impl ProvisioningTask for RemoteMulticastClassCSession {
    type Key = MulticastGroupKey;
    const KIND: TaskKind = TaskKind::ClassCSession;

    fn key(&self) -> MulticastGroupKey {
        MulticastGroupKey {
            dev_eui: self.dev_eui,
            multicast_group_id: self.multicast_group_id,
        }
    }

    fn dev_eui(&self) -> DevEui {
        self.dev_eui
    }

    fn is_provisioned(&self) -> bool {
        self.provisioned
    }

    fn mark_provisioned(&mut self) {
        self.provisioned = true;
    }

    fn retry(&self) -> &RetryState {
        &self.retry
    }

    fn retry_mut(&mut self) -> &mut RetryState {
        &mut self.retry
    }

    fn validate(&self) -> Result<()> {
        check_slot("mc_group_id", self.mc_group_id)?;
        check_range(
            "session_time_out",
            self.session_time_out.into(),
            0,
            MAX_SESSION_TIME_OUT.into(),
        )?;
        check_range("dr", self.dr.into(), 0, 15)?;
        check_range("dl_frequency", self.dl_frequency, 1, u32::MAX.into())?;
        Ok(())
    }
}
