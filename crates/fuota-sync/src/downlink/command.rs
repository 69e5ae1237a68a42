// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Downlink commands built from claimed tasks.

use chrono::{DateTime, Utc};
use fuota_provisioning::{
    Aes128Key, DesiredState, DevAddr, RemoteFragmentationSession, RemoteMulticastClassCSession,
    RemoteMulticastSetup,
};
use serde::Serialize;
use thiserror::Error;

/// Application port of the remote multicast setup package.
pub const MULTICAST_SETUP_F_PORT: u8 = 200;

/// Application port of the fragmented data block transport package.
pub const FRAGMENTATION_F_PORT: u8 = 201;

/// A command ready for a device's downlink queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cid")]
pub enum DownlinkCommand {
    /// Join a multicast group in the given slot.
    McGroupSetupReq {
        /// Device-local slot index.
        mc_group_id: u8,
        /// Multicast address.
        mc_addr: DevAddr,
        /// Encrypted multicast key.
        mc_key_encrypted: Aes128Key,
        /// Lowest accepted frame counter.
        min_mc_f_cnt: u32,
        /// Highest accepted frame counter.
        max_mc_f_cnt: u32,
    },
    /// Leave the group in the given slot.
    McGroupDeleteReq {
        /// Device-local slot index.
        mc_group_id: u8,
    },
    /// Describe a fragmentation session.
    FragSessionSetupReq {
        /// Device-local fragmentation session index.
        frag_index: u8,
        /// Bit `n` set when slot `n` carries the fragments.
        mc_group_bit_mask: u8,
        /// Number of fragments.
        nb_frag: u16,
        /// Fragment size in bytes.
        frag_size: u8,
        /// Fragmentation matrix.
        fragmentation_matrix: u8,
        /// Block acknowledgement delay exponent.
        block_ack_delay: u8,
        /// Padding bytes in the last fragment.
        padding: u8,
        /// Opaque file descriptor.
        descriptor: [u8; 4],
    },
    /// Drop a fragmentation session.
    FragSessionDeleteReq {
        /// Device-local fragmentation session index.
        frag_index: u8,
    },
    /// Open a Class-C receive window for a slot.
    McClassCSessionReq {
        /// Device-local slot index.
        mc_group_id: u8,
        /// Session start in GPS seconds, modulo 2^32.
        session_time: u32,
        /// Session timeout exponent.
        session_time_out: u8,
        /// Downlink frequency in Hz.
        dl_frequency: u32,
        /// Data rate index.
        dr: u8,
    },
}

impl DownlinkCommand {
    /// Command identifier used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::McGroupSetupReq { .. } => "McGroupSetupReq",
            Self::McGroupDeleteReq { .. } => "McGroupDeleteReq",
            Self::FragSessionSetupReq { .. } => "FragSessionSetupReq",
            Self::FragSessionDeleteReq { .. } => "FragSessionDeleteReq",
            Self::McClassCSessionReq { .. } => "McClassCSessionReq",
        }
    }

    /// Application port the command is sent on.
    pub fn f_port(&self) -> u8 {
        match self {
            Self::FragSessionSetupReq { .. } | Self::FragSessionDeleteReq { .. } => {
                FRAGMENTATION_F_PORT
            }
            _ => MULTICAST_SETUP_F_PORT,
        }
    }
}

/// A stored value does not fit its command field.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{field} value {value} does not fit the command field")]
pub struct CommandError {
    /// Command field.
    pub field: &'static str,
    /// Stored value.
    pub value: i64,
}

fn narrow<T: TryFrom<i64>>(field: &'static str, value: impl Into<i64>) -> Result<T, CommandError> {
    let value = value.into();
    T::try_from(value).map_err(|_| CommandError { field, value })
}

/// Builds the command that moves a device towards the task's desired state.
pub trait ToDownlinkCommand {
    /// The command for this task.
    fn to_downlink_command(&self) -> Result<DownlinkCommand, CommandError>;
}

impl ToDownlinkCommand for RemoteMulticastSetup {
    fn to_downlink_command(&self) -> Result<DownlinkCommand, CommandError> {
        let mc_group_id = narrow("mc_group_id", self.mc_group_id)?;
        Ok(match self.state {
            DesiredState::Setup => DownlinkCommand::McGroupSetupReq {
                mc_group_id,
                mc_addr: self.mc_addr,
                mc_key_encrypted: self.mc_key_encrypted,
                min_mc_f_cnt: self.min_mc_f_cnt,
                max_mc_f_cnt: self.max_mc_f_cnt,
            },
            DesiredState::Delete => DownlinkCommand::McGroupDeleteReq { mc_group_id },
        })
    }
}

impl ToDownlinkCommand for RemoteFragmentationSession {
    fn to_downlink_command(&self) -> Result<DownlinkCommand, CommandError> {
        let frag_index = narrow("frag_index", self.frag_index)?;
        if self.state == DesiredState::Delete {
            return Ok(DownlinkCommand::FragSessionDeleteReq { frag_index });
        }

        let params = &self.params;
        Ok(DownlinkCommand::FragSessionSetupReq {
            frag_index,
            mc_group_bit_mask: mc_group_bit_mask(&self.mc_group_ids),
            nb_frag: narrow("nb_frag", params.nb_frag)?,
            frag_size: narrow("frag_size", params.frag_size)?,
            fragmentation_matrix: params.fragmentation_matrix,
            block_ack_delay: narrow("block_ack_delay", params.block_ack_delay)?,
            padding: narrow("padding", params.padding)?,
            descriptor: params.descriptor,
        })
    }
}

impl ToDownlinkCommand for RemoteMulticastClassCSession {
    fn to_downlink_command(&self) -> Result<DownlinkCommand, CommandError> {
        Ok(DownlinkCommand::McClassCSessionReq {
            mc_group_id: narrow("mc_group_id", self.mc_group_id)?,
            session_time: gps_seconds(self.session_time),
            session_time_out: narrow("session_time_out", self.session_time_out)?,
            dl_frequency: narrow("dl_frequency", self.dl_frequency)?,
            dr: narrow("dr", self.dr)?,
        })
    }
}

/// Slot bit mask for a fragmentation session. Indices outside 0..=3 are ignored.
pub fn mc_group_bit_mask(mc_group_ids: &[i16]) -> u8 {
    mc_group_ids
        .iter()
        .filter(|idx| (0..=3).contains(*idx))
        .fold(0u8, |mask, idx| mask | (1u8 << *idx))
}

/// 1980-01-06T00:00:00Z as a Unix timestamp.
const GPS_EPOCH_UNIX: i64 = 315_964_800;

/// Unix timestamps at which a leap second had been inserted since the GPS epoch.
const LEAP_SECONDS: [i64; 18] = [
    362_793_600,   // 1981-07-01
    394_329_600,   // 1982-07-01
    425_865_600,   // 1983-07-01
    489_024_000,   // 1985-07-01
    567_993_600,   // 1988-01-01
    631_152_000,   // 1990-01-01
    662_688_000,   // 1991-01-01
    709_948_800,   // 1992-07-01
    741_484_800,   // 1993-07-01
    773_020_800,   // 1994-07-01
    820_454_400,   // 1996-01-01
    867_715_200,   // 1997-07-01
    915_148_800,   // 1999-01-01
    1_136_073_600, // 2006-01-01
    1_230_768_000, // 2009-01-01
    1_341_100_800, // 2012-07-01
    1_435_708_800, // 2015-07-01
    1_483_228_800, // 2017-01-01
];

/// Whole GPS seconds of `time`, modulo 2^32.
pub fn gps_seconds(time: DateTime<Utc>) -> u32 {
    let unix = time.timestamp();
    let leaps = LEAP_SECONDS.iter().filter(|at| **at <= unix).count() as i64;
    (unix - GPS_EPOCH_UNIX + leaps).rem_euclid(1 << 32) as u32
}
