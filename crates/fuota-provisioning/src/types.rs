// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixed-width LoRaWAN identifiers and small enums shared by all task kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProvisioningError;

/// Error returned when parsing a hex-encoded identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} hex characters, got '{input}'")]
pub struct ParseHexError {
    /// Number of hex characters required.
    pub expected: usize,
    /// The rejected input.
    pub input: String,
}

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Width in bytes.
            pub const LEN: usize = $len;

            /// Raw bytes, most significant first.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Decode from a database column, rejecting any other width.
            pub(crate) fn from_column(
                field: &'static str,
                bytes: &[u8],
            ) -> Result<Self, ProvisioningError> {
                let arr: [u8; $len] =
                    bytes
                        .try_into()
                        .map_err(|_| ProvisioningError::Malformed {
                            field,
                            expected: $len,
                            actual: bytes.len(),
                        })?;
                Ok(Self(arr))
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut out = [0u8; $len];
                hex::decode_to_slice(s, &mut out).map_err(|_| ParseHexError {
                    expected: $len * 2,
                    input: s.to_string(),
                })?;
                Ok(Self(out))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// 64-bit device EUI. Owning identifier of every provisioning task.
    DevEui,
    8
);

fixed_bytes!(
    /// 32-bit multicast network address.
    DevAddr,
    4
);

fixed_bytes!(
    /// 128-bit multicast session key, encrypted under the device's McKEKey.
    Aes128Key,
    16
);

/// What the device should end up with for a given task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DesiredState {
    /// Install the group / session on the device.
    Setup,
    /// Remove the group / session from the device.
    Delete,
}

impl DesiredState {
    /// Text persisted in the `state` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DesiredState {
    type Err = ProvisioningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SETUP" => Ok(Self::Setup),
            "DELETE" => Ok(Self::Delete),
            other => Err(ProvisioningError::validation(
                "state",
                format!("unknown desired state '{}'", other),
            )),
        }
    }
}

/// The three provisioning task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Multicast group membership (McGroupSetupReq / McGroupDeleteReq).
    MulticastSetup,
    /// Fragmentation session parameters (FragSessionSetupReq / FragSessionDeleteReq).
    FragmentationSession,
    /// Class-C receive window (McClassCSessionReq).
    ClassCSession,
}

impl TaskKind {
    /// Backing table name.
    pub fn table(&self) -> &'static str {
        match self {
            Self::MulticastSetup => "remote_multicast_setup",
            Self::FragmentationSession => "remote_fragmentation_session",
            Self::ClassCSession => "remote_multicast_class_c_session",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MulticastSetup => "multicast_setup",
            Self::FragmentationSession => "fragmentation_session",
            Self::ClassCSession => "class_c_session",
        })
    }
}
