// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device answers that close the reconciliation loop.
//!
//! Answers carry only device-local indices, so each one is mapped back to its
//! task row by slot or fragmentation index, locked, and marked provisioned.
//! Answers with error flags leave the task untouched; the sync worker keeps
//! retrying it until its budget runs out.

use fuota_provisioning::{
    AttemptOutcome, DesiredState, DevEui, FragmentationSessionKey, PostgresStore,
    RemoteFragmentationSession,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// A decoded answer from a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cid")]
pub enum DeviceAnswer {
    /// Answer to McGroupSetupReq.
    McGroupSetupAns {
        /// Device-local slot index.
        mc_group_id: u8,
        /// Slot index not supported by the device.
        id_error: bool,
    },
    /// Answer to McGroupDeleteReq.
    McGroupDeleteAns {
        /// Device-local slot index.
        mc_group_id: u8,
        /// Slot was not set up.
        mc_group_undefined: bool,
    },
    /// Answer to McClassCSessionReq.
    McClassCSessionAns {
        /// Device-local slot index.
        mc_group_id: u8,
        /// Data rate not supported.
        dr_error: bool,
        /// Frequency not supported.
        freq_error: bool,
        /// Slot was not set up.
        mc_group_undefined: bool,
        /// Seconds until the session starts, when accepted.
        time_to_start: Option<u32>,
    },
    /// Answer to FragSessionSetupReq.
    FragSessionSetupAns {
        /// Device-local fragmentation session index.
        frag_index: u8,
        /// Fragmentation matrix not supported.
        encoding_unsupported: bool,
        /// Not enough memory for the session.
        not_enough_memory: bool,
        /// Session index not supported.
        frag_session_index_not_supported: bool,
        /// Descriptor refused.
        wrong_descriptor: bool,
    },
    /// Answer to FragSessionDeleteReq.
    FragSessionDeleteAns {
        /// Device-local fragmentation session index.
        frag_index: u8,
        /// No session with this index.
        session_does_not_exist: bool,
    },
}

impl DeviceAnswer {
    /// Answer identifier used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::McGroupSetupAns { .. } => "McGroupSetupAns",
            Self::McGroupDeleteAns { .. } => "McGroupDeleteAns",
            Self::McClassCSessionAns { .. } => "McClassCSessionAns",
            Self::FragSessionSetupAns { .. } => "FragSessionSetupAns",
            Self::FragSessionDeleteAns { .. } => "FragSessionDeleteAns",
        }
    }

    /// Names of the error flags that are set, empty when the device accepted.
    pub fn errors(&self) -> Vec<&'static str> {
        let flags: Vec<(bool, &'static str)> = match *self {
            Self::McGroupSetupAns { id_error, .. } => vec![(id_error, "IDError")],
            Self::McGroupDeleteAns {
                mc_group_undefined, ..
            } => vec![(mc_group_undefined, "McGroupUndefined")],
            Self::McClassCSessionAns {
                dr_error,
                freq_error,
                mc_group_undefined,
                ..
            } => vec![
                (dr_error, "DRError"),
                (freq_error, "FreqError"),
                (mc_group_undefined, "McGroupUndefined"),
            ],
            Self::FragSessionSetupAns {
                encoding_unsupported,
                not_enough_memory,
                frag_session_index_not_supported,
                wrong_descriptor,
                ..
            } => vec![
                (encoding_unsupported, "EncodingUnsupported"),
                (not_enough_memory, "NotEnoughMemory"),
                (
                    frag_session_index_not_supported,
                    "FragSessionIndexNotSupported",
                ),
                (wrong_descriptor, "WrongDescriptor"),
            ],
            Self::FragSessionDeleteAns {
                session_does_not_exist,
                ..
            } => vec![(session_does_not_exist, "SessionDoesNotExist")],
        };
        flags
            .into_iter()
            .filter_map(|(set, name)| set.then_some(name))
            .collect()
    }
}

/// Applies device answers to the task store.
#[derive(Debug, Clone)]
pub struct AnswerHandler {
    store: PostgresStore,
}

impl AnswerHandler {
    /// Create a new answer handler.
    pub fn new(store: PostgresStore) -> Self {
        Self { store }
    }

    /// Apply one answer from `dev_eui`.
    ///
    /// Returns [`Error::DeviceRejected`] when the answer carries error flags,
    /// and a not-found error when no task matches the answer.
    pub async fn handle(&self, dev_eui: DevEui, answer: &DeviceAnswer) -> Result<()> {
        info!(dev_eui = %dev_eui, answer = ?answer, "{} received", answer.name());

        let errors = answer.errors();
        if !errors.is_empty() {
            return Err(Error::DeviceRejected {
                dev_eui,
                command: answer.name(),
                reason: errors.join(", "),
            });
        }

        let result = self.acknowledge(dev_eui, answer).await;
        if let Err(e) = &result
            && e.is_not_found()
        {
            warn!(dev_eui = %dev_eui, error = %e, "{} for unknown task", answer.name());
        }
        result
    }

    /// Lock the task the answer refers to and mark it provisioned.
    async fn acknowledge(&self, dev_eui: DevEui, answer: &DeviceAnswer) -> Result<()> {
        let mut tx = self.store.begin().await?;

        match *answer {
            DeviceAnswer::McGroupSetupAns { mc_group_id, .. } => {
                let mut task = tx
                    .get_multicast_setup_by_slot(
                        dev_eui,
                        mc_group_id.into(),
                        DesiredState::Setup,
                        true,
                    )
                    .await?;
                tx.record_outcome(&mut task, &AttemptOutcome::Acknowledged)
                    .await?;
            }
            DeviceAnswer::McGroupDeleteAns { mc_group_id, .. } => {
                let mut task = tx
                    .get_multicast_setup_by_slot(
                        dev_eui,
                        mc_group_id.into(),
                        DesiredState::Delete,
                        true,
                    )
                    .await?;
                tx.record_outcome(&mut task, &AttemptOutcome::Acknowledged)
                    .await?;
            }
            DeviceAnswer::McClassCSessionAns { mc_group_id, .. } => {
                let mut task = tx
                    .get_class_c_session_by_slot(dev_eui, mc_group_id.into(), true)
                    .await?;
                tx.record_outcome(&mut task, &AttemptOutcome::Acknowledged)
                    .await?;
            }
            DeviceAnswer::FragSessionSetupAns { frag_index, .. }
            | DeviceAnswer::FragSessionDeleteAns { frag_index, .. } => {
                let key = FragmentationSessionKey {
                    dev_eui,
                    frag_index: frag_index.into(),
                };
                let mut task: RemoteFragmentationSession = tx.get(&key, true).await?;
                tx.record_outcome(&mut task, &AttemptOutcome::Acknowledged)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_answers_have_no_errors() {
        let test_cases = vec![
            DeviceAnswer::McGroupSetupAns {
                mc_group_id: 0,
                id_error: false,
            },
            DeviceAnswer::McGroupDeleteAns {
                mc_group_id: 1,
                mc_group_undefined: false,
            },
            DeviceAnswer::McClassCSessionAns {
                mc_group_id: 2,
                dr_error: false,
                freq_error: false,
                mc_group_undefined: false,
                time_to_start: Some(120),
            },
            DeviceAnswer::FragSessionSetupAns {
                frag_index: 3,
                encoding_unsupported: false,
                not_enough_memory: false,
                frag_session_index_not_supported: false,
                wrong_descriptor: false,
            },
            DeviceAnswer::FragSessionDeleteAns {
                frag_index: 0,
                session_does_not_exist: false,
            },
        ];

        for answer in test_cases {
            assert!(answer.errors().is_empty(), "{} should be accepted", answer.name());
        }
    }

    #[test]
    fn test_error_flags_are_named() {
        let answer = DeviceAnswer::McClassCSessionAns {
            mc_group_id: 0,
            dr_error: true,
            freq_error: false,
            mc_group_undefined: true,
            time_to_start: None,
        };
        assert_eq!(answer.errors(), vec!["DRError", "McGroupUndefined"]);

        let answer = DeviceAnswer::FragSessionSetupAns {
            frag_index: 0,
            encoding_unsupported: false,
            not_enough_memory: true,
            frag_session_index_not_supported: false,
            wrong_descriptor: true,
        };
        assert_eq!(answer.errors(), vec!["NotEnoughMemory", "WrongDescriptor"]);
    }

    #[test]
    fn test_answer_deserializes_from_tagged_json() {
        let answer: DeviceAnswer = serde_json::from_value(serde_json::json!({
            "cid": "McGroupSetupAns",
            "mc_group_id": 2,
            "id_error": false
        }))
        .unwrap();
        assert_eq!(
            answer,
            DeviceAnswer::McGroupSetupAns {
                mc_group_id: 2,
                id_error: false
            }
        );
    }
}
