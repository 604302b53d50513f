// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_shared4::{clock::ChainEpoch, deal::DealID, sector::SectorNumber};
use serde::{Deserialize, Serialize};

use super::SectorState;
use crate::utils::encoding::{base64_standard, stringify_opt};

/// Chain randomness drawn for the pre-commit phase.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SealTicket {
    pub block_height: ChainEpoch,
    #[serde(with = "base64_standard", default)]
    pub ticket_bytes: Vec<u8>,
}

impl SealTicket {
    pub fn is_empty(&self) -> bool {
        self.ticket_bytes.is_empty()
    }
}

/// Chain randomness drawn for the commit phase.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SealSeed {
    pub block_height: ChainEpoch,
    #[serde(with = "base64_standard", default)]
    pub ticket_bytes: Vec<u8>,
}

impl SealSeed {
    pub fn is_empty(&self) -> bool {
        self.ticket_bytes.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Piece {
    #[serde(rename = "DealID")]
    pub deal_id: DealID,
    /// Unpadded size in bytes.
    pub size: u64,
    #[serde(with = "base64_standard", default)]
    pub comm_p: Vec<u8>,
}

/// Commitments produced by pre-commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCommitOutput {
    #[serde(rename = "CommD", with = "base64_standard", default)]
    pub comm_d: Vec<u8>,
    #[serde(rename = "CommR", with = "base64_standard", default)]
    pub comm_r: Vec<u8>,
}

impl PreCommitOutput {
    /// An empty `comm_r` means pre-commit has not produced anything yet.
    pub fn is_empty(&self) -> bool {
        self.comm_r.is_empty()
    }
}

/// Persisted record of a single sector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectorInfo {
    pub state: SectorState,
    #[serde(rename = "SectorID")]
    pub sector_id: SectorNumber,
    pub nonce: u64,

    pub pieces: Vec<Piece>,

    #[serde(with = "base64_standard", default)]
    pub comm_d: Vec<u8>,
    #[serde(with = "base64_standard", default)]
    pub comm_r: Vec<u8>,
    #[serde(with = "base64_standard", default)]
    pub proof: Vec<u8>,
    pub ticket: SealTicket,

    #[serde(with = "stringify_opt", default)]
    pub pre_commit_message: Option<Cid>,

    pub seed: SealSeed,

    #[serde(with = "stringify_opt", default)]
    pub commit_message: Option<Cid>,

    #[serde(with = "stringify_opt", default)]
    pub fault_report_msg: Option<Cid>,

    pub last_err: String,
    pub worker_dir: String,
}

impl SectorInfo {
    pub fn deal_ids(&self) -> Vec<DealID> {
        self.pieces.iter().map(|p| p.deal_id).collect()
    }

    pub fn piece_sizes(&self) -> Vec<u64> {
        self.pieces.iter().map(|p| p.size).collect()
    }

    pub fn pre_commit_output(&self) -> PreCommitOutput {
        PreCommitOutput {
            comm_d: self.comm_d.clone(),
            comm_r: self.comm_r.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sector_info_json_shape() {
        let info = SectorInfo {
            state: SectorState::PreCommitted,
            sector_id: 42,
            comm_r: vec![1, 2, 3],
            ticket: SealTicket {
                block_height: 100,
                ticket_bytes: vec![7; 32],
            },
            ..Default::default()
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["State"], json!("PreCommitted"));
        assert_eq!(value["SectorID"], json!(42));
        assert_eq!(value["CommR"], json!("AQID"));
        assert_eq!(value["Ticket"]["BlockHeight"], json!(100));
        assert_eq!(value["PreCommitMessage"], json!(null));

        let back: SectorInfo = serde_json::from_value(value).unwrap();
        assert_eq!(back, info);
    }
}
