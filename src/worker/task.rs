// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use fvm_shared4::sector::SectorNumber;
use serde::{Deserialize, Serialize};

use crate::sealing::{Piece, PreCommitOutput, SealSeed, SealTicket};
use crate::sector_storage::TaskType;
use crate::utils::encoding::base64_standard;

/// A unit of sealing work handed to a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkerTask {
    #[serde(rename = "Type")]
    pub task_type: TaskType,
    #[serde(rename = "TaskID")]
    pub task_id: u64,
    #[serde(rename = "SectorID")]
    pub sector_id: SectorNumber,

    pub seal_ticket: SealTicket,
    pub pieces: Vec<Piece>,

    // commit only
    #[serde(default)]
    pub seal_seed: SealSeed,
    #[serde(default)]
    pub rspco: PreCommitOutput,
}

/// Outcome of a [`WorkerTask`]. `err` is empty on success.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SealRes {
    #[serde(default)]
    pub err: String,
    #[serde(with = "base64_standard", default)]
    pub proof: Vec<u8>,
    #[serde(default)]
    pub rspco: PreCommitOutput,
}

impl SealRes {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            err: format!("{err:#}"),
            ..Default::default()
        }
    }

    pub fn into_result(self) -> anyhow::Result<Self> {
        if self.err.is_empty() {
            Ok(self)
        } else {
            Err(anyhow::anyhow!(self.err))
        }
    }
}

/// How a worker process was started.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkerCfg {
    pub no_pre_commit: bool,
    pub no_commit: bool,
    pub directory: PathBuf,
    pub ip_address: String,
}

/// A journal entry: a task paired with its result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    pub worker_task: WorkerTask,
    pub seal_res: SealRes,
}
