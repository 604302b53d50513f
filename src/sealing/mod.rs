// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sector sealing.
//!
//! Every sector is an entity of a [`StateGroup`] keyed by its number and
//! persisted under [`SECTOR_STORE_PREFIX`]. The lifecycle is
//!
//! ```text
//! Packing -> PreCommitting -> PreCommitted -> Committing -> CommitWait -> Proving
//! ```
//!
//! with `SealFailed`, `PreCommitFailed`, `SealCommitFailed` and
//! `CommitFailed` branching off the corresponding step. Failed sectors stay
//! put until a worker reports a result for them through
//! [`Sealing::worker_resume`]. `FailedUnrecoverable` is terminal.

mod error;
mod events;
mod fsm;
mod types;

use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use async_trait::async_trait;
use fvm_shared4::{
    address::Address,
    clock::ChainEpoch,
    deal::DealID,
    piece::{PaddedPieceSize, UnpaddedPieceSize},
    sector::{RegisteredSealProof, SectorNumber},
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tracing::{info, warn};

pub use self::error::SealingError;
pub use self::events::SectorEvent;
pub use self::types::*;
use self::fsm::SectorFsm;
use crate::chain::ChainApi;
use crate::db::{SettingsStore, setting_keys::SECTOR_STORE_PREFIX};
use crate::sector_storage::{Manager, TaskType};
use crate::statemachine::StateGroup;
use crate::worker::{SealRes, TaskResumer, WorkerCfg, WorkerTask};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum SectorState {
    #[default]
    Packing,
    PreCommitting,
    PreCommitted,
    Committing,
    CommitWait,
    Proving,

    SealFailed,
    PreCommitFailed,
    SealCommitFailed,
    CommitFailed,
    FailedUnrecoverable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealingConfig {
    /// Sector size in bytes.
    pub sector_size: u64,
    /// Registered seal proof type sent with pre-commits.
    pub seal_proof: i64,
    /// How far behind the head the pre-commit ticket is drawn.
    pub seal_randomness_lookback: ChainEpoch,
    pub pre_commit_challenge_delay: ChainEpoch,
    /// Epochs to wait past the seed epoch before trusting it.
    pub interactive_porep_confidence: ChainEpoch,
    pub sector_lifetime: ChainEpoch,
}

impl Default for SealingConfig {
    fn default() -> Self {
        Self {
            sector_size: 2048,
            seal_proof: 5,
            seal_randomness_lookback: 900,
            pre_commit_challenge_delay: 10,
            interactive_porep_confidence: 6,
            sector_lifetime: 180 * 2880,
        }
    }
}

impl SealingConfig {
    pub fn seal_proof(&self) -> RegisteredSealProof {
        RegisteredSealProof::from(self.seal_proof)
    }

    /// Unpadded bytes a sector holds.
    pub fn capacity(&self) -> u64 {
        PaddedPieceSize(self.sector_size).unpadded().0
    }
}

pub type PieceData = Box<dyn AsyncRead + Send + Unpin>;

/// Sector files and piece staging.
#[async_trait]
pub trait SectorBuilder: Send + Sync {
    async fn acquire_sector_id(&self) -> anyhow::Result<SectorNumber>;

    /// Writes `size` bytes of `data` into the unsealed sector after the
    /// pieces already there and returns the piece commitment.
    async fn add_piece(
        &self,
        sector: SectorNumber,
        size: u64,
        existing_piece_sizes: &[u64],
        data: PieceData,
    ) -> anyhow::Result<Vec<u8>>;

    /// Directory a remote worker keeps its sector files in.
    fn worker_dir(&self, kind: &str, ip: &str) -> anyhow::Result<String>;
}

/// Outcome of [`Sealing::worker_resume`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeStatus {
    /// The result is stale or has been applied.
    Finished,
    /// The sector still depends on the result.
    Pending,
    /// Nothing is done automatically. The sector needs manual repair.
    NeedsOperator,
}

impl ResumeStatus {
    /// Whether the journal entry can be dropped.
    pub fn finished(self) -> bool {
        !matches!(self, ResumeStatus::Pending)
    }
}

pub struct Sealing<DB: SettingsStore + Send + Sync + 'static> {
    sectors: StateGroup<DB, SectorFsm>,
    builder: Arc<dyn SectorBuilder>,
}

impl<DB: SettingsStore + Send + Sync + 'static> Sealing<DB> {
    pub fn new(
        db: DB,
        chain: Arc<dyn ChainApi>,
        manager: Arc<Manager>,
        builder: Arc<dyn SectorBuilder>,
        miner: Address,
        worker: Address,
        cfg: SealingConfig,
    ) -> Self {
        let fsm = SectorFsm {
            chain,
            manager,
            miner,
            worker,
            cfg,
        };
        Self {
            sectors: StateGroup::new(db, fsm, SECTOR_STORE_PREFIX),
            builder,
        }
    }

    pub fn config(&self) -> &SealingConfig {
        &self.sectors.handler().cfg
    }

    /// Resumes every persisted sector.
    pub fn run(&self) -> anyhow::Result<()> {
        let restarted = self
            .sectors
            .restart()
            .context("failed load sector states")?;
        info!("loaded {restarted} sector(s)");
        Ok(())
    }

    pub async fn stop(&self, timeout: Duration) -> anyhow::Result<()> {
        self.sectors.stop(timeout).await
    }

    /// Reserves a sector for a piece of `size` unpadded bytes. Returns the
    /// sector and the offset of the piece in it.
    pub async fn allocate_piece(&self, size: u64) -> anyhow::Result<(SectorNumber, u64)> {
        if UnpaddedPieceSize(size).validate().is_err() {
            return Err(SealingError::UnpaddedPiece(size).into());
        }
        let sector_size = self.config().sector_size;
        if UnpaddedPieceSize(size).padded().0 > sector_size {
            return Err(SealingError::PieceTooLarge { size, sector_size }.into());
        }
        let sector = self
            .builder
            .acquire_sector_id()
            .await
            .context("acquiring sector ID")?;
        // one piece per sector
        Ok((sector, 0))
    }

    pub async fn seal_piece(
        &self,
        size: u64,
        data: PieceData,
        sector: SectorNumber,
        deal_id: DealID,
    ) -> anyhow::Result<()> {
        info!("Seal piece for deal {deal_id}");
        let comm_p = self
            .builder
            .add_piece(sector, size, &[], data)
            .await
            .context("adding piece to sector")?;
        self.new_sector(
            sector,
            vec![Piece {
                deal_id,
                size,
                comm_p,
            }],
        )
    }

    /// Starts sealing `sector` with `pieces`.
    pub fn new_sector(&self, sector: SectorNumber, pieces: Vec<Piece>) -> anyhow::Result<()> {
        self.sectors.send(sector, SectorEvent::Start { pieces })
    }

    pub fn get_sector_info(&self, sector: SectorNumber) -> anyhow::Result<SectorInfo> {
        self.sectors
            .get(sector)?
            .ok_or_else(|| SealingError::UnknownSector(sector).into())
    }

    pub fn list_sectors(&self) -> anyhow::Result<Vec<SectorInfo>> {
        let mut sectors = self
            .sectors
            .list()?
            .into_iter()
            .map(|(_, info)| info)
            .collect::<Vec<_>>();
        sectors.sort_by_key(|info| info.sector_id);
        Ok(sectors)
    }

    /// The error that last rejected an event for `sector`, if any.
    pub fn last_error(&self, sector: SectorNumber) -> Option<String> {
        self.sectors.last_error(sector)
    }

    /// Folds a worker result that was reported outside the normal flow,
    /// typically one replayed from the task journal after a restart. What
    /// happens depends only on the state the sector is in now.
    pub async fn worker_resume(
        &self,
        task: &WorkerTask,
        res: &SealRes,
        cfg: &WorkerCfg,
    ) -> anyhow::Result<ResumeStatus> {
        use SectorState::*;

        let info = self.get_sector_info(task.sector_id)?;
        let sector = task.sector_id;
        let status = match info.state {
            Proving => ResumeStatus::Finished,

            PreCommitting | PreCommitted | Committing | CommitWait => ResumeStatus::Pending,

            SealFailed | PreCommitFailed => {
                info!("Resume sector {sector} from {}", info.state);
                // commit results carry the pre-commit output in the task only
                let rspco = match res.rspco.comm_r.is_empty() {
                    true => &task.rspco,
                    false => &res.rspco,
                };
                self.sectors.send(
                    sector,
                    SectorEvent::Sealed {
                        comm_d: rspco.comm_d.clone(),
                        comm_r: rspco.comm_r.clone(),
                        ticket: task.seal_ticket.clone(),
                    },
                )?;
                ResumeStatus::Pending
            }

            SealCommitFailed => match task.task_type {
                TaskType::Commit => {
                    info!("Resume sector {sector} from {}", info.state);
                    let worker_dir = self.builder.worker_dir("workers", &cfg.ip_address)?;
                    self.sectors.send(
                        sector,
                        SectorEvent::ResumeCommit {
                            proof: res.proof.clone(),
                            worker_dir,
                        },
                    )?;
                    ResumeStatus::Pending
                }
                // the commit task has not reported yet
                _ => ResumeStatus::Pending,
            },

            CommitFailed => {
                info!("Resume sector {sector} from {}", info.state);
                self.sectors.send(sector, SectorEvent::RetryCommit)?;
                ResumeStatus::Pending
            }

            FailedUnrecoverable => {
                warn!(
                    "sector {sector} failed unrecoverably ({}), requires operator intervention",
                    info.last_err
                );
                ResumeStatus::NeedsOperator
            }

            // nothing has been dispatched for it yet
            Packing => ResumeStatus::Finished,
        };
        Ok(status)
    }
}

#[async_trait]
impl<DB: SettingsStore + Send + Sync + 'static> TaskResumer for Sealing<DB> {
    async fn worker_resume(
        &self,
        task: &WorkerTask,
        res: &SealRes,
        cfg: &WorkerCfg,
    ) -> anyhow::Result<bool> {
        Ok(Sealing::worker_resume(self, task, res, cfg).await?.finished())
    }
}
