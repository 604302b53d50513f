// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Matching of sealing tasks to workers and storage locations.

mod index;
mod manager;
mod resources;
mod selector;

pub use index::{MemIndex, SectorIndex, StorageInfo, StorageStat};
pub use manager::{Manager, WorkerCalls};
pub use resources::{ActiveResources, Resources, WorkerResources};
pub use selector::{AllocSelector, ExistingSelector, TaskSelector, WorkerSelector, rank_workers};

use std::fmt;

use ahash::HashSet;
use enumflags2::{BitFlags, bitflags};
use fvm_shared4::{ActorID, sector::SectorNumber};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Kinds of work a worker may advertise.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum TaskType {
    #[strum(serialize = "seal/v0/addpiece")]
    #[serde(rename = "seal/v0/addpiece")]
    AddPiece,
    #[strum(serialize = "seal/v0/precommit")]
    #[serde(rename = "seal/v0/precommit")]
    PreCommit,
    #[strum(serialize = "seal/v0/commit")]
    #[serde(rename = "seal/v0/commit")]
    Commit,
    #[strum(serialize = "seal/v0/finalize")]
    #[serde(rename = "seal/v0/finalize")]
    Finalize,
    #[strum(serialize = "seal/v0/fetch")]
    #[serde(rename = "seal/v0/fetch")]
    Fetch,
}

/// Files making up a sector on disk.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectorFileType {
    Unsealed = 0b001,
    Sealed = 0b010,
    Cache = 0b100,
}

pub type SectorFileTypes = BitFlags<SectorFileType>;

/// Whether a location is used as scratch space for sealing or for long-term
/// storage of sealed sectors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PathType {
    Storage,
    Sealing,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(pub String);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorId {
    pub miner: ActorID,
    pub number: SectorNumber,
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s-t0{}-{}", self.miner, self.number)
    }
}

pub type WorkerId = u64;

/// What a worker told the scheduler about itself when it connected.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub hostname: String,
    pub resources: WorkerResources,
}

/// The scheduler's view of a single worker.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub info: WorkerInfo,
    pub accept_tasks: HashSet<TaskType>,
    pub paths: Vec<StorageId>,
    pub active: ActiveResources,
}

impl WorkerHandle {
    pub fn new(
        id: WorkerId,
        info: WorkerInfo,
        accept_tasks: impl IntoIterator<Item = TaskType>,
    ) -> Self {
        Self {
            id,
            info,
            accept_tasks: accept_tasks.into_iter().collect(),
            paths: vec![],
            active: ActiveResources::default(),
        }
    }

    pub fn with_paths(mut self, paths: impl IntoIterator<Item = StorageId>) -> Self {
        self.paths = paths.into_iter().collect();
        self
    }

    pub fn utilization(&self) -> f64 {
        self.active.utilization(&self.info.resources)
    }

    fn has_any(&self, locations: &[StorageInfo]) -> bool {
        locations.iter().any(|info| self.paths.contains(&info.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn task_type_names() {
        assert_eq!(TaskType::PreCommit.to_string(), "seal/v0/precommit");
        assert_eq!(TaskType::from_str("seal/v0/commit").unwrap(), TaskType::Commit);
        assert_eq!(
            serde_json::to_string(&TaskType::AddPiece).unwrap(),
            "\"seal/v0/addpiece\""
        );
    }

    #[test]
    fn sector_id_display() {
        let id = SectorId {
            miner: 1000,
            number: 42,
        };
        assert_eq!(id.to_string(), "s-t01000-42");
    }

    #[test]
    fn file_type_flags() {
        let types = SectorFileType::Sealed | SectorFileType::Cache;
        assert!(types.contains(SectorFileType::Cache));
        assert!(!types.contains(SectorFileType::Unsealed));
        assert_eq!(types.bits(), 0b110);
    }
}
