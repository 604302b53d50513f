// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp::Reverse;

use ahash::{HashMap, HashMapExt as _};
use anyhow::bail;
use async_trait::async_trait;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{PathType, SectorFileType, SectorFileTypes, SectorId, StorageId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub id: StorageId,
    pub urls: Vec<String>,
    pub weight: u64,
    pub can_seal: bool,
    pub can_store: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStat {
    pub capacity: u64,
    pub available: u64,
    pub reserved: u64,
}

impl StorageStat {
    fn free(&self) -> u64 {
        self.available.saturating_sub(self.reserved)
    }
}

/// Tracks which storage locations exist and which sector files they hold.
#[async_trait]
pub trait SectorIndex: Send + Sync {
    async fn storage_attach(&self, info: StorageInfo, stat: StorageStat) -> anyhow::Result<()>;

    async fn storage_declare_sector(
        &self,
        storage: &StorageId,
        sector: SectorId,
        file_types: SectorFileTypes,
    ) -> anyhow::Result<()>;

    async fn storage_drop_sector(
        &self,
        storage: &StorageId,
        sector: SectorId,
        file_types: SectorFileTypes,
    ) -> anyhow::Result<()>;

    /// Locations holding any of `file_types` of `sector`, those holding the
    /// most file types first. With `allow_fetch`, every other sealing
    /// location follows as a candidate to fetch into.
    async fn storage_find_sector(
        &self,
        sector: SectorId,
        file_types: SectorFileTypes,
        allow_fetch: bool,
    ) -> anyhow::Result<Vec<StorageInfo>>;

    /// Locations of `path_type` with room for `allocate` files of a sector
    /// of `sector_size` bytes, best first.
    async fn storage_best_alloc(
        &self,
        allocate: SectorFileTypes,
        sector_size: u64,
        path_type: PathType,
    ) -> anyhow::Result<Vec<StorageInfo>>;
}

#[derive(Default)]
struct IndexState {
    stores: HashMap<StorageId, (StorageInfo, StorageStat)>,
    sectors: HashMap<(SectorId, SectorFileType), Vec<StorageId>>,
}

/// In-process [`SectorIndex`].
#[derive(Default)]
pub struct MemIndex {
    state: RwLock<IndexState>,
}

#[async_trait]
impl SectorIndex for MemIndex {
    async fn storage_attach(&self, info: StorageInfo, stat: StorageStat) -> anyhow::Result<()> {
        self.state
            .write()
            .stores
            .insert(info.id.clone(), (info, stat));
        Ok(())
    }

    async fn storage_declare_sector(
        &self,
        storage: &StorageId,
        sector: SectorId,
        file_types: SectorFileTypes,
    ) -> anyhow::Result<()> {
        let mut state = self.state.write();
        if !state.stores.contains_key(storage) {
            bail!("storage {storage} is not attached");
        }
        for ft in file_types.iter() {
            let holders = state.sectors.entry((sector, ft)).or_default();
            if !holders.contains(storage) {
                holders.push(storage.clone());
            }
        }
        Ok(())
    }

    async fn storage_drop_sector(
        &self,
        storage: &StorageId,
        sector: SectorId,
        file_types: SectorFileTypes,
    ) -> anyhow::Result<()> {
        let mut state = self.state.write();
        for ft in file_types.iter() {
            if let Some(holders) = state.sectors.get_mut(&(sector, ft)) {
                holders.retain(|id| id != storage);
                if holders.is_empty() {
                    state.sectors.remove(&(sector, ft));
                }
            }
        }
        Ok(())
    }

    async fn storage_find_sector(
        &self,
        sector: SectorId,
        file_types: SectorFileTypes,
        allow_fetch: bool,
    ) -> anyhow::Result<Vec<StorageInfo>> {
        let state = self.state.read();
        let mut matches: HashMap<&StorageId, usize> = HashMap::new();
        for ft in file_types.iter() {
            for id in state.sectors.get(&(sector, ft)).into_iter().flatten() {
                *matches.entry(id).or_default() += 1;
            }
        }

        let mut found = vec![];
        for (id, count) in &matches {
            let Some((info, _)) = state.stores.get(*id) else {
                bail!("sector {sector} declared in unknown storage {id}");
            };
            found.push((info.clone(), *count));
        }
        let mut out = found
            .into_iter()
            .sorted_by_key(|(info, count)| (Reverse(*count), Reverse(info.weight), info.id.clone()))
            .map(|(info, _)| info)
            .collect_vec();

        if allow_fetch {
            let fetch_targets = state
                .stores
                .values()
                .filter(|(info, _)| info.can_seal && !matches.contains_key(&info.id))
                .map(|(info, _)| info.clone())
                .sorted_by_key(|info| (Reverse(info.weight), info.id.clone()))
                .collect_vec();
            out.extend(fetch_targets);
        }
        Ok(out)
    }

    async fn storage_best_alloc(
        &self,
        allocate: SectorFileTypes,
        sector_size: u64,
        path_type: PathType,
    ) -> anyhow::Result<Vec<StorageInfo>> {
        let needed = sector_size.saturating_mul(allocate.iter().count() as u64);
        let state = self.state.read();
        let candidates = state
            .stores
            .values()
            .filter(|(info, _)| match path_type {
                PathType::Sealing => info.can_seal,
                PathType::Storage => info.can_store,
            })
            .filter(|(_, stat)| stat.free() >= needed)
            .sorted_by_key(|(info, stat)| {
                (
                    Reverse(u128::from(stat.free()) * u128::from(info.weight)),
                    info.id.clone(),
                )
            })
            .map(|(info, _)| info.clone())
            .collect_vec();
        if candidates.is_empty() {
            bail!("no good path found for {path_type} allocation");
        }
        Ok(candidates)
    }
}
