// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{PathType, SectorFileTypes, SectorId, SectorIndex, TaskType, WorkerHandle};

/// Decides which workers may run a task and which of them is preferable.
#[async_trait]
pub trait WorkerSelector: Send + Sync {
    /// Whether `worker` is eligible for `task`.
    async fn ok(&self, task: TaskType, worker: &WorkerHandle) -> anyhow::Result<bool>;

    /// Whether `a` should be preferred over `b`.
    async fn cmp(&self, task: TaskType, a: &WorkerHandle, b: &WorkerHandle) -> anyhow::Result<bool>;
}

/// Prefers workers that already see the sector's data.
pub struct ExistingSelector {
    index: Arc<dyn SectorIndex>,
    sector: SectorId,
    sector_size: u64,
    exist: SectorFileTypes,
    alloc: SectorFileTypes,
    path_type: PathType,
    allow_fetch: bool,
}

impl ExistingSelector {
    pub fn new(
        index: Arc<dyn SectorIndex>,
        sector: SectorId,
        sector_size: u64,
        exist: SectorFileTypes,
        alloc: SectorFileTypes,
        path_type: PathType,
        allow_fetch: bool,
    ) -> Self {
        Self {
            index,
            sector,
            sector_size,
            exist,
            alloc,
            path_type,
            allow_fetch,
        }
    }

    async fn has_local_data(&self, worker: &WorkerHandle) -> anyhow::Result<bool> {
        let holders = self
            .index
            .storage_find_sector(self.sector, self.exist, false)
            .await?;
        Ok(worker.has_any(&holders))
    }
}

#[async_trait]
impl WorkerSelector for ExistingSelector {
    async fn ok(&self, task: TaskType, worker: &WorkerHandle) -> anyhow::Result<bool> {
        if !worker.accept_tasks.contains(&task) {
            return Ok(false);
        }

        if !self.alloc.is_empty() {
            let best = self
                .index
                .storage_best_alloc(self.alloc, self.sector_size, self.path_type)
                .await?;
            if !worker.has_any(&best) {
                return Ok(false);
            }
        }

        let found = self
            .index
            .storage_find_sector(self.sector, self.exist, self.allow_fetch)
            .await?;
        Ok(worker.has_any(&found))
    }

    async fn cmp(
        &self,
        _task: TaskType,
        a: &WorkerHandle,
        b: &WorkerHandle,
    ) -> anyhow::Result<bool> {
        let (a_local, b_local) = (self.has_local_data(a).await?, self.has_local_data(b).await?);
        if a_local != b_local {
            return Ok(a_local);
        }
        Ok(a.utilization() < b.utilization())
    }
}

/// Only looks at task capability. Specialised workers are preferred, which
/// keeps generalists free for the tasks only they can run.
#[derive(Default)]
pub struct TaskSelector;

#[async_trait]
impl WorkerSelector for TaskSelector {
    async fn ok(&self, task: TaskType, worker: &WorkerHandle) -> anyhow::Result<bool> {
        Ok(worker.accept_tasks.contains(&task))
    }

    async fn cmp(
        &self,
        _task: TaskType,
        a: &WorkerHandle,
        b: &WorkerHandle,
    ) -> anyhow::Result<bool> {
        if a.accept_tasks.len() != b.accept_tasks.len() {
            return Ok(a.accept_tasks.len() < b.accept_tasks.len());
        }
        Ok(a.utilization() < b.utilization())
    }
}

/// Requires access to somewhere new sector files can be written.
pub struct AllocSelector {
    index: Arc<dyn SectorIndex>,
    sector_size: u64,
    alloc: SectorFileTypes,
    path_type: PathType,
}

impl AllocSelector {
    pub fn new(
        index: Arc<dyn SectorIndex>,
        sector_size: u64,
        alloc: SectorFileTypes,
        path_type: PathType,
    ) -> Self {
        Self {
            index,
            sector_size,
            alloc,
            path_type,
        }
    }
}

#[async_trait]
impl WorkerSelector for AllocSelector {
    async fn ok(&self, task: TaskType, worker: &WorkerHandle) -> anyhow::Result<bool> {
        if !worker.accept_tasks.contains(&task) {
            return Ok(false);
        }
        let best = self
            .index
            .storage_best_alloc(self.alloc, self.sector_size, self.path_type)
            .await?;
        Ok(worker.has_any(&best))
    }

    async fn cmp(
        &self,
        _task: TaskType,
        a: &WorkerHandle,
        b: &WorkerHandle,
    ) -> anyhow::Result<bool> {
        Ok(a.utilization() < b.utilization())
    }
}

/// Filters `workers` down to the eligible ones and orders them best first.
///
/// A worker whose eligibility check fails is left out, and a failed
/// comparison counts as "not preferred"; neither aborts the pass.
pub async fn rank_workers<'a>(
    selector: &dyn WorkerSelector,
    task: TaskType,
    workers: impl IntoIterator<Item = &'a WorkerHandle>,
) -> Vec<&'a WorkerHandle> {
    let mut eligible = vec![];
    for worker in workers {
        match selector.ok(task, worker).await {
            Ok(true) => eligible.push(worker),
            Ok(false) => {}
            Err(e) => warn!("worker {} excluded from {task}: {e:#}", worker.id),
        }
    }

    // comparisons are async, so this is an insertion sort rather than `sort_by`
    let mut ranked: Vec<&WorkerHandle> = Vec::with_capacity(eligible.len());
    for worker in eligible {
        let mut pos = ranked.len();
        for (i, other) in ranked.iter().enumerate() {
            match selector.cmp(task, worker, other).await {
                Ok(true) => {
                    pos = i;
                    break;
                }
                Ok(false) => {}
                Err(e) => warn!(
                    "comparing workers {} and {} for {task}: {e:#}",
                    worker.id, other.id
                ),
            }
        }
        ranked.insert(pos, worker);
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector_storage::{
        ActiveResources, MemIndex, SectorFileType, StorageId, StorageInfo, StorageStat, WorkerInfo,
        WorkerResources,
    };
    use futures::executor::block_on;
    use itertools::Itertools;
    use quickcheck_macros::quickcheck;
    use strum::IntoEnumIterator;

    const SECTOR: SectorId = SectorId {
        miner: 1000,
        number: 42,
    };

    fn worker(id: u64, tasks: &[TaskType], cpu_use: u64) -> WorkerHandle {
        let mut handle = WorkerHandle::new(
            id,
            WorkerInfo {
                hostname: format!("worker-{id}"),
                resources: WorkerResources {
                    mem_physical: 1 << 30,
                    mem_swap: 0,
                    mem_reserved: 0,
                    cpus: 256,
                },
            },
            tasks.iter().copied(),
        );
        handle.active = ActiveResources {
            cpu_use,
            ..Default::default()
        };
        handle
    }

    async fn index() -> Arc<MemIndex> {
        let index = Arc::new(MemIndex::default());
        for id in ["seal-a", "seal-b"] {
            index
                .storage_attach(
                    StorageInfo {
                        id: id.into(),
                        urls: vec![],
                        weight: 10,
                        can_seal: true,
                        can_store: false,
                    },
                    StorageStat {
                        capacity: 1 << 20,
                        available: 1 << 20,
                        reserved: 0,
                    },
                )
                .await
                .unwrap();
        }
        index
            .storage_declare_sector(
                &"seal-a".into(),
                SECTOR,
                SectorFileType::Sealed | SectorFileType::Cache,
            )
            .await
            .unwrap();
        index
    }

    fn existing(index: Arc<MemIndex>, allow_fetch: bool) -> ExistingSelector {
        ExistingSelector::new(
            index,
            SECTOR,
            2048,
            SectorFileType::Sealed | SectorFileType::Cache,
            SectorFileTypes::empty(),
            PathType::Sealing,
            allow_fetch,
        )
    }

    #[tokio::test]
    async fn existing_selector_requires_task_and_data() {
        let index = index().await;
        let local = worker(1, &[TaskType::Commit], 0).with_paths([StorageId::from("seal-a")]);
        let remote = worker(2, &[TaskType::Commit], 0).with_paths([StorageId::from("seal-b")]);
        let incapable =
            worker(3, &[TaskType::PreCommit], 0).with_paths([StorageId::from("seal-a")]);

        let selector = existing(index.clone(), false);
        assert!(selector.ok(TaskType::Commit, &local).await.unwrap());
        assert!(!selector.ok(TaskType::Commit, &remote).await.unwrap());
        assert!(!selector.ok(TaskType::Commit, &incapable).await.unwrap());

        // with fetching allowed, any sealing location will do
        let selector = existing(index, true);
        assert!(selector.ok(TaskType::Commit, &remote).await.unwrap());
    }

    #[tokio::test]
    async fn existing_selector_prefers_local_data_over_load() {
        let index = index().await;
        let busy_local =
            worker(1, &[TaskType::Commit], 200).with_paths([StorageId::from("seal-a")]);
        let idle_remote = worker(2, &[TaskType::Commit], 0).with_paths([StorageId::from("seal-b")]);
        let selector = existing(index, true);

        let ranked = rank_workers(&selector, TaskType::Commit, [&idle_remote, &busy_local]).await;
        let ids = ranked.iter().map(|w| w.id).collect_vec();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn existing_selector_checks_allocation_room() {
        let index = index().await;
        let selector = ExistingSelector::new(
            index,
            SECTOR,
            1 << 30,
            SectorFileTypes::empty(),
            SectorFileType::Sealed.into(),
            PathType::Sealing,
            true,
        );
        let w = worker(1, &[TaskType::PreCommit], 0).with_paths([StorageId::from("seal-a")]);
        // no location can fit the allocation, so the worker is excluded
        assert!(selector.ok(TaskType::PreCommit, &w).await.is_err());
        assert!(rank_workers(&selector, TaskType::PreCommit, [&w]).await.is_empty());
    }

    #[tokio::test]
    async fn task_selector_prefers_specialists() {
        let all = TaskType::iter().collect_vec();
        let generalist = worker(1, &all, 0);
        let specialist = worker(2, &[TaskType::Commit], 100);
        let other = worker(3, &[TaskType::PreCommit], 0);

        let candidates = [&generalist, &specialist, &other];
        let ranked = rank_workers(&TaskSelector, TaskType::Commit, candidates).await;
        let ids = ranked.iter().map(|w| w.id).collect_vec();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn alloc_selector_needs_allocatable_path() {
        let index = index().await;
        let selector =
            AllocSelector::new(index, 2048, SectorFileType::Unsealed.into(), PathType::Sealing);
        let with_path =
            worker(1, &[TaskType::AddPiece], 10).with_paths([StorageId::from("seal-b")]);
        let without_path = worker(2, &[TaskType::AddPiece], 0);
        let idle = worker(3, &[TaskType::AddPiece], 0).with_paths([StorageId::from("seal-a")]);

        let candidates = [&with_path, &without_path, &idle];
        let ranked = rank_workers(&selector, TaskType::AddPiece, candidates).await;
        let ids = ranked.iter().map(|w| w.id).collect_vec();
        assert_eq!(ids, vec![3, 1]);
    }

    #[quickcheck]
    fn ranking_orders_by_ascending_utilization(loads: Vec<u8>) -> bool {
        let workers = loads
            .iter()
            .enumerate()
            .map(|(i, load)| worker(i as u64, &[TaskType::Commit], u64::from(*load)))
            .collect_vec();
        let ranked = block_on(rank_workers(&TaskSelector, TaskType::Commit, &workers));
        ranked.len() == workers.len()
            && ranked
                .iter()
                .tuple_windows()
                .all(|(a, b)| a.utilization() <= b.utilization())
    }

    #[quickcheck]
    fn existing_cmp_is_transitive(a: u8, b: u8, c: u8) -> bool {
        block_on(async {
            let index = index().await;
            let selector = existing(index, false);
            let ws = [a, b, c]
                .iter()
                .enumerate()
                .map(|(i, load)| {
                    worker(i as u64, &[TaskType::Commit], u64::from(*load))
                        .with_paths([StorageId::from("seal-a")])
                })
                .collect_vec();
            for (x, y, z) in ws.iter().tuple_combinations() {
                let orders = [(x, y, z), (x, z, y), (y, x, z), (y, z, x), (z, x, y), (z, y, x)];
                for (x, y, z) in orders {
                    let xy = selector.cmp(TaskType::Commit, x, y).await.unwrap();
                    let yz = selector.cmp(TaskType::Commit, y, z).await.unwrap();
                    let xz = selector.cmp(TaskType::Commit, x, z).await.unwrap();
                    if xy && yz && !xz {
                        return false;
                    }
                }
            }
            true
        })
    }
}
