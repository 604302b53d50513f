// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ahash::HashMap;
use anyhow::Context as _;
use async_trait::async_trait;
use fvm_shared4::{ActorID, sector::SectorNumber};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{
    ActiveResources, AllocSelector, ExistingSelector, PathType, Resources, SectorFileType,
    SectorFileTypes, SectorId, SectorIndex, StorageId, TaskSelector, TaskType, WorkerHandle,
    WorkerId, WorkerInfo, WorkerResources, WorkerSelector, rank_workers,
};
use crate::sealing::{Piece, PreCommitOutput, SealSeed, SealTicket};
use crate::worker::{SealRes, WorkerTask};

/// Operations a worker executes on behalf of the scheduler.
#[async_trait]
pub trait WorkerCalls: Send + Sync {
    async fn seal_pre_commit(&self, task: WorkerTask) -> anyhow::Result<SealRes>;
    async fn seal_commit(&self, task: WorkerTask) -> anyhow::Result<SealRes>;
}

struct WorkerEntry {
    handle: WorkerHandle,
    calls: Arc<dyn WorkerCalls>,
}

/// Resources claimed on a worker, returned to it on drop.
struct Reservation<'a> {
    manager: &'a Manager,
    worker: WorkerId,
    needs: Resources,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.manager.release(self.worker, &self.needs);
    }
}

/// Hands sealing tasks to the best available worker.
///
/// When no worker can take a task the caller waits until a worker joins or a
/// running task releases its resources.
pub struct Manager {
    index: Option<Arc<dyn SectorIndex>>,
    miner: ActorID,
    sector_size: u64,
    workers: Mutex<HashMap<WorkerId, WorkerEntry>>,
    next_worker: AtomicU64,
    next_task: AtomicU64,
    changed: Notify,
}

impl Manager {
    /// A scheduler that takes storage locations into account.
    pub fn new(index: Arc<dyn SectorIndex>, miner: ActorID, sector_size: u64) -> Self {
        Self::build(Some(index), miner, sector_size)
    }

    /// A scheduler for workers that keep sector files to themselves; only
    /// task capability is considered.
    pub fn without_storage(miner: ActorID, sector_size: u64) -> Self {
        Self::build(None, miner, sector_size)
    }

    fn build(index: Option<Arc<dyn SectorIndex>>, miner: ActorID, sector_size: u64) -> Self {
        Self {
            index,
            miner,
            sector_size,
            workers: Default::default(),
            next_worker: AtomicU64::new(0),
            next_task: AtomicU64::new(0),
            changed: Notify::new(),
        }
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    pub fn add_worker(
        &self,
        info: WorkerInfo,
        accept_tasks: impl IntoIterator<Item = TaskType>,
        paths: impl IntoIterator<Item = StorageId>,
        calls: Arc<dyn WorkerCalls>,
    ) -> WorkerId {
        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let handle = WorkerHandle::new(id, info, accept_tasks).with_paths(paths);
        info!(
            "worker {id} ({}) joined, accepts {:?}",
            handle.info.hostname, handle.accept_tasks
        );
        self.workers.lock().insert(id, WorkerEntry { handle, calls });
        self.changed.notify_waiters();
        id
    }

    pub fn remove_worker(&self, id: WorkerId) -> bool {
        self.workers.lock().remove(&id).is_some()
    }

    /// Snapshot of every connected worker.
    pub fn workers(&self) -> Vec<WorkerHandle> {
        self.workers
            .lock()
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    fn selector(&self, task: TaskType, sector: SectorId) -> Box<dyn WorkerSelector> {
        let Some(index) = self.index.clone() else {
            return Box::new(TaskSelector);
        };
        let sealed = SectorFileType::Sealed | SectorFileType::Cache;
        match task {
            TaskType::PreCommit => {
                Box::new(AllocSelector::new(index, self.sector_size, sealed, PathType::Sealing))
            }
            TaskType::Commit => Box::new(ExistingSelector::new(
                index,
                sector,
                self.sector_size,
                sealed,
                SectorFileTypes::empty(),
                PathType::Sealing,
                true,
            )),
            _ => Box::new(TaskSelector),
        }
    }

    /// Whether any connected worker accepts `task` and could run it once
    /// idle.
    pub fn schedulable(&self, task: TaskType) -> bool {
        let needs = Resources::for_task(task, self.sector_size);
        self.workers.lock().values().any(|entry| {
            entry.handle.accept_tasks.contains(&task)
                && has_room(&entry.handle.info.resources, &ActiveResources::default(), &needs)
        })
    }

    /// Reserves resources on the best worker for `task`, waiting until one
    /// becomes available.
    async fn acquire(
        &self,
        task: TaskType,
        sector: SectorId,
    ) -> (Arc<dyn WorkerCalls>, Reservation<'_>) {
        let selector = self.selector(task, sector);
        let needs = Resources::for_task(task, self.sector_size);
        let mut warned = false;
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let candidates = self
                .workers()
                .into_iter()
                .filter(|w| fits(w, &needs))
                .collect::<Vec<_>>();
            let ranked = rank_workers(selector.as_ref(), task, &candidates).await;
            for worker in ranked {
                if let Some(calls) = self.reserve(worker.id, &needs) {
                    debug!("{task} for {sector} assigned to worker {}", worker.id);
                    let reservation = Reservation {
                        manager: self,
                        worker: worker.id,
                        needs,
                    };
                    return (calls, reservation);
                }
            }
            if !warned && !self.schedulable(task) {
                warn!(
                    "no connected worker can run {task} for {sector} ({} threads, {} bytes), \
                     waiting for one to join",
                    needs.threads, needs.min_memory
                );
                warned = true;
            }
            debug!("no worker available for {task} on {sector}, waiting");
            changed.await;
        }
    }

    fn reserve(&self, id: WorkerId, needs: &Resources) -> Option<Arc<dyn WorkerCalls>> {
        let mut workers = self.workers.lock();
        let entry = workers.get_mut(&id)?;
        if !fits(&entry.handle, needs) {
            return None;
        }
        entry.handle.active.add(needs);
        Some(entry.calls.clone())
    }

    fn release(&self, id: WorkerId, needs: &Resources) {
        if let Some(entry) = self.workers.lock().get_mut(&id) {
            entry.handle.active.free(needs);
        }
        self.changed.notify_waiters();
    }

    fn sector_id(&self, number: SectorNumber) -> SectorId {
        SectorId {
            miner: self.miner,
            number,
        }
    }

    fn task(
        &self,
        task_type: TaskType,
        sector: SectorNumber,
        ticket: SealTicket,
        pieces: Vec<Piece>,
    ) -> WorkerTask {
        WorkerTask {
            task_type,
            task_id: self.next_task.fetch_add(1, Ordering::Relaxed),
            sector_id: sector,
            seal_ticket: ticket,
            pieces,
            seal_seed: Default::default(),
            rspco: Default::default(),
        }
    }

    pub async fn seal_pre_commit(
        &self,
        sector: SectorNumber,
        ticket: SealTicket,
        pieces: Vec<Piece>,
    ) -> anyhow::Result<PreCommitOutput> {
        let sid = self.sector_id(sector);
        let task = self.task(TaskType::PreCommit, sector, ticket, pieces);
        let (calls, reservation) = self.acquire(TaskType::PreCommit, sid).await;
        let worker = reservation.worker;
        let res = calls.seal_pre_commit(task).await;
        drop(reservation);
        let out = res
            .and_then(SealRes::into_result)
            .with_context(|| format!("pre-commit of {sid} on worker {worker}"))?
            .rspco;
        if out.is_empty() {
            anyhow::bail!("worker {worker} returned no commitments for {sid}");
        }
        self.declare_sealed(worker, sid).await?;
        Ok(out)
    }

    pub async fn seal_commit(
        &self,
        sector: SectorNumber,
        ticket: SealTicket,
        seed: SealSeed,
        pieces: Vec<Piece>,
        rspco: PreCommitOutput,
    ) -> anyhow::Result<Vec<u8>> {
        let sid = self.sector_id(sector);
        let mut task = self.task(TaskType::Commit, sector, ticket, pieces);
        task.seal_seed = seed;
        task.rspco = rspco;
        let (calls, reservation) = self.acquire(TaskType::Commit, sid).await;
        let worker = reservation.worker;
        let res = calls.seal_commit(task).await;
        drop(reservation);
        Ok(res
            .and_then(SealRes::into_result)
            .with_context(|| format!("commit of {sid} on worker {worker}"))?
            .proof)
    }

    /// Records that the sealed files of `sector` now live on `worker`'s
    /// first storage path.
    async fn declare_sealed(&self, worker: WorkerId, sector: SectorId) -> anyhow::Result<()> {
        let Some(index) = &self.index else {
            return Ok(());
        };
        let path = self
            .workers
            .lock()
            .get(&worker)
            .and_then(|entry| entry.handle.paths.first().cloned());
        if let Some(path) = path {
            index
                .storage_declare_sector(
                    &path,
                    sector,
                    SectorFileType::Sealed | SectorFileType::Cache,
                )
                .await?;
        }
        Ok(())
    }
}

/// Whether `worker` has room for a task needing `needs`.
fn fits(worker: &WorkerHandle, needs: &Resources) -> bool {
    has_room(&worker.info.resources, &worker.active, needs)
}

fn has_room(res: &WorkerResources, active: &ActiveResources, needs: &Resources) -> bool {
    active.cpu_use.saturating_add(needs.threads) <= res.cpus
        && active
            .mem_used_min
            .saturating_add(needs.min_memory)
            .saturating_add(res.mem_reserved)
            <= res.mem_physical
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector_storage::{MemIndex, StorageInfo, StorageStat, WorkerResources};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeWorker {
        comm_r: Vec<u8>,
        fail: bool,
        slow: bool,
    }

    #[async_trait]
    impl WorkerCalls for FakeWorker {
        async fn seal_pre_commit(&self, task: WorkerTask) -> anyhow::Result<SealRes> {
            if self.fail {
                return Ok(SealRes::from_error(&anyhow::anyhow!("boom")));
            }
            Ok(SealRes {
                rspco: PreCommitOutput {
                    comm_d: vec![task.sector_id as u8],
                    comm_r: self.comm_r.clone(),
                },
                ..Default::default()
            })
        }

        async fn seal_commit(&self, task: WorkerTask) -> anyhow::Result<SealRes> {
            let delay = if self.slow { 60_000 } else { 50 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(SealRes {
                proof: task.seal_seed.ticket_bytes.clone(),
                ..Default::default()
            })
        }
    }

    fn no_paths() -> Vec<StorageId> {
        vec![]
    }

    fn info(cpus: u64) -> WorkerInfo {
        WorkerInfo {
            hostname: "test".into(),
            resources: WorkerResources {
                mem_physical: 1 << 30,
                mem_swap: 0,
                mem_reserved: 0,
                cpus,
            },
        }
    }

    #[tokio::test]
    async fn pre_commit_runs_on_capable_worker() {
        let manager = Manager::without_storage(1000, 2048);
        manager.add_worker(
            info(4),
            [TaskType::Commit],
            no_paths(),
            Arc::new(FakeWorker {
                comm_r: vec![],
                fail: true,
                ..Default::default()
            }),
        );
        manager.add_worker(
            info(4),
            [TaskType::PreCommit],
            no_paths(),
            Arc::new(FakeWorker {
                comm_r: vec![9],
                fail: false,
                ..Default::default()
            }),
        );
        let out = manager
            .seal_pre_commit(42, SealTicket::default(), vec![])
            .await
            .unwrap();
        assert_eq!(out.comm_d, vec![42]);
        assert_eq!(out.comm_r, vec![9]);
    }

    #[tokio::test]
    async fn worker_errors_and_empty_output_fail() {
        let manager = Manager::without_storage(1000, 2048);
        let id = manager.add_worker(
            info(4),
            [TaskType::PreCommit],
            no_paths(),
            Arc::new(FakeWorker {
                comm_r: vec![],
                fail: true,
                ..Default::default()
            }),
        );
        let err = manager
            .seal_pre_commit(1, SealTicket::default(), vec![])
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("boom"));

        manager.remove_worker(id);
        manager.add_worker(
            info(4),
            [TaskType::PreCommit],
            no_paths(),
            Arc::new(FakeWorker {
                comm_r: vec![],
                fail: false,
                ..Default::default()
            }),
        );
        assert!(
            manager
                .seal_pre_commit(1, SealTicket::default(), vec![])
                .await
                .is_err()
        );
        // resources are released after a failure
        assert!(manager.workers().iter().all(|w| w.utilization() == 0.0));
    }

    #[tokio::test]
    async fn waits_for_a_worker_to_join() {
        let manager = Arc::new(Manager::without_storage(1000, 2048));
        let pending = tokio::spawn({
            let manager = manager.clone();
            async move {
                manager
                    .seal_pre_commit(3, SealTicket::default(), vec![])
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        manager.add_worker(
            info(4),
            [TaskType::PreCommit],
            no_paths(),
            Arc::new(FakeWorker {
                comm_r: vec![1],
                fail: false,
                ..Default::default()
            }),
        );
        let out = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(out.comm_r, vec![1]);
    }

    #[tokio::test]
    async fn saturated_worker_queues_tasks() {
        let manager = Arc::new(Manager::without_storage(1000, 2048));
        // room for a single commit at a time
        manager.add_worker(
            info(2),
            [TaskType::Commit],
            no_paths(),
            Arc::new(FakeWorker {
                comm_r: vec![],
                fail: false,
                ..Default::default()
            }),
        );
        let seed = |b: u8| SealSeed {
            block_height: 1,
            ticket_bytes: vec![b],
        };
        let (a, b) = tokio::join!(
            manager.seal_commit(1, SealTicket::default(), seed(1), vec![], Default::default()),
            manager.seal_commit(2, SealTicket::default(), seed(2), vec![], Default::default()),
        );
        assert_eq!(a.unwrap(), vec![1]);
        assert_eq!(b.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn aborted_task_returns_its_resources() {
        let manager = Arc::new(Manager::without_storage(1000, 2048));
        manager.add_worker(
            info(2),
            [TaskType::Commit],
            no_paths(),
            Arc::new(FakeWorker {
                slow: true,
                ..Default::default()
            }),
        );
        let running = tokio::spawn({
            let manager = manager.clone();
            async move {
                let seed = SealSeed::default();
                manager
                    .seal_commit(1, SealTicket::default(), seed, vec![], Default::default())
                    .await
            }
        });
        for _ in 0..500 {
            if manager.workers()[0].active.cpu_use > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.workers()[0].active.cpu_use, 2);

        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());
        assert_eq!(manager.workers()[0].active, ActiveResources::default());
    }

    #[test]
    fn schedulable_needs_a_worker_big_enough() {
        let manager = Manager::without_storage(1000, 2048);
        let idle = || Arc::new(FakeWorker::default());
        assert!(!manager.schedulable(TaskType::Commit));
        // a commit needs two threads
        manager.add_worker(info(1), [TaskType::Commit], no_paths(), idle());
        assert!(!manager.schedulable(TaskType::Commit));
        manager.add_worker(info(4), [TaskType::PreCommit], no_paths(), idle());
        assert!(!manager.schedulable(TaskType::Commit));
        assert!(manager.schedulable(TaskType::PreCommit));
        manager.add_worker(info(4), [TaskType::Commit], no_paths(), idle());
        assert!(manager.schedulable(TaskType::Commit));
    }

    #[tokio::test]
    async fn commit_prefers_worker_holding_sealed_files() {
        let index = Arc::new(MemIndex::default());
        for id in ["a", "b"] {
            index
                .storage_attach(
                    StorageInfo {
                        id: id.into(),
                        urls: vec![],
                        weight: 1,
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
        let manager = Manager::new(index.clone(), 1000, 2048);
        let on_a = manager.add_worker(
            info(8),
            [TaskType::PreCommit, TaskType::Commit],
            [StorageId::from("a")],
            Arc::new(FakeWorker {
                comm_r: vec![1],
                fail: false,
                ..Default::default()
            }),
        );
        manager
            .seal_pre_commit(5, SealTicket::default(), vec![])
            .await
            .unwrap();
        let holders = index
            .storage_find_sector(
                SectorId {
                    miner: 1000,
                    number: 5,
                },
                SectorFileType::Sealed.into(),
                false,
            )
            .await
            .unwrap();
        assert_eq!(holders[0].id, StorageId::from("a"));

        manager.add_worker(
            info(8),
            [TaskType::Commit],
            [StorageId::from("b")],
            Arc::new(FakeWorker {
                comm_r: vec![],
                fail: false,
                ..Default::default()
            }),
        );
        let selector = manager.selector(TaskType::Commit, manager.sector_id(5));
        let workers = manager.workers();
        let ranked = rank_workers(selector.as_ref(), TaskType::Commit, &workers).await;
        assert_eq!(ranked[0].id, on_a);
        assert_eq!(ranked.len(), 2);
    }
}
