// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sealing workers.
//!
//! A [`LocalWorker`] runs pre-commit and commit tasks through an opaque
//! [`Sealer`], writes every result to the [`TaskStore`] journal before it is
//! reported back, and replays that journal on start-up so results produced
//! before a crash are not lost.

mod store;
mod task;

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use self::store::{TASK_TTL, TaskStore};
pub use self::task::{SealRes, Task, WorkerCfg, WorkerTask};
use crate::db::SettingsStore;
use crate::metrics;
use crate::sealing::PreCommitOutput;
use crate::sector_storage::{TaskType, WorkerCalls};
use crate::snark::SnarkCtl;

/// The proving primitives. Implementations wrap the native proof library and
/// are not part of this crate.
#[async_trait]
pub trait Sealer: Send + Sync {
    async fn seal_pre_commit(
        &self,
        dir: &Path,
        task: &WorkerTask,
    ) -> anyhow::Result<PreCommitOutput>;

    /// `snark` is the remote proving endpoint reserved for this call, if any.
    async fn seal_commit(
        &self,
        dir: &Path,
        task: &WorkerTask,
        snark: Option<&str>,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Receives journaled results when a worker starts. Returns whether the
/// result has been folded into the sector and the entry can be dropped.
#[async_trait]
pub trait TaskResumer: Send + Sync {
    async fn worker_resume(
        &self,
        task: &WorkerTask,
        res: &SealRes,
        cfg: &WorkerCfg,
    ) -> anyhow::Result<bool>;
}

pub struct LocalWorker<DB> {
    cfg: WorkerCfg,
    sealer: Arc<dyn Sealer>,
    journal: TaskStore<DB>,
    snark: Option<Arc<SnarkCtl>>,
    enabled: AtomicBool,
    cancel: CancellationToken,
}

impl<DB: SettingsStore + Send + Sync> LocalWorker<DB> {
    pub fn new(cfg: WorkerCfg, sealer: Arc<dyn Sealer>, journal: TaskStore<DB>) -> Self {
        Self {
            cfg,
            sealer,
            journal,
            snark: None,
            enabled: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        }
    }

    /// Commit proofs reserve an endpoint from `snark` while they run. A pool
    /// that is not enabled is ignored.
    pub fn with_snark(mut self, snark: Arc<SnarkCtl>) -> Self {
        if snark.enabled() {
            self.snark = Some(snark);
        }
        self
    }

    pub fn cfg(&self) -> &WorkerCfg {
        &self.cfg
    }

    pub fn journal(&self) -> &TaskStore<DB> {
        &self.journal
    }

    pub fn accepted_tasks(&self) -> Vec<TaskType> {
        let mut tasks = vec![];
        if !self.cfg.no_pre_commit {
            tasks.push(TaskType::PreCommit);
        }
        if !self.cfg.no_commit {
            tasks.push(TaskType::Commit);
        }
        tasks
    }

    pub fn set_enabled(&self, enabled: bool) {
        info!("worker {} enabled: {enabled}", self.cfg.ip_address);
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Aborts pending waits for a proving endpoint.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn sector_dir(&self, task: &WorkerTask) -> PathBuf {
        self.cfg.directory.join(format!("s-{}", task.sector_id))
    }

    /// Feeds every journaled result back to `resumer`. Entries reported as
    /// finished are dropped; everything else stays for the next start-up or
    /// until it expires. Returns the number of entries dropped.
    pub async fn resume_stored_tasks(&self, resumer: &dyn TaskResumer) -> anyhow::Result<usize> {
        let tasks = self.journal.list_tasks()?;
        info!("replaying {} journaled task(s)", tasks.len());
        let mut finished = 0;
        for Task { worker_task, seal_res } in tasks {
            let sector = worker_task.sector_id;
            match resumer.worker_resume(&worker_task, &seal_res, &self.cfg).await {
                Ok(true) => {
                    self.journal.delete(sector)?;
                    finished += 1;
                }
                Ok(false) => debug!("task for sector {sector} still pending"),
                Err(e) => warn!("failed to resume task for sector {sector}: {e:#}"),
            }
        }
        Ok(finished)
    }

    async fn process(&self, task: &WorkerTask) -> anyhow::Result<SealRes> {
        let dir = self.sector_dir(task);
        match task.task_type {
            TaskType::PreCommit => {
                let rspco = self.sealer.seal_pre_commit(&dir, task).await?;
                Ok(SealRes {
                    rspco,
                    ..Default::default()
                })
            }
            TaskType::Commit => {
                let proof = match &self.snark {
                    Some(snark) => {
                        let lease = snark.lease(&self.cancel).await?;
                        self.sealer.seal_commit(&dir, task, Some(lease.path())).await?
                    }
                    None => self.sealer.seal_commit(&dir, task, None).await?,
                };
                Ok(SealRes {
                    proof,
                    rspco: task.rspco.clone(),
                    ..Default::default()
                })
            }
            other => bail!("unsupported task {other}"),
        }
    }

    /// Runs `task` and journals the result. Failures of the task itself are
    /// carried in the returned [`SealRes`]; only journaling errors fail the
    /// call.
    async fn run(&self, task: WorkerTask) -> anyhow::Result<SealRes> {
        if !self.enabled() {
            bail!("worker {} is disabled", self.cfg.ip_address);
        }
        if !self.accepted_tasks().contains(&task.task_type) {
            bail!("worker {} does not accept {}", self.cfg.ip_address, task.task_type);
        }
        debug!("running {} for sector {}", task.task_type, task.sector_id);
        let res = match self.process(&task).await {
            Ok(res) => res,
            Err(e) => {
                warn!("{} for sector {} failed: {e:#}", task.task_type, task.sector_id);
                SealRes::from_error(&e)
            }
        };
        let sector = task.sector_id;
        self.journal
            .put_task(&Task {
                worker_task: task,
                seal_res: res.clone(),
            })
            .with_context(|| format!("result for sector {sector} was not journaled"))?;
        metrics::WORKER_TASKS_JOURNALED.inc();
        Ok(res)
    }
}

#[async_trait]
impl<DB: SettingsStore + Send + Sync> WorkerCalls for LocalWorker<DB> {
    async fn seal_pre_commit(&self, task: WorkerTask) -> anyhow::Result<SealRes> {
        self.run(task).await
    }

    async fn seal_commit(&self, task: WorkerTask) -> anyhow::Result<SealRes> {
        self.run(task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDB;
    use crate::sealing::SealTicket;
    use crate::snark::{SnarkInfo, SnarkState, SnarkUrl, write_snark_file};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct FakeSealer {
        fail: bool,
        slow: bool,
        snarks: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Sealer for FakeSealer {
        async fn seal_pre_commit(
            &self,
            dir: &Path,
            task: &WorkerTask,
        ) -> anyhow::Result<PreCommitOutput> {
            if self.fail {
                bail!("out of disk");
            }
            assert!(dir.ends_with(format!("s-{}", task.sector_id)));
            Ok(PreCommitOutput {
                comm_d: vec![1; 32],
                comm_r: vec![2; 32],
            })
        }

        async fn seal_commit(
            &self,
            _dir: &Path,
            _task: &WorkerTask,
            snark: Option<&str>,
        ) -> anyhow::Result<Vec<u8>> {
            self.snarks.lock().push(snark.map(str::to_owned));
            if self.slow {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            }
            if self.fail {
                bail!("proof failed");
            }
            Ok(vec![9; 192])
        }
    }

    fn task(task_type: TaskType, sector: u64) -> WorkerTask {
        WorkerTask {
            task_type,
            task_id: sector,
            sector_id: sector,
            seal_ticket: SealTicket {
                block_height: 100,
                ticket_bytes: vec![7; 32],
            },
            pieces: vec![],
            seal_seed: Default::default(),
            rspco: Default::default(),
        }
    }

    fn worker(sealer: Arc<FakeSealer>, cfg: WorkerCfg) -> LocalWorker<Arc<MemoryDB>> {
        LocalWorker::new(cfg, sealer, TaskStore::new(Arc::new(MemoryDB::default())))
    }

    #[tokio::test]
    async fn results_are_journaled_before_returning() {
        let worker = worker(Arc::new(FakeSealer::default()), WorkerCfg::default());
        let res = worker.seal_pre_commit(task(TaskType::PreCommit, 42)).await.unwrap();
        assert_eq!(res.rspco.comm_r, vec![2; 32]);

        let stored = worker.journal().get_task(42).unwrap().unwrap();
        assert_eq!(stored.seal_res, res);
        assert_eq!(stored.worker_task.task_type, TaskType::PreCommit);
    }

    #[tokio::test]
    async fn failures_are_journaled_as_results() {
        let worker = worker(
            Arc::new(FakeSealer {
                fail: true,
                ..Default::default()
            }),
            WorkerCfg::default(),
        );
        let res = worker.seal_pre_commit(task(TaskType::PreCommit, 1)).await.unwrap();
        assert!(res.err.contains("out of disk"));
        assert!(res.into_result().is_err());
        assert!(worker.journal().get_task(1).unwrap().is_some());
    }

    #[tokio::test]
    async fn refuses_disabled_and_unaccepted_tasks() {
        let worker = worker(
            Arc::new(FakeSealer::default()),
            WorkerCfg {
                no_commit: true,
                ..Default::default()
            },
        );
        assert_eq!(worker.accepted_tasks(), vec![TaskType::PreCommit]);
        assert!(worker.seal_commit(task(TaskType::Commit, 1)).await.is_err());

        worker.set_enabled(false);
        assert!(!worker.enabled());
        assert!(worker.seal_pre_commit(task(TaskType::PreCommit, 1)).await.is_err());
        assert!(worker.journal().list_tasks().unwrap().is_empty());
    }

    fn single_snark(dir: &Path) -> Arc<SnarkCtl> {
        let path = dir.join("snark.json");
        write_snark_file(
            &path,
            &SnarkInfo {
                snark_urls: vec![SnarkUrl {
                    path: "/a".into(),
                    state: SnarkState::Free,
                }],
            },
        )
        .unwrap();
        Arc::new(SnarkCtl::new(&path, true))
    }

    #[tokio::test]
    async fn commit_reserves_and_releases_a_snark() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = single_snark(dir.path());
        let sealer = Arc::new(FakeSealer {
            fail: true,
            ..Default::default()
        });
        let worker = worker(sealer.clone(), WorkerCfg::default()).with_snark(ctl.clone());

        // released even when the proof fails
        let res = worker.seal_commit(task(TaskType::Commit, 3)).await.unwrap();
        assert!(!res.err.is_empty());
        assert_eq!(*sealer.snarks.lock(), vec![Some("/a".to_owned())]);
        assert_eq!(ctl.get_snark().unwrap().free_count(), 1);
    }

    #[tokio::test]
    async fn aborted_commit_releases_its_snark() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = single_snark(dir.path());
        let sealer = Arc::new(FakeSealer {
            slow: true,
            ..Default::default()
        });
        let worker = Arc::new(worker(sealer.clone(), WorkerCfg::default()).with_snark(ctl.clone()));

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.seal_commit(task(TaskType::Commit, 4)).await }
        });
        for _ in 0..500 {
            if !sealer.snarks.lock().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(ctl.get_snark().unwrap().free_count(), 0);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(ctl.get_snark().unwrap().free_count(), 1);
        assert!(worker.journal().get_task(4).unwrap().is_none());
    }

    struct Resumer {
        finished: Vec<u64>,
    }

    #[async_trait]
    impl TaskResumer for Resumer {
        async fn worker_resume(
            &self,
            task: &WorkerTask,
            _res: &SealRes,
            _cfg: &WorkerCfg,
        ) -> anyhow::Result<bool> {
            if task.sector_id == 99 {
                bail!("unknown sector");
            }
            Ok(self.finished.contains(&task.sector_id))
        }
    }

    #[tokio::test]
    async fn replay_drops_finished_entries_only() {
        let worker = worker(Arc::new(FakeSealer::default()), WorkerCfg::default());
        for sector in [1, 2, 99] {
            worker.seal_pre_commit(task(TaskType::PreCommit, sector)).await.unwrap();
        }
        let dropped = worker
            .resume_stored_tasks(&Resumer { finished: vec![1] })
            .await
            .unwrap();
        assert_eq!(dropped, 1);

        let mut left = worker
            .journal()
            .list_tasks()
            .unwrap()
            .into_iter()
            .map(|t| t.worker_task.sector_id)
            .collect::<Vec<_>>();
        left.sort();
        assert_eq!(left, vec![2, 99]);
    }
}
