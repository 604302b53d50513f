// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use anyhow::Context as _;
use chrono::Duration;
use fvm_shared4::sector::SectorNumber;

use super::Task;
use crate::db::{ExpiringStore, SettingsStore, setting_keys::TASK_STORE_PREFIX};
use crate::utils::clock::Clock;

/// How long a journal entry survives without being deleted.
pub const TASK_TTL: Duration = Duration::hours(72);

/// Journal of worker task results, keyed by sector number.
pub struct TaskStore<DB> {
    store: ExpiringStore<DB>,
}

fn key(sector: SectorNumber) -> String {
    format!("{TASK_STORE_PREFIX}/{sector}")
}

impl<DB: SettingsStore> TaskStore<DB> {
    pub fn new(db: DB) -> Self {
        Self {
            store: ExpiringStore::new(db),
        }
    }

    pub fn with_clock(db: DB, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: ExpiringStore::with_clock(db, clock),
        }
    }

    /// Inserts or replaces the entry for the task's sector.
    pub fn put_task(&self, task: &Task) -> anyhow::Result<()> {
        self.store
            .put_with_ttl(&key(task.worker_task.sector_id), task, TASK_TTL)
            .with_context(|| format!("journaling task for sector {}", task.worker_task.sector_id))
    }

    pub fn get_task(&self, sector: SectorNumber) -> anyhow::Result<Option<Task>> {
        self.store
            .get(&key(sector))
            .with_context(|| format!("reading task for sector {sector}"))
    }

    /// Every live entry. A single undecodable entry fails the whole listing.
    pub fn list_tasks(&self) -> anyhow::Result<Vec<Task>> {
        Ok(self
            .store
            .list::<Task>(TASK_STORE_PREFIX)
            .context("listing journaled tasks")?
            .into_iter()
            .map(|(_, task)| task)
            .collect())
    }

    pub fn delete(&self, sector: SectorNumber) -> anyhow::Result<()> {
        self.store.delete(&key(sector))
    }
}
