// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};

use super::TaskType;

/// Hardware a worker declares when it connects.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkerResources {
    pub mem_physical: u64,
    pub mem_swap: u64,
    /// Memory used by the OS and other processes.
    pub mem_reserved: u64,
    pub cpus: u64,
}

/// Requirements of a single task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Resources {
    pub min_memory: u64,
    pub max_memory: u64,
    pub threads: u64,
}

impl Resources {
    /// Requirements of `task` for sectors of `sector_size` bytes.
    pub fn for_task(task: TaskType, sector_size: u64) -> Self {
        match task {
            TaskType::AddPiece | TaskType::Finalize | TaskType::Fetch => Self {
                min_memory: sector_size,
                max_memory: sector_size,
                threads: 1,
            },
            TaskType::PreCommit => Self {
                min_memory: sector_size,
                max_memory: sector_size.saturating_mul(2),
                threads: 1,
            },
            TaskType::Commit => Self {
                min_memory: sector_size,
                max_memory: sector_size.saturating_mul(3),
                threads: 2,
            },
        }
    }
}

/// Resources currently claimed by tasks running on a worker.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActiveResources {
    pub mem_used_min: u64,
    pub mem_used_max: u64,
    pub cpu_use: u64,
}

impl ActiveResources {
    pub fn add(&mut self, needs: &Resources) {
        self.mem_used_min = self.mem_used_min.saturating_add(needs.min_memory);
        self.mem_used_max = self.mem_used_max.saturating_add(needs.max_memory);
        self.cpu_use = self.cpu_use.saturating_add(needs.threads);
    }

    pub fn free(&mut self, needs: &Resources) {
        self.mem_used_min = self.mem_used_min.saturating_sub(needs.min_memory);
        self.mem_used_max = self.mem_used_max.saturating_sub(needs.max_memory);
        self.cpu_use = self.cpu_use.saturating_sub(needs.threads);
    }

    /// Share of the worker in use, as the largest of its CPU and memory
    /// ratios. Workers that declare no capacity at all count as saturated.
    pub fn utilization(&self, wr: &WorkerResources) -> f64 {
        let ratio = |used: u64, total: u64| {
            if total == 0 {
                f64::INFINITY
            } else {
                used as f64 / total as f64
            }
        };
        let cpu = ratio(self.cpu_use, wr.cpus);
        let mem_min = ratio(
            self.mem_used_min.saturating_add(wr.mem_reserved),
            wr.mem_physical,
        );
        let mem_max = ratio(
            self.mem_used_max.saturating_add(wr.mem_reserved),
            wr.mem_physical.saturating_add(wr.mem_swap),
        );
        cpu.max(mem_min).max(mem_max)
    }
}
