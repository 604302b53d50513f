// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::db::parity_db_config::ParityDbConfig;
use crate::sealing::SealingConfig;
use crate::snark::{self, SnarkCtl};
use crate::utils::io::read_toml;
use crate::worker::WorkerCfg;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnarkConfig {
    pub enabled: bool,
    /// The pool file listing proving endpoints.
    pub config_path: PathBuf,
}

impl Default for SnarkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            config_path: PathBuf::from(snark::DEFAULT_CONFIG_PATH),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub no_precommit: bool,
    pub no_commit: bool,
    /// Repository directory sector files are staged in.
    pub directory: PathBuf,
    pub ip_address: String,
}

impl From<&WorkerConfig> for WorkerCfg {
    fn from(cfg: &WorkerConfig) -> Self {
        Self {
            no_pre_commit: cfg.no_precommit,
            no_commit: cfg.no_commit,
            directory: cfg.directory.clone(),
            ip_address: cfg.ip_address.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogValue {
    pub module: String,
    pub level: String,
}

impl LogValue {
    pub fn new(module: &str, level: &str) -> Self {
        Self {
            module: module.into(),
            level: level.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for everything not matched by `filters`.
    pub level: String,
    pub filters: Vec<LogValue>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            filters: vec![LogValue::new("parity_db", "warn")],
        }
    }
}

impl LogConfig {
    pub(in crate::cli_shared) fn to_filter_string(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(self.filters.iter().map(|f| format!("{}={}", f.module, f.level)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sealing: SealingConfig,
    pub snark: SnarkConfig,
    pub worker: WorkerConfig,
    pub db: ParityDbConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let toml = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        read_toml(&toml).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// The snark pool controller. The pool is enabled by the config or by
    /// [`snark::ENABLE_ENV`].
    pub fn snark_ctl(&self) -> SnarkCtl {
        SnarkCtl::new(
            &self.snark.config_path,
            self.snark.enabled || snark::enabled_by_env(),
        )
    }

    pub fn worker_cfg(&self) -> WorkerCfg {
        WorkerCfg::from(&self.worker)
    }
}
