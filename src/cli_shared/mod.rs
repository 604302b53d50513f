// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod config;
pub mod logger;

use std::path::{Path, PathBuf};

use crate::db::db_engine::{Db, db_root, open_db};

pub use self::config::Config;

/// Environment variable pointing at the config file.
pub const CONFIG_PATH_ENV: &str = "FOREST_SEALER_CONFIG";

/// Reads the config at `path`, falling back to [`CONFIG_PATH_ENV`] and then
/// to defaults.
pub fn read_config(path: Option<&Path>) -> anyhow::Result<(Option<PathBuf>, Config)> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
    match path {
        Some(path) => {
            let config = Config::from_file(&path)?;
            Ok((Some(path), config))
        }
        None => Ok((None, Config::default())),
    }
}

/// Database directory inside the worker repository.
pub fn db_path(config: &Config) -> PathBuf {
    db_root(&config.worker.directory)
}

pub fn open_config_db(config: &Config) -> anyhow::Result<Db> {
    open_db(&db_path(config), &config.db)
}
