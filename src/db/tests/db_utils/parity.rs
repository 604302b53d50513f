// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{ops::Deref, path::PathBuf};

use crate::db::{parity_db::ParityDb, parity_db_config::ParityDbConfig};

/// A settings database in a temporary directory, removed on drop. It can be
/// closed and opened again to look at what survives a restart.
pub struct TempParityDB {
    db: Option<ParityDb>,
    config: ParityDbConfig,
    dir: tempfile::TempDir,
}

impl TempParityDB {
    pub fn new() -> Self {
        Self::with_config(ParityDbConfig::default())
    }

    pub fn with_config(config: ParityDbConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = ParityDb::open(dir.path().join("settings"), &config).unwrap();
        Self {
            db: Some(db),
            config,
            dir,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("settings")
    }

    /// Closes the database and opens it again from disk.
    pub fn reopen(&mut self) {
        // the column files are locked until the first handle is gone
        drop(self.db.take());
        self.db = Some(ParityDb::open(self.path(), &self.config).unwrap());
    }
}

impl Deref for TempParityDB {
    type Target = ParityDb;

    fn deref(&self) -> &ParityDb {
        self.db.as_ref().unwrap()
    }
}
