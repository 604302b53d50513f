// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use super::SettingsStore;

use crate::db::parity_db_config::ParityDbConfig;

use anyhow::{Context, anyhow};
use parity_db::{CompressionType, Db, Options};
use strum::{Display, EnumIter, FromRepr, IntoEnumIterator};

/// Columns of the sealer database.
#[derive(Copy, Clone, Debug, Display, PartialEq, FromRepr, EnumIter)]
#[repr(u8)]
enum DbColumn {
    /// Sector snapshots, journal entries and other overwritable records.
    Settings,
}

impl DbColumn {
    fn create_column_options(compression: CompressionType) -> Vec<parity_db::ColumnOptions> {
        DbColumn::iter()
            .map(|col| match col {
                DbColumn::Settings => parity_db::ColumnOptions {
                    // explicitly disable preimage for settings column
                    // othewise we are not able to overwrite entries
                    preimage: false,
                    // This is needed for key retrieval.
                    btree_index: true,
                    compression,
                    ..Default::default()
                },
            })
            .collect()
    }
}

pub struct ParityDb {
    pub db: parity_db::Db,
}

impl ParityDb {
    fn to_options(path: PathBuf, config: &ParityDbConfig) -> Options {
        Options {
            path,
            sync_wal: true,
            sync_data: true,
            stats: config.enable_statistics,
            salt: None,
            columns: DbColumn::create_column_options(config.compression_type()),
            compression_threshold: [(0, 128)].into_iter().collect(),
        }
    }

    pub fn open(path: impl Into<PathBuf>, config: &ParityDbConfig) -> anyhow::Result<Self> {
        let opts = Self::to_options(path.into(), config);
        Ok(Self {
            db: Db::open_or_create(&opts)?,
        })
    }

    fn read_from_column<K>(&self, key: K, column: DbColumn) -> anyhow::Result<Option<Vec<u8>>>
    where
        K: AsRef<[u8]>,
    {
        self.db
            .get(column as u8, key.as_ref())
            .map_err(|e| anyhow!("error from column {column}: {e}"))
    }

    fn commit_to_column<K>(
        &self,
        key: K,
        value: Option<Vec<u8>>,
        column: DbColumn,
    ) -> anyhow::Result<()>
    where
        K: AsRef<[u8]>,
    {
        let tx = [(column as u8, key.as_ref(), value)];
        self.db
            .commit(tx)
            .map_err(|e| anyhow!("error writing to column {column}: {e}"))
    }
}

impl SettingsStore for ParityDb {
    fn read_bin(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.read_from_column(key.as_bytes(), DbColumn::Settings)
    }

    fn write_bin(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.commit_to_column(key.as_bytes(), Some(value.to_vec()), DbColumn::Settings)
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.db
            .get_size(DbColumn::Settings as u8, key.as_bytes())
            .map(|size| size.is_some())
            .context("error checking if key exists")
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.commit_to_column(key.as_bytes(), None, DbColumn::Settings)
    }

    fn setting_keys(&self) -> anyhow::Result<Vec<String>> {
        let mut iter = self.db.iter(DbColumn::Settings as u8)?;
        let mut keys = vec![];
        while let Some((key, _)) = iter.next()? {
            keys.push(String::from_utf8(key)?);
        }
        Ok(keys)
    }
}
