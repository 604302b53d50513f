// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod expiring;
mod memory;
pub mod parity_db;
pub mod parity_db_config;

pub use expiring::ExpiringStore;
pub use memory::MemoryDB;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod setting_keys {
    /// Namespace under which sector state snapshots are kept.
    pub const SECTOR_STORE_PREFIX: &str = "/sectors";
    /// Namespace under which the worker task journal is kept.
    pub const TASK_STORE_PREFIX: &str = "/tasks";
}

/// Interface used to store and retrieve settings from the database.
pub trait SettingsStore {
    /// Reads binary field from the Settings store. This should be used for
    /// non-serializable data. For serializable data, use [`SettingsStoreExt::read_obj`].
    fn read_bin(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Writes binary field to the Settings store. This should be used for
    /// non-serializable data. For serializable data, use [`SettingsStoreExt::write_obj`].
    fn write_bin(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    /// Returns `Ok(true)` if key exists in store.
    fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Removes the key. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Returns all setting keys.
    fn setting_keys(&self) -> anyhow::Result<Vec<String>>;

    /// Returns the setting keys that live under `prefix/`.
    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let namespace = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .setting_keys()?
            .into_iter()
            .filter(|key| key.starts_with(&namespace))
            .collect())
    }
}

/// Extension trait for the [`SettingsStore`] trait. It is implemented for all types that implement
/// [`SettingsStore`].
/// It provides methods for writing and reading any serializable object from the store.
pub trait SettingsStoreExt {
    fn read_obj<V: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<V>>;
    fn write_obj<V: Serialize>(&self, key: &str, value: &V) -> anyhow::Result<()>;

    /// Same as [`SettingsStoreExt::read_obj`], but returns an error if the key does not exist.
    fn require_obj<V: DeserializeOwned>(&self, key: &str) -> anyhow::Result<V>;
}

impl<T: ?Sized + SettingsStore> SettingsStoreExt for T {
    fn read_obj<V: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<V>> {
        match self.read_bin(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_obj<V: Serialize>(&self, key: &str, value: &V) -> anyhow::Result<()> {
        self.write_bin(key, &serde_json::to_vec(value)?)
    }

    fn require_obj<V: DeserializeOwned>(&self, key: &str) -> anyhow::Result<V> {
        self.read_bin(key)?
            .ok_or_else(|| anyhow::anyhow!("Key {key} not found"))
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(Into::into))
    }
}

impl<DB: ?Sized + SettingsStore> SettingsStore for std::sync::Arc<DB> {
    fn read_bin(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        SettingsStore::read_bin(self.as_ref(), key)
    }

    fn write_bin(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        SettingsStore::write_bin(self.as_ref(), key, value)
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        SettingsStore::exists(self.as_ref(), key)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        SettingsStore::delete(self.as_ref(), key)
    }

    fn setting_keys(&self) -> anyhow::Result<Vec<String>> {
        SettingsStore::setting_keys(self.as_ref())
    }
}

pub mod db_engine {
    use std::path::{Path, PathBuf};

    pub type Db = crate::db::parity_db::ParityDb;
    pub type DbConfig = crate::db::parity_db_config::ParityDbConfig;
    const DIR_NAME: &str = "paritydb";

    pub fn db_root(data_root: &Path) -> PathBuf {
        data_root.join(DIR_NAME)
    }

    pub fn open_db(path: &Path, config: &DbConfig) -> anyhow::Result<Db> {
        Db::open(path, config)
    }
}
