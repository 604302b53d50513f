// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::SettingsStore;
use ahash::HashMap;
use itertools::Itertools;
use parking_lot::RwLock;

/// Volatile settings store, used by tests and by tools that do not need
/// state to survive a restart.
#[derive(Debug, Default)]
pub struct MemoryDB {
    settings_db: RwLock<HashMap<String, Vec<u8>>>,
}

impl SettingsStore for MemoryDB {
    fn read_bin(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.settings_db.read().get(key).cloned())
    }

    fn write_bin(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.settings_db
            .write()
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.settings_db.read().contains_key(key))
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.settings_db.write().remove(key);
        Ok(())
    }

    fn setting_keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.settings_db.read().keys().cloned().collect_vec())
    }
}
