// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::{SettingsStore, SettingsStoreExt};
use crate::utils::clock::{Clock, SystemClock};

#[derive(Serialize, Deserialize)]
struct Entry<V> {
    /// Unix timestamp in milliseconds.
    expires_at: i64,
    value: V,
}

/// Settings store wrapper whose entries carry a time-to-live.
///
/// Expired entries are invisible to readers and are removed lazily the next
/// time they are read or listed.
pub struct ExpiringStore<DB> {
    db: DB,
    clock: Arc<dyn Clock>,
}

impl<DB: SettingsStore> ExpiringStore<DB> {
    pub fn new(db: DB) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: DB, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn put_with_ttl<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let entry = Entry {
            expires_at: (self.clock.now() + ttl).timestamp_millis(),
            value,
        };
        self.db.write_obj(key, &entry)
    }

    pub fn get<V: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<V>> {
        match self.db.read_obj::<Entry<V>>(key)? {
            Some(entry) if entry.expires_at > self.clock.now().timestamp_millis() => {
                Ok(Some(entry.value))
            }
            Some(_) => {
                self.db.delete(key)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Returns all live `(key, value)` pairs under `prefix`.
    pub fn list<V: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<(String, V)>> {
        let mut out = vec![];
        for key in self.db.keys_with_prefix(prefix)? {
            if let Some(value) = self.get(&key)? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    pub fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.db.delete(key)
    }
}
