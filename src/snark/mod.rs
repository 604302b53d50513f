// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Pool of external SNARK proving endpoints.
//!
//! The pool lives in a JSON file of the form
//! `{"SnarkUrls": [{"Path": "...", "State": "free"}]}`. Every mutation takes
//! the pool lock, re-reads the file, applies the change and rewrites the
//! whole file, so the file always holds a complete snapshot.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::utils::io::write_file_atomic;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/CxSnark.json";
/// Set to [`ENABLE_VALUE`] to turn the pool on.
pub const ENABLE_ENV: &str = "USE_CX_SNARK";
pub const ENABLE_VALUE: &str = "_yes_";

/// How often a waiting caller re-reads the pool, to notice endpoints freed
/// by editing the file directly.
const RECHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SnarkState {
    Free,
    Busy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnarkUrl {
    pub path: String,
    pub state: SnarkState,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnarkInfo {
    pub snark_urls: Vec<SnarkUrl>,
}

impl SnarkInfo {
    pub fn free_count(&self) -> usize {
        self.snark_urls
            .iter()
            .filter(|url| url.state == SnarkState::Free)
            .count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnarkError {
    #[error("no available snark url")]
    NoAvailable,
    #[error("snark url not found: {0}")]
    NotFound(String),
    #[error("couldn't load snark config: {} does not exist", .0.display())]
    NotConfigured(PathBuf),
    #[error("snark config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed snark config {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads a pool file. A missing file is reported as
/// [`SnarkError::NotConfigured`].
pub fn snark_from_file(path: &Path) -> Result<SnarkInfo, SnarkError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SnarkError::NotConfigured(path.to_owned()));
        }
        Err(source) => {
            return Err(SnarkError::Io {
                path: path.to_owned(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes).map_err(|source| SnarkError::Json {
        path: path.to_owned(),
        source,
    })
}

pub fn write_snark_file(path: &Path, info: &SnarkInfo) -> Result<(), SnarkError> {
    let bytes = serde_json::to_vec_pretty(info).map_err(|source| SnarkError::Json {
        path: path.to_owned(),
        source,
    })?;
    write_file_atomic(path, &bytes).map_err(|source| SnarkError::Io {
        path: path.to_owned(),
        source,
    })
}

pub struct SnarkCtl {
    config_path: PathBuf,
    enabled: bool,
    /// Pool lock. Holds the last snapshot written or loaded.
    info: Mutex<SnarkInfo>,
    released: Notify,
}

impl SnarkCtl {
    pub fn new(config_path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            config_path: config_path.into(),
            enabled,
            info: Mutex::new(SnarkInfo::default()),
            released: Notify::new(),
        }
    }

    /// A controller for the default pool file, enabled through
    /// [`ENABLE_ENV`].
    pub fn from_env() -> Self {
        Self::new(DEFAULT_CONFIG_PATH, enabled_by_env())
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Refreshes the in-memory snapshot from the pool file.
    pub fn load(&self) -> Result<(), SnarkError> {
        let mut info = self.info.lock();
        *info = snark_from_file(&self.config_path)?;
        debug!(
            "loaded {} snark urls from {}",
            info.snark_urls.len(),
            self.config_path.display()
        );
        Ok(())
    }

    /// Reads the pool file, bypassing the in-memory snapshot.
    pub fn get_snark(&self) -> Result<SnarkInfo, SnarkError> {
        snark_from_file(&self.config_path)
    }

    /// The last snapshot loaded or written by this controller.
    pub fn info(&self) -> SnarkInfo {
        self.info.lock().clone()
    }

    /// Applies `f` to a fresh copy of the pool file and writes the result
    /// back, all under the pool lock. Nothing is written if `f` fails.
    pub fn set_snark<T>(
        &self,
        f: impl FnOnce(&mut SnarkInfo) -> Result<T, SnarkError>,
    ) -> Result<T, SnarkError> {
        let mut cached = self.info.lock();
        let mut info = snark_from_file(&self.config_path)?;
        let out = f(&mut info)?;
        write_snark_file(&self.config_path, &info)?;
        *cached = info;
        Ok(out)
    }

    /// Marks the first free endpoint busy and returns its path.
    pub fn obtain_snark(&self) -> Result<String, SnarkError> {
        let res = self.set_snark(|info| {
            let url = info
                .snark_urls
                .iter_mut()
                .find(|url| url.state == SnarkState::Free)
                .ok_or(SnarkError::NoAvailable)?;
            url.state = SnarkState::Busy;
            Ok(url.path.clone())
        });
        match &res {
            Ok(path) => {
                metrics::SNARK_OBTAINED.inc();
                debug!("obtained snark url {path}");
            }
            Err(SnarkError::NoAvailable) => {
                metrics::SNARK_EXHAUSTED.inc();
            }
            Err(_) => {}
        }
        res
    }

    /// Like [`SnarkCtl::obtain_snark`], but waits for an endpoint to be
    /// released instead of failing when the pool is exhausted.
    pub async fn obtain_snark_wait(&self, cancel: &CancellationToken) -> anyhow::Result<String> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            match self.obtain_snark() {
                Ok(path) => return Ok(path),
                Err(SnarkError::NoAvailable) => {}
                Err(e) => return Err(e.into()),
            }
            debug!("snark pool exhausted, waiting for a release");
            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep(RECHECK_INTERVAL) => {}
                _ = cancel.cancelled() => anyhow::bail!("cancelled while waiting for a snark url"),
            }
        }
    }

    /// Reserves an endpoint, waiting for one if the pool is exhausted. The
    /// endpoint is released when the returned lease is dropped, including
    /// when the future holding it is cancelled.
    pub async fn lease(&self, cancel: &CancellationToken) -> anyhow::Result<SnarkLease<'_>> {
        let path = self.obtain_snark_wait(cancel).await?;
        Ok(SnarkLease { ctl: self, path })
    }

    /// Marks `path` free again. Releasing an endpoint that is not busy only
    /// logs a warning.
    pub fn free_snark(&self, path: &str) -> Result<(), SnarkError> {
        self.set_snark(|info| {
            let url = info
                .snark_urls
                .iter_mut()
                .find(|url| url.path == path)
                .ok_or_else(|| SnarkError::NotFound(path.to_owned()))?;
            if url.state != SnarkState::Busy {
                warn!(
                    "the target url is not in busy state: {}, url: {}",
                    url.state, url.path
                );
            }
            url.state = SnarkState::Free;
            Ok(())
        })?;
        self.released.notify_waiters();
        Ok(())
    }

    /// Registers a new endpoint in the free state.
    pub fn add_snark(&self, path: &str) -> Result<(), SnarkError> {
        self.set_snark(|info| {
            if info.snark_urls.iter().any(|url| url.path == path) {
                warn!("snark url {path} is already registered");
                return Ok(());
            }
            info.snark_urls.push(SnarkUrl {
                path: path.to_owned(),
                state: SnarkState::Free,
            });
            Ok(())
        })?;
        info!("added snark url {path}");
        self.released.notify_waiters();
        Ok(())
    }

    pub fn remove_snark(&self, path: &str) -> Result<(), SnarkError> {
        self.set_snark(|info| {
            let pos = info
                .snark_urls
                .iter()
                .position(|url| url.path == path)
                .ok_or_else(|| SnarkError::NotFound(path.to_owned()))?;
            info.snark_urls.remove(pos);
            Ok(())
        })?;
        info!("removed snark url {path}");
        Ok(())
    }
}

/// An endpoint reserved through [`SnarkCtl::lease`].
pub struct SnarkLease<'a> {
    ctl: &'a SnarkCtl,
    path: String,
}

impl SnarkLease<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for SnarkLease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.ctl.free_snark(&self.path) {
            warn!("failed to release snark url {}: {e}", self.path);
        }
    }
}

pub fn enabled_by_env() -> bool {
    std::env::var(ENABLE_ENV).is_ok_and(|v| v == ENABLE_VALUE)
}
