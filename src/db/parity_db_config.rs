// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use parity_db::CompressionType;
use serde::{Deserialize, Serialize};

/// `ParityDb` configuration exposed in the sealer config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParityDbConfig {
    pub enable_statistics: bool,
    /// One of `none`, `lz4` or `snappy`.
    pub compression: String,
}

impl Default for ParityDbConfig {
    fn default() -> Self {
        Self {
            enable_statistics: false,
            compression: "lz4".into(),
        }
    }
}

impl ParityDbConfig {
    pub fn compression_type(&self) -> CompressionType {
        match self.compression.to_ascii_lowercase().as_str() {
            "none" => CompressionType::NoCompression,
            "snappy" => CompressionType::Snappy,
            _ => CompressionType::Lz4,
        }
    }
}
