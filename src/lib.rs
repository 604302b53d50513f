// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Storage sealing for Filecoin miners: a persistent per-sector state
//! machine, worker scheduling, a proving endpoint pool and a resumable task
//! journal.

pub mod chain;
pub mod cli_shared;
pub mod db;
pub mod metrics;
pub mod miner;
pub mod sealing;
pub mod sector_storage;
pub mod snark;
pub mod statemachine;
pub mod utils;
pub mod worker;

pub use cli_shared::Config;
pub use miner::Miner;
pub use sealing::{Sealing, SealingConfig, SectorInfo, SectorState};
