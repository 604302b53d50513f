// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

use crate::cli_shared::config::LogConfig;

/// Installs the global subscriber: a console layer and, when `log_dir` is
/// given, an hourly rolling file. The returned guard flushes the file on
/// drop.
pub fn setup_logger(
    config: &LogConfig,
    log_dir: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let mut guard = None;
    let mut layers: Vec<Box<dyn tracing_subscriber::layer::Layer<Registry> + Send + Sync>> =
        // console logger
        vec![Box::new(
            tracing_subscriber::fmt::Layer::new()
                .with_filter(get_env_filter(config_env_filter(config)?)),
        )];

    // file logger
    if let Some(log_dir) = log_dir {
        let file_appender = tracing_appender::rolling::hourly(log_dir, "forest-sealer.log");
        let (writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);
        layers.push(Box::new(
            tracing_subscriber::fmt::Layer::new()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(get_env_filter(config_env_filter(config)?)),
        ));
    }

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(guard)
}

// Log warnings to stderr
pub fn setup_minimal_logger() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::Layer::new()
                .with_writer(std::io::stderr)
                .with_filter(get_env_filter(EnvFilter::new("warn"))),
        )
        .try_init();
}

/// Returns an [`EnvFilter`] according to the `RUST_LOG` environment variable, or `def`.
fn get_env_filter(def: EnvFilter) -> EnvFilter {
    use std::env::{
        self,
        VarError::{NotPresent, NotUnicode},
    };
    match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(s) => EnvFilter::new(s),
        Err(NotPresent) => def,
        Err(NotUnicode(_)) => EnvFilter::default(),
    }
}

fn config_env_filter(config: &LogConfig) -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::try_new(config.to_filter_string())?)
}
