// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod clock;
pub mod encoding;
pub mod io;

use std::{pin::Pin, time::Duration};

use futures::{
    Future, FutureExt,
    future::{FusedFuture, pending},
    select,
};
use tokio::time::sleep;
use tracing::warn;

/// Keep running the future created by `make_fut` until it succeeds, or the
/// timeout or retry limit in `args` is reached. The last error is returned
/// when retries are exhausted.
/// `F` _must_ be cancel safe.
#[tracing::instrument(skip_all)]
pub async fn retry<F, T>(args: RetryArgs, mut make_fut: impl FnMut() -> F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let mut timeout: Pin<Box<dyn FusedFuture<Output = ()> + Send>> = match args.timeout {
        Some(duration) => Box::pin(sleep(duration).fuse()),
        None => Box::pin(pending()),
    };
    let max_retries = args.max_retries.unwrap_or(usize::MAX).max(1);
    let mut task = Box::pin(
        async {
            let mut last_err = None;
            for attempt in 1..=max_retries {
                match make_fut().await {
                    Ok(ok) => return Ok(ok),
                    Err(err) => {
                        warn!("attempt {attempt}/{max_retries} failed: {err:#}");
                        last_err = Some(err);
                    }
                }
                if attempt < max_retries
                    && let Some(delay) = args.delay
                {
                    sleep(delay).await;
                }
            }
            Err(last_err
                .unwrap_or_else(|| anyhow::anyhow!("no attempt was made"))
                .context("retry limit exceeded"))
        }
        .fuse(),
    );
    select! {
        _ = timeout => Err(anyhow::anyhow!(
            "operation timed out after {:?}",
            args.timeout.unwrap_or_default()
        )),
        res = task => res,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryArgs {
    pub timeout: Option<Duration>,
    pub max_retries: Option<usize>,
    pub delay: Option<Duration>,
}

impl Default for RetryArgs {
    fn default() -> Self {
        Self {
            timeout: None,
            max_retries: Some(3),
            delay: Some(Duration::from_secs(1)),
        }
    }
}
