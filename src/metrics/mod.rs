// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use parking_lot::{RwLock, RwLockWriteGuard};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
};
use std::sync::LazyLock;

static DEFAULT_REGISTRY: LazyLock<RwLock<prometheus_client::registry::Registry>> =
    LazyLock::new(Default::default);

pub fn default_registry<'a>() -> RwLockWriteGuard<'a, prometheus_client::registry::Registry> {
    DEFAULT_REGISTRY.write()
}

pub static SECTOR_STATE_TRANSITIONS: LazyLock<Family<StateLabel, Counter>> =
    LazyLock::new(|| {
        let metric = Family::default();
        default_registry().register(
            "sector_state_transitions",
            "Number of sector state transitions by target state",
            metric.clone(),
        );
        metric
    });

pub static SECTOR_TRANSITION_ERRORS: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    default_registry().register(
        "sector_transition_errors",
        "Number of rejected sector events and failed state handlers",
        metric.clone(),
    );
    metric
});

pub static SNARK_OBTAINED: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    default_registry().register(
        "snark_obtained",
        "Number of snark endpoints handed out",
        metric.clone(),
    );
    metric
});

pub static SNARK_EXHAUSTED: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    default_registry().register(
        "snark_exhausted",
        "Number of snark requests that found no free endpoint",
        metric.clone(),
    );
    metric
});

pub static WORKER_TASKS_JOURNALED: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    default_registry().register(
        "worker_tasks_journaled",
        "Number of worker task results written to the task journal",
        metric.clone(),
    );
    metric
});

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StateLabel {
    pub state: String,
}

impl StateLabel {
    pub fn new(state: impl ToString) -> Self {
        Self {
            state: state.to_string(),
        }
    }
}

/// Renders every registered metric in the prometheus text format.
pub fn encode_metrics() -> anyhow::Result<String> {
    let mut metrics = String::new();
    prometheus_client::encoding::text::encode(&mut metrics, &DEFAULT_REGISTRY.read())?;
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_the_registry() {
        SNARK_OBTAINED.inc();
        SECTOR_STATE_TRANSITIONS
            .get_or_create(&StateLabel::new("Proving"))
            .inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("snark_obtained_total"));
        assert!(text.contains("sector_state_transitions_total{state=\"Proving\"}"));
    }
}
