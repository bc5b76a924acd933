// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use prometheus::core::{AtomicF64, GenericCounter};
use prometheus::{
    register_counter_with_registry, Encoder, Registry, TextEncoder,
};

/// A struct definition for collecting metrics in the watcher.
///
/// Every instance owns its [`Registry`], so several watchers (or tests) can
/// live in one process without clashing on metric names.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Commitment transactions built and recorded.
    pub commitments_created: GenericCounter<AtomicF64>,
    /// Pending transactions re-broadcast by the tx queue.
    pub txs_resubmitted: GenericCounter<AtomicF64>,
    /// Pending transactions confirmed past the threshold.
    pub txs_confirmed: GenericCounter<AtomicF64>,
    /// Pending transactions dropped after the removing timeout.
    pub txs_abandoned: GenericCounter<AtomicF64>,
    /// Observations moved to timed out.
    pub observations_timed_out: GenericCounter<AtomicF64>,
    /// Spent commitments removed by the reaper.
    pub commitments_reaped: GenericCounter<AtomicF64>,
    /// Job ticks skipped because the previous run was still in flight.
    pub job_overlaps_skipped: GenericCounter<AtomicF64>,
}

impl Metrics {
    /// Instantiates the various metrics and their counters, also creates a registry for the counters and
    /// registers the counters
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("rosen_watcher".into()), None)?;

        let commitments_created = register_counter_with_registry!(
            "commitments_created",
            "The total number of commitment transactions created",
            registry
        )?;

        let txs_resubmitted = register_counter_with_registry!(
            "txs_resubmitted",
            "How many times a pending transaction was broadcast again",
            registry
        )?;

        let txs_confirmed = register_counter_with_registry!(
            "txs_confirmed",
            "Total number of pending transactions confirmed",
            registry
        )?;

        let txs_abandoned = register_counter_with_registry!(
            "txs_abandoned",
            "Total number of pending transactions removed after timeout",
            registry
        )?;

        let observations_timed_out = register_counter_with_registry!(
            "observations_timed_out",
            "Total number of observations that passed the valid threshold",
            registry
        )?;

        let commitments_reaped = register_counter_with_registry!(
            "commitments_reaped",
            "Total number of spent commitments removed",
            registry
        )?;

        let job_overlaps_skipped = register_counter_with_registry!(
            "job_overlaps_skipped",
            "How many job ticks were skipped while a previous run was in flight",
            registry
        )?;

        Ok(Self {
            registry,
            commitments_created,
            txs_resubmitted,
            txs_confirmed,
            txs_abandoned,
            observations_timed_out,
            commitments_reaped,
            job_overlaps_skipped,
        })
    }

    /// Gathers the whole watcher metrics in the prometheus text format.
    pub fn gather_metrics(&self) -> Result<String, GatherMetricsError> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        // Gather the metrics.
        let metric_families = self.registry.gather();
        // Encode them to send.
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatherMetricsError {
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    #[error(transparent)]
    FromUtf8Error(#[from] std::string::FromUtf8Error),
}
