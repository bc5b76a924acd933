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

//! Prunes commitments that were spent long enough ago.

use std::sync::Arc;

use rosen_watcher_chain::ChainReader;
use rosen_watcher_config::WatcherConfig;
use rosen_watcher_store::CommitmentStore;
use rosen_watcher_utils::metric::Metrics;
use rosen_watcher_utils::{probe, Result};

#[derive(Debug)]
pub struct CommitmentReaper<S, C> {
    store: S,
    chain: Arc<C>,
    /// Blocks a spent commitment is kept for.
    height_limit: u64,
    metrics: Arc<Metrics>,
}

impl<S, C> CommitmentReaper<S, C>
where
    S: CommitmentStore,
    C: ChainReader,
{
    pub fn new(
        store: S,
        chain: Arc<C>,
        height_limit: u64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            chain,
            height_limit,
            metrics,
        }
    }

    pub fn from_config(
        store: S,
        chain: Arc<C>,
        config: &WatcherConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::new(store, chain, config.cleanup.height_limit, metrics)
    }

    /// Deletes every commitment spent below `current_height - height_limit`.
    ///
    /// Returns how many were deleted. Unspent commitments are never touched.
    #[tracing::instrument(skip(self), fields(height_limit = self.height_limit))]
    pub async fn remove_old_commitments(&self) -> Result<usize> {
        let current_height = self.chain.current_height().await?;
        let bound = current_height.saturating_sub(self.height_limit);
        let removed = self.store.delete_spent_older_than(bound)?;
        if removed > 0 {
            self.metrics.commitments_reaped.inc_by(removed as f64);
            tracing::debug!(removed, bound, "Removed old spent commitments");
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Reaper,
            %current_height,
            %bound,
            %removed,
        );
        Ok(removed)
    }
}
