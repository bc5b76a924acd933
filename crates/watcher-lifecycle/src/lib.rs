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

//! # Observation Lifecycle 🔁
//!
//! Decides, for every observation, whether the watcher may commit to it,
//! whether its event was already merged into an event trigger, and which
//! commitments are ready to be merged.
//!
//! Only two decisions write to the store: an observation that stayed
//! uncommitted for too long is marked `TimedOut`, and an observation whose
//! event trigger is buried deep enough is marked `Revealed`. Everything else
//! is a read.

use std::sync::Arc;

use rosen_watcher_chain::ChainReader;
use rosen_watcher_config::WatcherConfig;
use rosen_watcher_store::{CommitmentStore, ObservationStore, PendingTxStore};
use rosen_watcher_types::{
    BoxId, Commitment, Observation, PendingTransaction, SignedTransaction,
    TxStatus, TxType,
};
use rosen_watcher_utils::metric::Metrics;
use rosen_watcher_utils::{probe, Error, ItemOutcome, Result};

#[cfg(test)]
mod tests;

/// Values the lifecycle decisions depend on.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct LifecycleConfig {
    /// This watcher's id.
    #[builder(setter(into))]
    pub wid: String,
    /// Blocks an observation must be buried under before it is considered.
    pub observation_confirmation: u64,
    /// Blocks after which an uncommitted observation times out.
    pub valid_threshold: u64,
    /// Blocks after which an event trigger is considered final.
    pub transaction_confirmation: u64,
}

impl From<&WatcherConfig> for LifecycleConfig {
    fn from(config: &WatcherConfig) -> Self {
        Self {
            wid: config.watcher.wid.clone(),
            observation_confirmation: config.observation.confirmation,
            valid_threshold: config.observation.valid_threshold,
            transaction_confirmation: config.transactions.confirmation,
        }
    }
}

/// What the evaluator concluded about one confirmed observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Valid and not committed yet, a commitment can be created.
    Ready(Arc<Observation>),
    /// Not committed, but not valid either.
    Invalid,
    /// Already past `NotCommitted`.
    InProgress(TxStatus),
}

/// The unspent commitments of an event, ready to be merged into a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentSet {
    pub observation: Arc<Observation>,
    pub commitments: Vec<Commitment>,
}

/// Evaluates observations against the local store and the chain.
#[derive(Debug)]
pub struct LifecycleEvaluator<S, C> {
    store: S,
    chain: Arc<C>,
    config: LifecycleConfig,
    metrics: Arc<Metrics>,
}

impl<S, C> LifecycleEvaluator<S, C>
where
    S: ObservationStore + CommitmentStore + PendingTxStore,
    C: ChainReader,
{
    pub fn new(
        store: S,
        chain: Arc<C>,
        config: LifecycleConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            chain,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    fn status(&self, observation: &Observation) -> Result<TxStatus> {
        self.store
            .status_of(observation)?
            .map(|s| s.status)
            .ok_or_else(|| Error::MissingStatus {
                request_id: observation.request_id.clone(),
            })
    }

    /// Whether the watcher may commit to the observation.
    ///
    /// Marks the observation `TimedOut` when it is more than
    /// `valid_threshold` blocks old.
    #[tracing::instrument(skip_all, fields(request_id = %observation.request_id))]
    pub async fn is_observation_valid(
        &self,
        observation: &Observation,
    ) -> Result<bool> {
        self.is_observation_valid_excluding(observation, &[]).await
    }

    /// Same as [`Self::is_observation_valid`], ignoring the commitments whose
    /// box id is in `own_boxes`.
    ///
    /// Used to re-check a commitment transaction that is still pending: its
    /// own commitment record must not count as a previous commitment.
    pub async fn is_observation_valid_excluding(
        &self,
        observation: &Observation,
        own_boxes: &[BoxId],
    ) -> Result<bool> {
        let status = self.status(observation)?;
        if status == TxStatus::TimedOut {
            return Ok(false);
        }
        let current_height = self.chain.current_height().await?;
        let age = current_height.saturating_sub(observation.height);
        if age > self.config.valid_threshold {
            self.store.set_status(observation, TxStatus::TimedOut)?;
            self.metrics.observations_timed_out.inc();
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::ObservationStatus,
                request_id = %observation.request_id,
                status = %TxStatus::TimedOut,
                %current_height,
                %age,
            );
            return Ok(false);
        }
        if self.is_merge_happened(observation).await? {
            return Ok(false);
        }
        let committed = self
            .store
            .commitments_by_event(&observation.request_id)?
            .into_iter()
            .any(|c| {
                c.wid == self.config.wid
                    && !own_boxes.contains(&c.commitment_box_id)
            });
        if committed {
            tracing::trace!(
                request_id = %observation.request_id,
                "watcher already committed to this event"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Whether an event trigger was already created for the observation.
    ///
    /// A trigger deeper than `transaction_confirmation` blocks marks the
    /// observation `Revealed`. A shallower trigger still counts as merged but
    /// leaves the status alone, so a reorg that drops it can be noticed.
    #[tracing::instrument(skip_all, fields(request_id = %observation.request_id))]
    pub async fn is_merge_happened(
        &self,
        observation: &Observation,
    ) -> Result<bool> {
        if self.status(observation)? == TxStatus::Revealed {
            return Ok(true);
        }
        let trigger = match self
            .store
            .event_trigger_by_source_tx(&observation.source_tx_id)?
        {
            Some(trigger) => trigger,
            None => return Ok(false),
        };
        let height = self.chain.current_height().await?;
        let depth = height.saturating_sub(trigger.height);
        if depth > self.config.transaction_confirmation {
            self.store.set_status(observation, TxStatus::Revealed)?;
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::ObservationStatus,
                request_id = %observation.request_id,
                status = %TxStatus::Revealed,
                trigger = %trigger.box_id,
                %depth,
            );
        }
        Ok(true)
    }

    /// Evaluates every confirmed observation.
    ///
    /// Missing status rows are created on the way. One failing observation
    /// does not stop the others; its error is logged and reported in its
    /// outcome.
    #[tracing::instrument(skip_all)]
    pub async fn evaluate_ready_observations(
        &self,
    ) -> Result<Vec<ItemOutcome<String, Readiness>>> {
        let current_height = self.chain.current_height().await?;
        let observations = self.store.confirmed_observations(
            self.config.observation_confirmation,
            current_height,
        )?;
        let mut outcomes = Vec::with_capacity(observations.len());
        for observation in observations {
            let key = observation.request_id.clone();
            match self.readiness(observation).await {
                Ok(readiness) => outcomes.push(ItemOutcome::ok(key, readiness)),
                Err(e) => {
                    tracing::error!(
                        request_id = %key,
                        "Failed to evaluate observation: {}",
                        e
                    );
                    outcomes.push(ItemOutcome::failed(key, e));
                }
            }
        }
        Ok(outcomes)
    }

    async fn readiness(
        &self,
        observation: Arc<Observation>,
    ) -> Result<Readiness> {
        let status = self.store.check_new_observation(&observation)?.status;
        if status != TxStatus::NotCommitted {
            return Ok(Readiness::InProgress(status));
        }
        if self.is_observation_valid(&observation).await? {
            Ok(Readiness::Ready(observation))
        } else {
            Ok(Readiness::Invalid)
        }
    }

    /// Confirmed observations the watcher should commit to.
    pub async fn all_ready_observations(&self) -> Result<Vec<Arc<Observation>>> {
        let ready = self
            .evaluate_ready_observations()
            .await?
            .into_iter()
            .filter_map(|item| match item.outcome {
                Ok(Readiness::Ready(observation)) => Some(observation),
                _ => None,
            })
            .collect();
        Ok(ready)
    }

    /// Looks for a commitment set in every confirmed observation.
    ///
    /// An item is `None` when its observation is not `Committed`, its event
    /// is merged already, or no unspent commitment exists for it. A failing
    /// observation is logged and reported in its outcome.
    #[tracing::instrument(skip_all)]
    pub async fn evaluate_commitment_sets(
        &self,
    ) -> Result<Vec<ItemOutcome<String, Option<CommitmentSet>>>> {
        let current_height = self.chain.current_height().await?;
        let observations = self.store.confirmed_observations(
            self.config.observation_confirmation,
            current_height,
        )?;
        let mut outcomes = Vec::with_capacity(observations.len());
        for observation in observations {
            let key = observation.request_id.clone();
            match self.commitment_set(observation).await {
                Ok(set) => outcomes.push(ItemOutcome::ok(key, set)),
                Err(e) => {
                    tracing::error!(
                        request_id = %key,
                        "Failed to collect commitments: {}",
                        e
                    );
                    outcomes.push(ItemOutcome::failed(key, e));
                }
            }
        }
        Ok(outcomes)
    }

    /// Committed observations whose event is not merged yet, with the
    /// unspent commitments of each event.
    ///
    /// Events without any unspent commitment are left out.
    pub async fn all_ready_commitment_sets(&self) -> Result<Vec<CommitmentSet>> {
        let sets = self
            .evaluate_commitment_sets()
            .await?
            .into_iter()
            .filter_map(|item| item.outcome.ok().flatten())
            .collect();
        Ok(sets)
    }

    #[tracing::instrument(skip_all, fields(request_id = %observation.request_id))]
    async fn commitment_set(
        &self,
        observation: Arc<Observation>,
    ) -> Result<Option<CommitmentSet>> {
        match self.store.status_of(&observation)? {
            Some(s) if s.status == TxStatus::Committed => {}
            _ => return Ok(None),
        }
        if self.is_merge_happened(&observation).await? {
            return Ok(None);
        }
        let commitments = self
            .store
            .unspent_commitments_by_event(&observation.request_id)?;
        if commitments.is_empty() {
            return Ok(None);
        }
        Ok(Some(CommitmentSet {
            observation,
            commitments,
        }))
    }

    /// Starts tracking a broadcast transaction and moves the observation one
    /// step forward.
    #[tracing::instrument(skip_all, fields(tx_id = %tx.id, request_id = %observation.request_id, %tx_type))]
    pub async fn submit_transaction(
        &self,
        tx: SignedTransaction,
        observation: Arc<Observation>,
        tx_type: TxType,
    ) -> Result<TxStatus> {
        let height = self.chain.current_height().await?;
        self.track_transaction(tx, observation, tx_type, height)
    }

    /// Same as [`Self::submit_transaction`] for a transaction submitted at
    /// `height`, without reading the chain.
    ///
    /// Either both the pending transaction and the status step are stored,
    /// or neither is.
    pub fn track_transaction(
        &self,
        tx: SignedTransaction,
        observation: Arc<Observation>,
        tx_type: TxType,
        height: u64,
    ) -> Result<TxStatus> {
        let tx_id = tx.id.clone();
        let pending = PendingTransaction {
            tx_id: tx_id.clone(),
            tx_type,
            tx,
            observation: observation.clone(),
            last_seen_ms: rosen_watcher_utils::now_ms(),
            submitted_at_height: height,
        };
        self.store.save_tx(pending)?;
        let status = match self.store.upgrade_status(&observation) {
            Ok(status) => status,
            Err(e) => {
                if let Err(undo) = self.store.remove_tx(&tx_id) {
                    tracing::error!(
                        %tx_id,
                        "Failed to untrack transaction: {}",
                        undo
                    );
                }
                return Err(e);
            }
        };
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::ObservationStatus,
            request_id = %observation.request_id,
            %status,
        );
        Ok(status)
    }
}
