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

//! # Transaction Queue 🕸️
//!
//! Follows up every transaction this watcher broadcast: re-broadcasts the
//! ones the network lost, retires the confirmed ones and abandons the ones
//! that can no longer be mined.

use std::sync::Arc;

use rosen_watcher_chain::ChainReader;
use rosen_watcher_config::WatcherConfig;
use rosen_watcher_lifecycle::LifecycleEvaluator;
use rosen_watcher_store::{CommitmentStore, ObservationStore, PendingTxStore};
use rosen_watcher_types::{BoxId, PendingTransaction, TxStatus, TxType};
use rosen_watcher_utils::metric::Metrics;
use rosen_watcher_utils::{probe, ItemOutcome, Result};

/// Values the queue decisions depend on.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct TxQueueConfig {
    /// This watcher's id.
    #[builder(setter(into))]
    pub wid: String,
    /// Confirmations after which a transaction is considered final.
    pub transaction_confirmation: u64,
    /// Milliseconds an invalid transaction is kept before it is abandoned.
    pub removing_timeout: u64,
}

impl From<&WatcherConfig> for TxQueueConfig {
    fn from(config: &WatcherConfig) -> Self {
        Self {
            wid: config.watcher.wid.clone(),
            transaction_confirmation: config.transactions.confirmation,
            removing_timeout: config.transactions.removing_timeout,
        }
    }
}

/// What happened to one pending transaction during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAction {
    /// Deep enough, the observation moved forward and the tx is forgotten.
    Confirmed,
    /// Seen on chain but not deep enough yet.
    Refreshed,
    /// Lost by the network but still valid, broadcast again.
    Resubmitted,
    /// Invalid for longer than the removing timeout, rolled back.
    Abandoned,
    /// Invalid, waiting for the removing timeout.
    Waiting,
}

/// The pending transaction monitor.
#[derive(Debug)]
pub struct TxQueue<S, C> {
    store: S,
    chain: Arc<C>,
    lifecycle: Arc<LifecycleEvaluator<S, C>>,
    config: TxQueueConfig,
    metrics: Arc<Metrics>,
}

impl<S, C> TxQueue<S, C>
where
    S: ObservationStore + CommitmentStore + PendingTxStore,
    C: ChainReader,
{
    pub fn new(
        store: S,
        chain: Arc<C>,
        lifecycle: Arc<LifecycleEvaluator<S, C>>,
        config: TxQueueConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            chain,
            lifecycle,
            config,
            metrics,
        }
    }

    /// Runs one pass over every pending transaction.
    pub async fn job(&self) -> Result<Vec<ItemOutcome<String, TxAction>>> {
        self.job_at(rosen_watcher_utils::now_ms()).await
    }

    /// Runs one pass as if the current time were `now_ms`.
    ///
    /// A failure on one transaction is logged and reported in its outcome,
    /// the remaining transactions are still processed.
    #[tracing::instrument(skip(self))]
    pub async fn job_at(
        &self,
        now_ms: u64,
    ) -> Result<Vec<ItemOutcome<String, TxAction>>> {
        let txs = self.store.all_txs()?;
        let mut outcomes = Vec::with_capacity(txs.len());
        for tx in txs {
            match self.process(&tx, now_ms).await {
                Ok(action) => {
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::TxQueue,
                        tx_id = %tx.tx_id,
                        tx_type = %tx.tx_type,
                        action = ?action,
                    );
                    outcomes.push(ItemOutcome::ok(tx.tx_id, action));
                }
                Err(e) => {
                    tracing::error!(
                        tx_id = %tx.tx_id,
                        "Skipping transaction check: {}",
                        e
                    );
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::TxQueue,
                        tx_id = %tx.tx_id,
                        errored = true,
                        error = %e,
                    );
                    outcomes.push(ItemOutcome::failed(tx.tx_id, e));
                }
            }
        }
        Ok(outcomes)
    }

    async fn process(
        &self,
        tx: &PendingTransaction,
        now_ms: u64,
    ) -> Result<TxAction> {
        let confirmations = self.chain.confirmation_count(&tx.tx_id).await?;
        let Ok(depth) = u64::try_from(confirmations) else {
            return self.process_unseen(tx, now_ms).await;
        };
        if depth >= self.config.transaction_confirmation {
            let status = self.store.upgrade_status(&tx.observation)?;
            self.store.remove_tx(&tx.tx_id)?;
            self.metrics.txs_confirmed.inc();
            tracing::info!(tx_id = %tx.tx_id, %status, "Tx confirmed");
            Ok(TxAction::Confirmed)
        } else {
            self.store.update_tx_time(&tx.tx_id, now_ms)?;
            tracing::trace!(tx_id = %tx.tx_id, depth, "Tx is being mined");
            Ok(TxAction::Refreshed)
        }
    }

    async fn process_unseen(
        &self,
        tx: &PendingTransaction,
        now_ms: u64,
    ) -> Result<TxAction> {
        if self.is_valid(tx).await? {
            self.chain.broadcast(&tx.tx).await?;
            self.store.update_tx_time(&tx.tx_id, now_ms)?;
            self.metrics.txs_resubmitted.inc();
            tracing::info!(tx_id = %tx.tx_id, "Tx was lost, broadcast again");
            return Ok(TxAction::Resubmitted);
        }
        if now_ms.saturating_sub(tx.last_seen_ms) <= self.config.removing_timeout
        {
            return Ok(TxAction::Waiting);
        }
        let status = self.store.downgrade_status(&tx.observation)?;
        self.store.remove_tx(&tx.tx_id)?;
        // only a rollback to `NotCommitted` is retried.
        if tx.tx_type == TxType::Commitment && status == TxStatus::NotCommitted {
            let removed = self.drop_own_commitments(tx)?;
            tracing::debug!(tx_id = %tx.tx_id, removed, "Dropped local commitment records");
        }
        self.metrics.txs_abandoned.inc();
        tracing::warn!(tx_id = %tx.tx_id, %status, "Tx abandoned");
        Ok(TxAction::Abandoned)
    }

    /// Whether re-broadcasting the transaction still makes sense.
    async fn is_valid(&self, tx: &PendingTransaction) -> Result<bool> {
        let observation_ok = match tx.tx_type {
            // the tx's own commitment box must not count against it.
            TxType::Commitment => {
                self.lifecycle
                    .is_observation_valid_excluding(
                        &tx.observation,
                        &tx.tx.outputs,
                    )
                    .await?
            }
            // a trigger tx is only worth re-sending while the event
            // trigger it created is known.
            TxType::Trigger => {
                self.lifecycle.is_merge_happened(&tx.observation).await?
            }
        };
        if !observation_ok {
            return Ok(false);
        }
        self.chain.inputs_unspent(&tx.tx.inputs).await
    }

    /// Deletes the unspent local commitment records created by `tx`.
    fn drop_own_commitments(&self, tx: &PendingTransaction) -> Result<usize> {
        let own: Vec<BoxId> = self
            .store
            .unspent_commitments_by_event(&tx.observation.request_id)?
            .into_iter()
            .filter(|c| {
                c.wid == self.config.wid
                    && tx.tx.outputs.contains(&c.commitment_box_id)
            })
            .map(|c| c.commitment_box_id)
            .collect();
        if own.is_empty() {
            return Ok(0);
        }
        self.store.delete_commitments(&own)
    }
}

#[cfg(test)]
mod tests;
