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

//! # Commitment Creation 📝
//!
//! Turns every ready observation into a signed commitment transaction,
//! broadcasts it and records it so the transaction queue can follow it up.

use std::sync::Arc;

use rosen_watcher_chain::{ChainReader, TransactionBuilder};
use rosen_watcher_config::WatcherConfig;
use rosen_watcher_lifecycle::LifecycleEvaluator;
use rosen_watcher_store::{
    BoxStore, CommitmentStore, ObservationStore, PendingTxStore,
};
use rosen_watcher_types::{
    Commitment, Observation, OutputCandidate, SignedTransaction, TxType,
    WatcherBox,
};
use rosen_watcher_utils::metric::Metrics;
use rosen_watcher_utils::{probe, Error, ItemOutcome, Result};

/// Index of the commitment box in the outputs of a commitment transaction.
const COMMITMENT_OUTPUT: usize = 1;

/// Values needed to build commitment transactions.
#[derive(Clone, typed_builder::TypedBuilder)]
pub struct CommitmentCreationConfig {
    /// This watcher's id.
    #[builder(setter(into))]
    pub wid: String,
    /// Secret used to sign the transactions.
    #[builder(setter(into))]
    pub secret: String,
    /// Transaction fee.
    pub fee: u64,
    /// Minimum value of a box, used for the permit and commitment outputs.
    pub min_box_value: u64,
    /// Hash of the permit contract.
    #[builder(default, setter(into))]
    pub permit_script_hash: String,
}

impl std::fmt::Debug for CommitmentCreationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitmentCreationConfig")
            .field("wid", &self.wid)
            .field("fee", &self.fee)
            .field("min_box_value", &self.min_box_value)
            .field("permit_script_hash", &self.permit_script_hash)
            .finish()
    }
}

impl From<&WatcherConfig> for CommitmentCreationConfig {
    fn from(config: &WatcherConfig) -> Self {
        Self {
            wid: config.watcher.wid.clone(),
            secret: config.watcher.secret.clone().unwrap_or_default(),
            fee: config.commitment.fee,
            min_box_value: config.commitment.min_box_value,
            permit_script_hash: config.commitment.permit_script_hash.clone(),
        }
    }
}

/// What the job did with one ready observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitmentOutcome {
    /// A commitment transaction was built and recorded.
    Created { tx_id: String },
    /// The watcher boxes could not pay for the commitment, the observation
    /// is retried on the next run.
    Skipped,
}

/// Creates the commitment transactions of this watcher.
#[derive(Debug)]
pub struct CommitmentCreation<S, C, B> {
    store: S,
    chain: Arc<C>,
    builder: Arc<B>,
    lifecycle: Arc<LifecycleEvaluator<S, C>>,
    config: CommitmentCreationConfig,
    metrics: Arc<Metrics>,
}

impl<S, C, B> CommitmentCreation<S, C, B>
where
    S: ObservationStore + CommitmentStore + PendingTxStore + BoxStore,
    C: ChainReader,
    B: TransactionBuilder,
{
    pub fn new(
        store: S,
        chain: Arc<C>,
        builder: Arc<B>,
        lifecycle: Arc<LifecycleEvaluator<S, C>>,
        config: CommitmentCreationConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            chain,
            builder,
            lifecycle,
            config,
            metrics,
        }
    }

    /// Builds, signs and broadcasts a commitment transaction.
    ///
    /// The transaction spends `wid_box` and every permit, and creates
    /// 1. a permit box with one reward token less,
    /// 2. the commitment box,
    /// 3. a payment box with the remaining value and the WID box tokens.
    ///
    /// Returns `Ok(None)` when the boxes cannot pay for the outputs. A failed
    /// broadcast is only logged: the signed transaction is still returned so
    /// it can be recorded and broadcast again later. The observation status
    /// is left to the caller.
    #[tracing::instrument(skip_all, fields(%request_id))]
    pub async fn create_commitment_tx(
        &self,
        wid: &str,
        request_id: &str,
        event_digest: &str,
        permits: &[WatcherBox],
        wid_box: &WatcherBox,
    ) -> Result<Option<SignedTransaction>> {
        let height = self.chain.current_height().await?;
        self.build_commitment_tx(wid, request_id, event_digest, permits, wid_box, height)
            .await
    }

    async fn build_commitment_tx(
        &self,
        wid: &str,
        request_id: &str,
        event_digest: &str,
        permits: &[WatcherBox],
        wid_box: &WatcherBox,
        height: u64,
    ) -> Result<Option<SignedTransaction>> {
        let outputs = match self.outputs(
            wid,
            request_id,
            event_digest,
            permits,
            wid_box,
        ) {
            Ok(outputs) => outputs,
            Err(e @ Error::InsufficientFunds { .. }) => {
                tracing::warn!("{}, skipping the commitment creation", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let inputs: Vec<WatcherBox> = std::iter::once(wid_box.clone())
            .chain(permits.iter().cloned())
            .collect();
        let signed = match self
            .builder
            .build_and_sign(&self.config.secret, &inputs, &outputs, height)
            .await
        {
            Ok(signed) => signed,
            Err(e @ Error::InsufficientFunds { .. }) => {
                tracing::warn!(
                    "Transaction inputs do not cover the outputs ({}), skipping the commitment creation",
                    e
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = self.chain.broadcast(&signed).await {
            tracing::warn!(
                tx_id = %signed.id,
                "Failed to broadcast the commitment, it stays queued: {}",
                e
            );
        }
        Ok(Some(signed))
    }

    fn outputs(
        &self,
        wid: &str,
        request_id: &str,
        event_digest: &str,
        permits: &[WatcherBox],
        wid_box: &WatcherBox,
    ) -> Result<Vec<OutputCandidate>> {
        let min_box_value = self.config.min_box_value;
        let rwt_count: u64 = permits.iter().map(WatcherBox::token_count).sum();
        let reward_value: u64 = permits.iter().map(|p| p.value).sum();
        let available = wid_box.value.saturating_add(reward_value);
        let required = self
            .config
            .fee
            .saturating_add(min_box_value.saturating_mul(3));
        if rwt_count == 0 {
            // there is no reward token left to put in a commitment.
            return Err(Error::InsufficientFunds {
                required: 1,
                available: 0,
            });
        }
        let payment = available
            .checked_sub(self.config.fee)
            .and_then(|v| v.checked_sub(min_box_value.saturating_mul(2)))
            .filter(|v| *v >= min_box_value)
            .ok_or(Error::InsufficientFunds {
                required,
                available,
            })?;
        Ok(vec![
            OutputCandidate::Permit {
                value: min_box_value,
                rwt_count: rwt_count - 1,
                wid: wid.to_owned(),
            },
            OutputCandidate::Commitment {
                value: min_box_value,
                wid: wid.to_owned(),
                request_id: request_id.to_owned(),
                event_digest: event_digest.to_owned(),
                permit_script_hash: self.config.permit_script_hash.clone(),
            },
            OutputCandidate::Payment {
                value: payment,
                tokens: wid_box.tokens.clone(),
            },
        ])
    }

    /// Creates a commitment for every ready observation.
    ///
    /// A produced transaction is recorded as a local commitment and a pending
    /// transaction, and the observation moves to `CommitmentSent`. When no
    /// transaction could be built nothing is recorded and the observation
    /// stays `NotCommitted`.
    #[tracing::instrument(skip_all, fields(wid = %self.config.wid))]
    pub async fn job(
        &self,
    ) -> Result<Vec<ItemOutcome<String, CommitmentOutcome>>> {
        let observations = self.lifecycle.all_ready_observations().await?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::CommitmentCreation,
            ready = observations.len(),
        );
        let mut outcomes = Vec::with_capacity(observations.len());
        for observation in observations {
            let key = observation.request_id.clone();
            match self.commit(observation).await {
                Ok(outcome) => outcomes.push(ItemOutcome::ok(key, outcome)),
                Err(e) => {
                    tracing::error!(
                        request_id = %key,
                        "Failed to create commitment: {}",
                        e
                    );
                    outcomes.push(ItemOutcome::failed(key, e));
                }
            }
        }
        Ok(outcomes)
    }

    async fn commit(
        &self,
        observation: Arc<Observation>,
    ) -> Result<CommitmentOutcome> {
        let wid = &self.config.wid;
        let wid_box = self
            .store
            .unspent_wid_boxes(wid)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::MissingWidBox { wid: wid.clone() })?;
        let permits = self.store.unspent_permits(wid)?;
        let digest = observation.digest_hex(wid);
        // every chain read happens before the broadcast, so the records
        // below depend on the store only.
        let height = self.chain.current_height().await?;
        let tx = match self
            .build_commitment_tx(
                wid,
                &observation.request_id,
                &digest,
                &permits,
                &wid_box,
                height,
            )
            .await?
        {
            Some(tx) => tx,
            None => return Ok(CommitmentOutcome::Skipped),
        };
        let commitment_box_id = tx
            .outputs
            .get(COMMITMENT_OUTPUT)
            .cloned()
            .ok_or(Error::Generic(
                "commitment transaction without commitment box",
            ))?;
        self.store.save_commitment(Commitment {
            commitment_box_id: commitment_box_id.clone(),
            event_id: observation.request_id.clone(),
            wid: wid.clone(),
            digest,
            spend_block_height: None,
        })?;
        let tx_id = tx.id.clone();
        if let Err(e) = self.lifecycle.track_transaction(
            tx,
            observation,
            TxType::Commitment,
            height,
        ) {
            // an own commitment record without a tracked tx would block
            // every later attempt.
            if let Err(undo) =
                self.store.delete_commitments(&[commitment_box_id])
            {
                tracing::error!(
                    %tx_id,
                    "Failed to drop commitment record: {}",
                    undo
                );
            }
            return Err(e);
        }
        self.metrics.commitments_created.inc();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::CommitmentCreation,
            %tx_id,
            created = true,
        );
        Ok(CommitmentOutcome::Created { tx_id })
    }
}
