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

//! # Watcher Store Module 🕸️
//!
//! A module for managing the storage of the watcher.
//!
//! ## Overview
//!
//! The watcher keeps its local view of the bridge in a handful of narrow
//! stores: observations and their statuses, this watcher's commitments and
//! the event triggers it has seen, the transactions it still tracks, and the
//! boxes it can spend. Each store is a trait so the jobs can run against the
//! in-memory backend in tests and the sled backend in production.
//!
use std::fmt::Debug;
use std::sync::Arc;

use rosen_watcher_types::{
    BoxId, Commitment, EventTrigger, Observation, ObservationStatus,
    PendingTransaction, TxStatus, WatcherBox,
};
use rosen_watcher_utils::Result;
use serde::{Deserialize, Serialize};

/// A module for managing in-memory storage of the watcher.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
#[cfg(feature = "sled")]
pub mod sled;

/// A store that uses [`sled`](https://sled.rs) as the backend.
#[cfg(feature = "sled")]
pub use self::sled::SledStore;
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;

/// Observations extracted from the source chain and their local statuses.
pub trait ObservationStore: Clone + Send + Sync {
    /// Stores a new observation together with its `NotCommitted` status.
    ///
    /// Inserting an observation that already exists keeps the stored status.
    fn insert_observation(
        &self,
        observation: Observation,
    ) -> Result<Arc<Observation>>;

    /// Observations extracted at least `confirmation` blocks below
    /// `current_height`, ordered by height.
    fn confirmed_observations(
        &self,
        confirmation: u64,
        current_height: u64,
    ) -> Result<Vec<Arc<Observation>>>;

    /// The status row of the observation, if any.
    fn status_of(
        &self,
        observation: &Observation,
    ) -> Result<Option<ObservationStatus>>;

    /// Overwrites the status of the observation.
    fn set_status(
        &self,
        observation: &Observation,
        status: TxStatus,
    ) -> Result<()>;

    /// Returns the status of the observation, creating it at
    /// `NotCommitted` when it is missing.
    fn check_new_observation(
        &self,
        observation: &Observation,
    ) -> Result<ObservationStatus>;

    /// Moves the status one step forward and returns the new status.
    ///
    /// The read and the write happen atomically. A terminal status is
    /// returned unchanged.
    fn upgrade_status(&self, observation: &Observation) -> Result<TxStatus>;

    /// Moves the status one step back and returns the new status.
    ///
    /// Same atomicity as [`ObservationStore::upgrade_status`].
    fn downgrade_status(&self, observation: &Observation) -> Result<TxStatus>;
}

/// Commitments of this watcher and the event triggers seen on chain.
pub trait CommitmentStore: Clone + Send + Sync {
    /// Every commitment stored for the event, spent or not.
    fn commitments_by_event(&self, event_id: &str) -> Result<Vec<Commitment>>;

    /// Commitments of the event that are not spent yet.
    fn unspent_commitments_by_event(
        &self,
        event_id: &str,
    ) -> Result<Vec<Commitment>> {
        let commitments = self.commitments_by_event(event_id)?;
        Ok(commitments.into_iter().filter(Commitment::is_unspent).collect())
    }

    /// Inserts the commitment, replacing one with the same box id.
    fn save_commitment(&self, commitment: Commitment) -> Result<()>;

    /// Marks the commitment box as spent at `height`.
    ///
    /// Returns `false` if no such commitment exists.
    fn spend_commitment(&self, box_id: &str, height: u64) -> Result<bool>;

    /// Deletes the commitments with the given box ids, returns how many
    /// were removed.
    fn delete_commitments(&self, box_ids: &[BoxId]) -> Result<usize>;

    /// Deletes every commitment spent below `height`, returns how many were
    /// removed. Unspent commitments are never touched.
    fn delete_spent_older_than(&self, height: u64) -> Result<usize>;

    /// The event trigger created for the given source transaction, if any.
    fn event_trigger_by_source_tx(
        &self,
        source_tx_id: &str,
    ) -> Result<Option<EventTrigger>>;

    /// Inserts or replaces the event trigger of its source transaction.
    fn save_event_trigger(&self, trigger: EventTrigger) -> Result<()>;
}

/// Transactions the watcher broadcast and still tracks.
pub trait PendingTxStore: Clone + Send + Sync {
    /// All the pending transactions, in a stable order.
    fn all_txs(&self) -> Result<Vec<PendingTransaction>>;

    /// Inserts or replaces a pending transaction.
    fn save_tx(&self, tx: PendingTransaction) -> Result<()>;

    /// Sets the last time the transaction was seen valid.
    fn update_tx_time(&self, tx_id: &str, last_seen_ms: u64) -> Result<()>;

    /// Removes a pending transaction and returns it.
    fn remove_tx(&self, tx_id: &str) -> Result<Option<PendingTransaction>>;
}

/// The kind of box the watcher owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoxKind {
    /// A permit box carrying reward tokens.
    Permit,
    /// The box holding the watcher's WID token.
    Wid,
}

/// A box together with its owner and kind, as the stores keep it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedBox {
    pub wid: String,
    pub kind: BoxKind,
    pub inner: WatcherBox,
    pub spent: bool,
}

/// Spendable boxes of the watcher.
pub trait BoxStore: Clone + Send + Sync {
    /// Unspent permit boxes owned by `wid`.
    fn unspent_permits(&self, wid: &str) -> Result<Vec<WatcherBox>>;

    /// Unspent boxes holding the `wid` token.
    fn unspent_wid_boxes(&self, wid: &str) -> Result<Vec<WatcherBox>>;

    /// Inserts a box owned by `wid`.
    fn insert_box(
        &self,
        wid: &str,
        kind: BoxKind,
        watcher_box: WatcherBox,
    ) -> Result<()>;

    /// Marks the box as spent, returns `false` if it is unknown.
    fn spend_box(&self, box_id: &str) -> Result<bool>;
}

/// Everything the watcher jobs need from a store.
pub trait WatcherStore:
    ObservationStore
    + CommitmentStore
    + PendingTxStore
    + BoxStore
    + Debug
    + 'static
{
}

impl<S> WatcherStore for S where
    S: ObservationStore
        + CommitmentStore
        + PendingTxStore
        + BoxStore
        + Debug
        + 'static
{
}

/// Whether an observation at `height` is `confirmation` blocks deep.
pub(crate) fn is_confirmed(height: u64, confirmation: u64, current: u64) -> bool {
    height
        .checked_add(confirmation)
        .map_or(false, |h| h <= current)
}

