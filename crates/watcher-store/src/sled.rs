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

use std::path::Path;
use std::sync::Arc;

use rosen_watcher_types::{
    BoxId, Commitment, EventTrigger, Observation, ObservationStatus,
    PendingTransaction, TxStatus, WatcherBox,
};
use rosen_watcher_utils::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use super::{
    is_confirmed, BoxKind, BoxStore, CommitmentStore, ObservationStore,
    OwnedBox, PendingTxStore,
};

const OBSERVATIONS: &str = "observations";
const STATUSES: &str = "observation_statuses";
const COMMITMENTS: &str = "commitments";
const EVENT_TRIGGERS: &str = "event_triggers";
const PENDING_TXS: &str = "pending_txs";
const BOXES: &str = "boxes";

/// SledStore is a store that keeps the watcher state in a [Sled](https://sled.rs)-based database.
///
/// Every record is stored as JSON in a tree named after its kind.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// Creates a temporary SledStore, removed from disk once dropped.
    pub fn temporary() -> crate::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Gets the total amount of data stored on disk
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    fn values<T: DeserializeOwned>(&self, tree: &str) -> crate::Result<Vec<T>> {
        let tree = self.db.open_tree(tree)?;
        tree.iter()
            .values()
            .map(|v| -> crate::Result<T> { Ok(serde_json::from_slice(&v?)?) })
            .collect()
    }

    fn get<T: DeserializeOwned>(
        &self,
        tree: &str,
        key: &str,
    ) -> crate::Result<Option<T>> {
        let tree = self.db.open_tree(tree)?;
        match tree.get(key)? {
            Some(v) => Ok(Some(serde_json::from_slice(&v)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(
        &self,
        tree: &str,
        key: &str,
        value: &T,
    ) -> crate::Result<()> {
        let tree = self.db.open_tree(tree)?;
        tree.insert(key, serde_json::to_vec(value)?)?;
        // flush the db to make sure we don't lose anything.
        self.db.flush()?;
        Ok(())
    }

    /// Applies `step` to the stored status with a compare-and-swap loop, so
    /// a concurrent writer can never be overwritten.
    fn step_status(
        &self,
        observation: &Observation,
        step: fn(TxStatus) -> Option<TxStatus>,
    ) -> crate::Result<TxStatus> {
        let tree = self.db.open_tree(STATUSES)?;
        let key = observation.request_id.as_bytes();
        loop {
            let current = tree.get(key)?.ok_or_else(|| Error::MissingStatus {
                request_id: observation.request_id.clone(),
            })?;
            let status: TxStatus = serde_json::from_slice(&current)?;
            let next = match step(status) {
                Some(next) => next,
                None => return Ok(status),
            };
            let next_bytes = serde_json::to_vec(&next)?;
            let swapped =
                tree.compare_and_swap(key, Some(current), Some(next_bytes))?;
            if swapped.is_ok() {
                self.db.flush()?;
                return Ok(next);
            }
            tracing::trace!(
                request_id = %observation.request_id,
                "status changed concurrently, retrying"
            );
        }
    }

    fn update_where<T, F>(
        &self,
        tree: &str,
        key: &str,
        f: F,
    ) -> crate::Result<bool>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        match self.get::<T>(tree, key)? {
            Some(mut value) => {
                f(&mut value);
                self.put(tree, key, &value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl ObservationStore for SledStore {
    #[tracing::instrument(skip_all, fields(request_id = %observation.request_id))]
    fn insert_observation(
        &self,
        observation: Observation,
    ) -> crate::Result<Arc<Observation>> {
        let observations = self.db.open_tree(OBSERVATIONS)?;
        let statuses = self.db.open_tree(STATUSES)?;
        let key = observation.request_id.clone();
        let observation_bytes = serde_json::to_vec(&observation)?;
        let status_bytes = serde_json::to_vec(&TxStatus::NotCommitted)?;
        // the observation and its status are written in one transaction
        // so an observation is never visible without a status.
        (&observations, &statuses).transaction(|(observations, statuses)| {
            observations.insert(key.as_bytes(), observation_bytes.as_slice())?;
            if statuses.get(key.as_bytes())?.is_none() {
                statuses.insert(key.as_bytes(), status_bytes.as_slice())?;
            }
            Ok::<_, ConflictableTransactionError<std::io::Error>>(())
        })?;
        self.db.flush()?;
        Ok(Arc::new(observation))
    }

    #[tracing::instrument(skip(self))]
    fn confirmed_observations(
        &self,
        confirmation: u64,
        current_height: u64,
    ) -> crate::Result<Vec<Arc<Observation>>> {
        let mut confirmed: Vec<Arc<Observation>> = self
            .values::<Observation>(OBSERVATIONS)?
            .into_iter()
            .filter(|o| is_confirmed(o.height, confirmation, current_height))
            .map(Arc::new)
            .collect();
        confirmed.sort_by_key(|o| o.height);
        Ok(confirmed)
    }

    fn status_of(
        &self,
        observation: &Observation,
    ) -> crate::Result<Option<ObservationStatus>> {
        let status = self
            .get::<TxStatus>(STATUSES, &observation.request_id)?
            .map(|s| ObservationStatus::new(observation.request_id.clone(), s));
        Ok(status)
    }

    #[tracing::instrument(skip(self, observation), fields(request_id = %observation.request_id))]
    fn set_status(
        &self,
        observation: &Observation,
        status: TxStatus,
    ) -> crate::Result<()> {
        self.put(STATUSES, &observation.request_id, &status)
    }

    fn check_new_observation(
        &self,
        observation: &Observation,
    ) -> crate::Result<ObservationStatus> {
        let tree = self.db.open_tree(STATUSES)?;
        let key = observation.request_id.as_bytes();
        let fresh = serde_json::to_vec(&TxStatus::NotCommitted)?;
        // only creates the row when it does not exist yet.
        let status = match tree.compare_and_swap(key, None as Option<&[u8]>, Some(fresh))? {
            Ok(()) => {
                self.db.flush()?;
                TxStatus::NotCommitted
            }
            Err(e) => match e.current {
                Some(current) => serde_json::from_slice(&current)?,
                None => TxStatus::NotCommitted,
            },
        };
        Ok(ObservationStatus::new(observation.request_id.clone(), status))
    }

    #[tracing::instrument(skip_all, fields(request_id = %observation.request_id))]
    fn upgrade_status(
        &self,
        observation: &Observation,
    ) -> crate::Result<TxStatus> {
        self.step_status(observation, TxStatus::upgrade)
    }

    #[tracing::instrument(skip_all, fields(request_id = %observation.request_id))]
    fn downgrade_status(
        &self,
        observation: &Observation,
    ) -> crate::Result<TxStatus> {
        self.step_status(observation, TxStatus::downgrade)
    }
}

impl CommitmentStore for SledStore {
    fn commitments_by_event(
        &self,
        event_id: &str,
    ) -> crate::Result<Vec<Commitment>> {
        let commitments = self
            .values::<Commitment>(COMMITMENTS)?
            .into_iter()
            .filter(|c| c.event_id == event_id)
            .collect();
        Ok(commitments)
    }

    #[tracing::instrument(skip_all, fields(box_id = %commitment.commitment_box_id))]
    fn save_commitment(&self, commitment: Commitment) -> crate::Result<()> {
        self.put(COMMITMENTS, &commitment.commitment_box_id, &commitment)
    }

    #[tracing::instrument(skip(self))]
    fn spend_commitment(&self, box_id: &str, height: u64) -> crate::Result<bool> {
        self.update_where(COMMITMENTS, box_id, |c: &mut Commitment| {
            c.spend_block_height = Some(height);
        })
    }

    #[tracing::instrument(skip(self))]
    fn delete_commitments(&self, box_ids: &[BoxId]) -> crate::Result<usize> {
        let tree = self.db.open_tree(COMMITMENTS)?;
        let mut removed = 0;
        for box_id in box_ids {
            if tree.remove(box_id.as_bytes())?.is_some() {
                removed += 1;
            }
        }
        self.db.flush()?;
        Ok(removed)
    }

    #[tracing::instrument(skip(self))]
    fn delete_spent_older_than(&self, height: u64) -> crate::Result<usize> {
        let tree = self.db.open_tree(COMMITMENTS)?;
        let mut removed = 0;
        for entry in tree.iter() {
            let (key, value) = entry?;
            let commitment: Commitment = serde_json::from_slice(&value)?;
            if matches!(commitment.spend_block_height, Some(h) if h < height) {
                tree.remove(key)?;
                removed += 1;
            }
        }
        self.db.flush()?;
        Ok(removed)
    }

    fn event_trigger_by_source_tx(
        &self,
        source_tx_id: &str,
    ) -> crate::Result<Option<EventTrigger>> {
        self.get(EVENT_TRIGGERS, source_tx_id)
    }

    fn save_event_trigger(&self, trigger: EventTrigger) -> crate::Result<()> {
        self.put(EVENT_TRIGGERS, &trigger.source_tx_id, &trigger)
    }
}

impl PendingTxStore for SledStore {
    fn all_txs(&self) -> crate::Result<Vec<PendingTransaction>> {
        self.values(PENDING_TXS)
    }

    #[tracing::instrument(skip_all, fields(tx_id = %tx.tx_id))]
    fn save_tx(&self, tx: PendingTransaction) -> crate::Result<()> {
        self.put(PENDING_TXS, &tx.tx_id, &tx)
    }

    #[tracing::instrument(skip(self))]
    fn update_tx_time(&self, tx_id: &str, last_seen_ms: u64) -> crate::Result<()> {
        self.update_where(PENDING_TXS, tx_id, |tx: &mut PendingTransaction| {
            tx.last_seen_ms = last_seen_ms;
        })?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove_tx(
        &self,
        tx_id: &str,
    ) -> crate::Result<Option<PendingTransaction>> {
        let tree = self.db.open_tree(PENDING_TXS)?;
        let removed = match tree.remove(tx_id)? {
            Some(v) => Some(serde_json::from_slice(&v)?),
            None => None,
        };
        self.db.flush()?;
        Ok(removed)
    }
}

impl SledStore {
    fn unspent_boxes(
        &self,
        wid: &str,
        kind: BoxKind,
    ) -> crate::Result<Vec<WatcherBox>> {
        let boxes = self
            .values::<OwnedBox>(BOXES)?
            .into_iter()
            .filter(|b| !b.spent && b.kind == kind && b.wid == wid)
            .map(|b| b.inner)
            .collect();
        Ok(boxes)
    }
}

impl BoxStore for SledStore {
    fn unspent_permits(&self, wid: &str) -> crate::Result<Vec<WatcherBox>> {
        self.unspent_boxes(wid, BoxKind::Permit)
    }

    fn unspent_wid_boxes(&self, wid: &str) -> crate::Result<Vec<WatcherBox>> {
        self.unspent_boxes(wid, BoxKind::Wid)
    }

    fn insert_box(
        &self,
        wid: &str,
        kind: BoxKind,
        watcher_box: WatcherBox,
    ) -> crate::Result<()> {
        let owned = OwnedBox {
            wid: wid.to_owned(),
            kind,
            inner: watcher_box,
            spent: false,
        };
        self.put(BOXES, &owned.inner.box_id, &owned)
    }

    fn spend_box(&self, box_id: &str) -> crate::Result<bool> {
        self.update_where(BOXES, box_id, |b: &mut OwnedBox| b.spent = true)
    }
}
