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

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use rosen_watcher_types::{
    BoxId, Commitment, EventTrigger, Observation, ObservationStatus,
    PendingTransaction, TxStatus, WatcherBox,
};
use rosen_watcher_utils::Error;

use super::{
    is_confirmed, BoxKind, BoxStore, CommitmentStore, ObservationStore,
    OwnedBox, PendingTxStore,
};

/// InMemoryStore is a store that keeps the watcher state in memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    observations: Arc<RwLock<BTreeMap<String, Arc<Observation>>>>,
    statuses: Arc<RwLock<HashMap<String, TxStatus>>>,
    commitments: Arc<RwLock<BTreeMap<BoxId, Commitment>>>,
    event_triggers: Arc<RwLock<HashMap<String, EventTrigger>>>,
    pending_txs: Arc<RwLock<Vec<PendingTransaction>>>,
    boxes: Arc<RwLock<BTreeMap<BoxId, OwnedBox>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl InMemoryStore {
    fn step_status(
        &self,
        observation: &Observation,
        step: fn(TxStatus) -> Option<TxStatus>,
    ) -> crate::Result<TxStatus> {
        let mut guard = self.statuses.write();
        let status = guard.get_mut(&observation.request_id).ok_or_else(|| {
            Error::MissingStatus {
                request_id: observation.request_id.clone(),
            }
        })?;
        if let Some(next) = step(*status) {
            *status = next;
        }
        Ok(*status)
    }
}

impl ObservationStore for InMemoryStore {
    #[tracing::instrument(skip_all, fields(request_id = %observation.request_id))]
    fn insert_observation(
        &self,
        observation: Observation,
    ) -> crate::Result<Arc<Observation>> {
        let mut observations = self.observations.write();
        let mut statuses = self.statuses.write();
        let observation = Arc::new(observation);
        statuses
            .entry(observation.request_id.clone())
            .or_insert(TxStatus::NotCommitted);
        observations
            .insert(observation.request_id.clone(), observation.clone());
        Ok(observation)
    }

    #[tracing::instrument(skip(self))]
    fn confirmed_observations(
        &self,
        confirmation: u64,
        current_height: u64,
    ) -> crate::Result<Vec<Arc<Observation>>> {
        let guard = self.observations.read();
        let mut confirmed: Vec<_> = guard
            .values()
            .filter(|o| is_confirmed(o.height, confirmation, current_height))
            .cloned()
            .collect();
        confirmed.sort_by_key(|o| o.height);
        Ok(confirmed)
    }

    fn status_of(
        &self,
        observation: &Observation,
    ) -> crate::Result<Option<ObservationStatus>> {
        let guard = self.statuses.read();
        let status = guard.get(&observation.request_id).map(|s| {
            ObservationStatus::new(observation.request_id.clone(), *s)
        });
        Ok(status)
    }

    #[tracing::instrument(skip(self, observation), fields(request_id = %observation.request_id))]
    fn set_status(
        &self,
        observation: &Observation,
        status: TxStatus,
    ) -> crate::Result<()> {
        let mut guard = self.statuses.write();
        guard.insert(observation.request_id.clone(), status);
        Ok(())
    }

    fn check_new_observation(
        &self,
        observation: &Observation,
    ) -> crate::Result<ObservationStatus> {
        let mut guard = self.statuses.write();
        let status = *guard
            .entry(observation.request_id.clone())
            .or_insert(TxStatus::NotCommitted);
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

impl CommitmentStore for InMemoryStore {
    fn commitments_by_event(
        &self,
        event_id: &str,
    ) -> crate::Result<Vec<Commitment>> {
        let guard = self.commitments.read();
        let commitments = guard
            .values()
            .filter(|c| c.event_id == event_id)
            .cloned()
            .collect();
        Ok(commitments)
    }

    #[tracing::instrument(skip_all, fields(box_id = %commitment.commitment_box_id))]
    fn save_commitment(&self, commitment: Commitment) -> crate::Result<()> {
        let mut guard = self.commitments.write();
        guard.insert(commitment.commitment_box_id.clone(), commitment);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn spend_commitment(&self, box_id: &str, height: u64) -> crate::Result<bool> {
        let mut guard = self.commitments.write();
        match guard.get_mut(box_id) {
            Some(c) => {
                c.spend_block_height = Some(height);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[tracing::instrument(skip(self))]
    fn delete_commitments(&self, box_ids: &[BoxId]) -> crate::Result<usize> {
        let mut guard = self.commitments.write();
        let removed = box_ids
            .iter()
            .filter(|id| guard.remove(id.as_str()).is_some())
            .count();
        Ok(removed)
    }

    #[tracing::instrument(skip(self))]
    fn delete_spent_older_than(&self, height: u64) -> crate::Result<usize> {
        let mut guard = self.commitments.write();
        let before = guard.len();
        guard.retain(|_, c| !matches!(c.spend_block_height, Some(h) if h < height));
        Ok(before - guard.len())
    }

    fn event_trigger_by_source_tx(
        &self,
        source_tx_id: &str,
    ) -> crate::Result<Option<EventTrigger>> {
        let guard = self.event_triggers.read();
        Ok(guard.get(source_tx_id).cloned())
    }

    fn save_event_trigger(&self, trigger: EventTrigger) -> crate::Result<()> {
        let mut guard = self.event_triggers.write();
        guard.insert(trigger.source_tx_id.clone(), trigger);
        Ok(())
    }
}

impl PendingTxStore for InMemoryStore {
    fn all_txs(&self) -> crate::Result<Vec<PendingTransaction>> {
        Ok(self.pending_txs.read().clone())
    }

    #[tracing::instrument(skip_all, fields(tx_id = %tx.tx_id))]
    fn save_tx(&self, tx: PendingTransaction) -> crate::Result<()> {
        let mut guard = self.pending_txs.write();
        match guard.iter_mut().find(|t| t.tx_id == tx.tx_id) {
            Some(existing) => *existing = tx,
            None => guard.push(tx),
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn update_tx_time(&self, tx_id: &str, last_seen_ms: u64) -> crate::Result<()> {
        let mut guard = self.pending_txs.write();
        if let Some(tx) = guard.iter_mut().find(|t| t.tx_id == tx_id) {
            tx.last_seen_ms = last_seen_ms;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove_tx(
        &self,
        tx_id: &str,
    ) -> crate::Result<Option<PendingTransaction>> {
        let mut guard = self.pending_txs.write();
        let removed = guard
            .iter()
            .position(|t| t.tx_id == tx_id)
            .map(|idx| guard.remove(idx));
        Ok(removed)
    }
}

impl InMemoryStore {
    fn unspent_boxes(&self, wid: &str, kind: BoxKind) -> Vec<WatcherBox> {
        let guard = self.boxes.read();
        guard
            .values()
            .filter(|b| !b.spent && b.kind == kind && b.wid == wid)
            .map(|b| b.inner.clone())
            .collect()
    }
}

impl BoxStore for InMemoryStore {
    fn unspent_permits(&self, wid: &str) -> crate::Result<Vec<WatcherBox>> {
        Ok(self.unspent_boxes(wid, BoxKind::Permit))
    }

    fn unspent_wid_boxes(&self, wid: &str) -> crate::Result<Vec<WatcherBox>> {
        Ok(self.unspent_boxes(wid, BoxKind::Wid))
    }

    fn insert_box(
        &self,
        wid: &str,
        kind: BoxKind,
        watcher_box: WatcherBox,
    ) -> crate::Result<()> {
        let mut guard = self.boxes.write();
        guard.insert(
            watcher_box.box_id.clone(),
            OwnedBox {
                wid: wid.to_owned(),
                kind,
                inner: watcher_box,
                spent: false,
            },
        );
        Ok(())
    }

    fn spend_box(&self, box_id: &str) -> crate::Result<bool> {
        let mut guard = self.boxes.write();
        match guard.get_mut(box_id) {
            Some(b) => {
                b.spent = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
