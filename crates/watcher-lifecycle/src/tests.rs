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

use std::sync::Arc;

use rosen_watcher_chain::mocked::MockedChain;
use rosen_watcher_store::{CommitmentStore, InMemoryStore, ObservationStore, PendingTxStore};
use rosen_watcher_types::{
    Commitment, EventTrigger, Observation, SignedTransaction, TxStatus, TxType,
};
use rosen_watcher_utils::metric::Metrics;
use rosen_watcher_utils::Error;

use crate::{LifecycleConfig, LifecycleEvaluator, Readiness};

const WID: &str = "watcher-wid";

type Evaluator = LifecycleEvaluator<InMemoryStore, MockedChain>;

fn setup(height: u64) -> (InMemoryStore, Arc<MockedChain>, Evaluator) {
    let store = InMemoryStore::default();
    let chain = Arc::new(MockedChain::new(height));
    let config = LifecycleConfig::builder()
        .wid(WID)
        .observation_confirmation(0)
        .valid_threshold(100)
        .transaction_confirmation(5)
        .build();
    let metrics = Arc::new(Metrics::new().unwrap());
    let evaluator =
        LifecycleEvaluator::new(store.clone(), chain.clone(), config, metrics);
    (store, chain, evaluator)
}

fn observation(request_id: &str, height: u64) -> Observation {
    Observation::builder()
        .request_id(request_id)
        .source_tx_id(format!("source-{request_id}"))
        .height(height)
        .from_chain("cardano")
        .to_chain("ergo")
        .amount(1_000)
        .build()
}

fn commitment(
    box_id: &str,
    event_id: &str,
    wid: &str,
    spend: Option<u64>,
) -> Commitment {
    Commitment {
        commitment_box_id: box_id.into(),
        event_id: event_id.into(),
        wid: wid.into(),
        digest: "00".into(),
        spend_block_height: spend,
    }
}

fn trigger(source_tx_id: &str, height: u64) -> EventTrigger {
    EventTrigger {
        box_id: format!("trigger-{source_tx_id}"),
        source_tx_id: source_tx_id.into(),
        height,
        spend_block_height: None,
    }
}

fn status(store: &InMemoryStore, observation: &Observation) -> TxStatus {
    store.status_of(observation).unwrap().unwrap().status
}

#[tokio::test]
async fn missing_status_fails_both_checks() {
    let (_store, _chain, evaluator) = setup(20);
    let orphan = observation("orphan", 15);
    let err = evaluator.is_observation_valid(&orphan).await.unwrap_err();
    assert!(matches!(err, Error::MissingStatus { ref request_id } if request_id == "orphan"));
    let err = evaluator.is_merge_happened(&orphan).await.unwrap_err();
    assert!(matches!(err, Error::MissingStatus { .. }));
}

#[tokio::test]
async fn fresh_observation_is_valid() {
    let (store, _chain, evaluator) = setup(20);
    let obs = store.insert_observation(observation("req", 15)).unwrap();
    assert!(evaluator.is_observation_valid(&obs).await.unwrap());
    assert_eq!(status(&store, &obs), TxStatus::NotCommitted);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn old_observation_times_out_once() {
    let (store, chain, evaluator) = setup(215);
    let obs = store.insert_observation(observation("req", 100)).unwrap();
    assert!(!evaluator.is_observation_valid(&obs).await.unwrap());
    assert_eq!(status(&store, &obs), TxStatus::TimedOut);
    assert_eq!(evaluator.metrics.observations_timed_out.get(), 1.0);

    // the second call stops at the stored status.
    let reads = chain.height_reads();
    assert!(!evaluator.is_observation_valid(&obs).await.unwrap());
    assert_eq!(chain.height_reads(), reads);
    assert_eq!(evaluator.metrics.observations_timed_out.get(), 1.0);
}

#[tokio::test]
async fn observation_at_the_threshold_is_still_valid() {
    let (store, _chain, evaluator) = setup(200);
    let obs = store.insert_observation(observation("req", 100)).unwrap();
    assert!(evaluator.is_observation_valid(&obs).await.unwrap());
}

#[tokio::test]
async fn own_commitment_makes_observation_invalid() {
    let (store, _chain, evaluator) = setup(20);
    let obs = store.insert_observation(observation("req", 15)).unwrap();
    store
        .save_commitment(commitment("other-box", "req", "other-wid", None))
        .unwrap();
    assert!(evaluator.is_observation_valid(&obs).await.unwrap());

    store
        .save_commitment(commitment("own-box", "req", WID, Some(18)))
        .unwrap();
    assert!(!evaluator.is_observation_valid(&obs).await.unwrap());
    // unless the commitment belongs to the transaction being re-checked.
    assert!(evaluator
        .is_observation_valid_excluding(&obs, &["own-box".to_string()])
        .await
        .unwrap());
}

#[tokio::test]
async fn merged_observation_is_invalid() {
    let (store, _chain, evaluator) = setup(20);
    let obs = store.insert_observation(observation("req", 15)).unwrap();
    store.save_event_trigger(trigger(&obs.source_tx_id, 19)).unwrap();
    assert!(!evaluator.is_observation_valid(&obs).await.unwrap());
}

#[tokio::test]
async fn revealed_status_skips_the_chain() {
    let (store, chain, evaluator) = setup(20);
    let obs = store.insert_observation(observation("req", 15)).unwrap();
    store.set_status(&obs, TxStatus::Revealed).unwrap();
    assert!(evaluator.is_merge_happened(&obs).await.unwrap());
    assert_eq!(chain.height_reads(), 0);
}

#[tokio::test]
async fn no_trigger_means_no_merge() {
    let (store, _chain, evaluator) = setup(20);
    let obs = store.insert_observation(observation("req", 15)).unwrap();
    assert!(!evaluator.is_merge_happened(&obs).await.unwrap());
    assert_eq!(status(&store, &obs), TxStatus::NotCommitted);
}

#[tokio::test]
async fn deep_trigger_reveals_the_observation() {
    let (store, _chain, evaluator) = setup(100);
    let obs = store.insert_observation(observation("req", 90)).unwrap();
    store.set_status(&obs, TxStatus::Committed).unwrap();
    // 100 - 94 = 6 > 5
    store.save_event_trigger(trigger(&obs.source_tx_id, 94)).unwrap();
    assert!(evaluator.is_merge_happened(&obs).await.unwrap());
    assert_eq!(status(&store, &obs), TxStatus::Revealed);
}

#[tokio::test]
async fn shallow_trigger_is_merged_without_reveal() {
    let (store, _chain, evaluator) = setup(100);
    let obs = store.insert_observation(observation("req", 90)).unwrap();
    store.set_status(&obs, TxStatus::Committed).unwrap();
    // 100 - 95 = 5, not deeper than 5
    store.save_event_trigger(trigger(&obs.source_tx_id, 95)).unwrap();
    assert!(evaluator.is_merge_happened(&obs).await.unwrap());
    assert_eq!(status(&store, &obs), TxStatus::Committed);
}

#[tokio::test]
async fn confirmed_not_committed_observation_is_ready() {
    let (store, _chain, evaluator) = setup(20);
    let obs = store.insert_observation(observation("req", 15)).unwrap();
    let ready = evaluator.all_ready_observations().await.unwrap();
    assert_eq!(ready, vec![obs]);
}

#[tokio::test]
async fn ready_observations_skip_committed_and_invalid_ones() {
    let (store, _chain, evaluator) = setup(20);
    let ready = store.insert_observation(observation("ready", 15)).unwrap();
    let sent = store.insert_observation(observation("sent", 15)).unwrap();
    store.set_status(&sent, TxStatus::CommitmentSent).unwrap();
    let merged = store.insert_observation(observation("merged", 15)).unwrap();
    store.save_event_trigger(trigger(&merged.source_tx_id, 19)).unwrap();
    // not confirmed yet, the chain is at 20.
    store.insert_observation(observation("future", 21)).unwrap();

    let outcomes = evaluator.evaluate_ready_observations().await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.is_ok()));
    let by_key = |key: &str| {
        outcomes
            .iter()
            .find(|o| o.key == key)
            .and_then(|o| o.value().cloned())
            .unwrap()
    };
    assert_eq!(by_key("ready"), Readiness::Ready(ready.clone()));
    assert_eq!(
        by_key("sent"),
        Readiness::InProgress(TxStatus::CommitmentSent)
    );
    assert_eq!(by_key("merged"), Readiness::Invalid);

    let ready_only = evaluator.all_ready_observations().await.unwrap();
    assert_eq!(ready_only, vec![ready]);
}

#[tokio::test]
async fn commitment_set_holds_only_unspent_commitments() {
    let (store, _chain, evaluator) = setup(20);
    let obs = store.insert_observation(observation("req", 15)).unwrap();
    store.set_status(&obs, TxStatus::Committed).unwrap();
    store.save_commitment(commitment("c1", "req", WID, None)).unwrap();
    store
        .save_commitment(commitment("c2", "req", "other-wid", None))
        .unwrap();
    store
        .save_commitment(commitment("c3", "req", "third-wid", Some(18)))
        .unwrap();

    let sets = evaluator.all_ready_commitment_sets().await.unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].observation, obs);
    let mut ids: Vec<_> = sets[0]
        .commitments
        .iter()
        .map(|c| c.commitment_box_id.as_str())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["c1", "c2"]);
}

#[tokio::test]
async fn commitment_sets_exclude_merged_and_empty_events() {
    let (store, _chain, evaluator) = setup(20);
    let merged = store.insert_observation(observation("merged", 15)).unwrap();
    store.set_status(&merged, TxStatus::Committed).unwrap();
    store
        .save_commitment(commitment("m1", "merged", WID, None))
        .unwrap();
    store
        .save_event_trigger(trigger(&merged.source_tx_id, 19))
        .unwrap();

    let spent = store.insert_observation(observation("spent", 15)).unwrap();
    store.set_status(&spent, TxStatus::Committed).unwrap();
    store
        .save_commitment(commitment("s1", "spent", WID, Some(16)))
        .unwrap();

    let not_committed =
        store.insert_observation(observation("pending", 15)).unwrap();
    store
        .save_commitment(commitment("p1", "pending", WID, None))
        .unwrap();

    let sets = evaluator.all_ready_commitment_sets().await.unwrap();
    assert!(sets.is_empty());
    assert_eq!(status(&store, &not_committed), TxStatus::NotCommitted);
}

#[tokio::test]
async fn submit_transaction_tracks_and_upgrades() {
    let (store, _chain, evaluator) = setup(42);
    let obs = store.insert_observation(observation("req", 15)).unwrap();
    let tx = SignedTransaction {
        id: "tx".into(),
        inputs: vec!["in".into()],
        outputs: vec!["out".into()],
        bytes: vec![],
    };
    let status = evaluator
        .submit_transaction(tx, obs.clone(), TxType::Commitment)
        .await
        .unwrap();
    assert_eq!(status, TxStatus::CommitmentSent);
    let txs = store.all_txs().unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].tx_id, "tx");
    assert_eq!(txs[0].submitted_at_height, 42);
    assert_eq!(txs[0].observation, obs);
}

#[tokio::test]
async fn commitment_set_failures_are_reported_per_item() {
    let (store, chain, evaluator) = setup(20);
    let merging = store.insert_observation(observation("a", 14)).unwrap();
    store.set_status(&merging, TxStatus::Committed).unwrap();
    store.save_commitment(commitment("a1", "a", WID, None)).unwrap();
    store
        .save_event_trigger(trigger(&merging.source_tx_id, 19))
        .unwrap();
    let open = store.insert_observation(observation("b", 15)).unwrap();
    store.set_status(&open, TxStatus::Committed).unwrap();
    store.save_commitment(commitment("b1", "b", WID, None)).unwrap();

    // only the batch height read succeeds, the trigger depth check of "a"
    // fails.
    chain.fail_height_reads_after(Some(1));
    let outcomes = evaluator.evaluate_commitment_sets().await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].key, "a");
    assert!(!outcomes[0].is_ok());
    assert_eq!(outcomes[1].key, "b");
    let set = outcomes[1].value().unwrap().as_ref().unwrap();
    assert_eq!(set.observation, open);
    assert_eq!(set.commitments.len(), 1);
}

#[tokio::test]
async fn failed_status_step_untracks_the_transaction() {
    let (store, chain, evaluator) = setup(42);
    let orphan = Arc::new(observation("orphan", 15));
    let tx = SignedTransaction {
        id: "tx".into(),
        inputs: vec!["in".into()],
        outputs: vec!["out".into()],
        bytes: vec![],
    };
    let err = evaluator
        .track_transaction(tx, orphan, TxType::Commitment, 42)
        .unwrap_err();
    assert!(matches!(err, Error::MissingStatus { .. }));
    assert!(store.all_txs().unwrap().is_empty());
    assert_eq!(chain.height_reads(), 0);
}
