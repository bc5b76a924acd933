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
use rosen_watcher_lifecycle::{LifecycleConfig, LifecycleEvaluator};
use rosen_watcher_store::{
    CommitmentStore, InMemoryStore, ObservationStore, PendingTxStore,
};
use rosen_watcher_types::{
    Commitment, EventTrigger, Observation, PendingTransaction,
    SignedTransaction, TxStatus, TxType,
};
use rosen_watcher_utils::metric::Metrics;

use crate::{TxAction, TxQueue, TxQueueConfig};

const WID: &str = "watcher-wid";
const TIMEOUT: u64 = 1_000;
const LAST_SEEN: u64 = 5_000;

struct Fixture {
    store: InMemoryStore,
    chain: Arc<MockedChain>,
    lifecycle: Arc<LifecycleEvaluator<InMemoryStore, MockedChain>>,
    metrics: Arc<Metrics>,
    queue: TxQueue<InMemoryStore, MockedChain>,
}

fn setup() -> Fixture {
    let store = InMemoryStore::default();
    let chain = Arc::new(MockedChain::new(20));
    let metrics = Arc::new(Metrics::new().unwrap());
    let lifecycle = Arc::new(LifecycleEvaluator::new(
        store.clone(),
        chain.clone(),
        LifecycleConfig::builder()
            .wid(WID)
            .observation_confirmation(0)
            .valid_threshold(100)
            .transaction_confirmation(2)
            .build(),
        metrics.clone(),
    ));
    let queue = TxQueue::new(
        store.clone(),
        chain.clone(),
        lifecycle.clone(),
        TxQueueConfig::builder()
            .wid(WID)
            .transaction_confirmation(2)
            .removing_timeout(TIMEOUT)
            .build(),
        metrics.clone(),
    );
    Fixture {
        store,
        chain,
        lifecycle,
        metrics,
        queue,
    }
}

fn observation(request_id: &str) -> Observation {
    Observation::builder()
        .request_id(request_id)
        .source_tx_id(format!("source-{request_id}"))
        .height(15)
        .from_chain("cardano")
        .to_chain("ergo")
        .build()
}

/// Stores an observation with `status` and a pending tx of `tx_type` for it.
fn queue_tx(
    store: &InMemoryStore,
    request_id: &str,
    tx_id: &str,
    tx_type: TxType,
    status: TxStatus,
) -> Arc<Observation> {
    let obs = store.insert_observation(observation(request_id)).unwrap();
    store.set_status(&obs, status).unwrap();
    let outputs: Vec<String> = (0..3).map(|i| format!("{tx_id}:{i}")).collect();
    if tx_type == TxType::Commitment {
        store
            .save_commitment(Commitment {
                commitment_box_id: outputs[1].clone(),
                event_id: request_id.into(),
                wid: WID.into(),
                digest: obs.digest_hex(WID),
                spend_block_height: None,
            })
            .unwrap();
    }
    store
        .save_tx(PendingTransaction {
            tx_id: tx_id.into(),
            tx_type,
            tx: SignedTransaction {
                id: tx_id.into(),
                inputs: vec![format!("{tx_id}-input")],
                outputs,
                bytes: vec![1, 2, 3],
            },
            observation: obs.clone(),
            last_seen_ms: LAST_SEEN,
            submitted_at_height: 18,
        })
        .unwrap();
    obs
}

fn status(store: &InMemoryStore, obs: &Observation) -> TxStatus {
    store.status_of(obs).unwrap().unwrap().status
}

fn last_seen(store: &InMemoryStore, tx_id: &str) -> Option<u64> {
    store
        .all_txs()
        .unwrap()
        .into_iter()
        .find(|tx| tx.tx_id == tx_id)
        .map(|tx| tx.last_seen_ms)
}

#[tokio::test]
async fn empty_queue_does_nothing() {
    let f = setup();
    assert!(f.queue.job().await.unwrap().is_empty());
}

#[tokio::test]
async fn deep_transaction_is_confirmed() {
    let f = setup();
    let obs = queue_tx(&f.store, "req", "tx", TxType::Commitment, TxStatus::CommitmentSent);
    f.chain.set_confirmations("tx", 2);

    let outcomes = f.queue.job_at(LAST_SEEN + 10).await.unwrap();
    assert_eq!(outcomes[0].value(), Some(&TxAction::Confirmed));
    assert_eq!(status(&f.store, &obs), TxStatus::Committed);
    assert!(f.store.all_txs().unwrap().is_empty());
    assert_eq!(f.metrics.txs_confirmed.get(), 1.0);
}

#[tokio::test]
async fn shallow_transaction_is_refreshed() {
    let f = setup();
    let obs = queue_tx(&f.store, "req", "tx", TxType::Commitment, TxStatus::CommitmentSent);
    f.chain.set_confirmations("tx", 1);

    let outcomes = f.queue.job_at(LAST_SEEN + 10).await.unwrap();
    assert_eq!(outcomes[0].value(), Some(&TxAction::Refreshed));
    assert_eq!(last_seen(&f.store, "tx"), Some(LAST_SEEN + 10));
    assert_eq!(status(&f.store, &obs), TxStatus::CommitmentSent);
    assert!(f.chain.broadcasts().is_empty());
}

#[tokio::test]
async fn mempool_transaction_is_refreshed() {
    let f = setup();
    queue_tx(&f.store, "req", "tx", TxType::Commitment, TxStatus::CommitmentSent);
    f.chain.set_confirmations("tx", 0);

    let outcomes = f.queue.job_at(LAST_SEEN + 10).await.unwrap();
    assert_eq!(outcomes[0].value(), Some(&TxAction::Refreshed));
}

#[tokio::test]
async fn lost_valid_commitment_is_broadcast_again() {
    let f = setup();
    let obs = queue_tx(&f.store, "req", "tx", TxType::Commitment, TxStatus::CommitmentSent);

    // the tx's own commitment record does not make it invalid.
    let outcomes = f.queue.job_at(LAST_SEEN + 10).await.unwrap();
    assert_eq!(outcomes[0].value(), Some(&TxAction::Resubmitted));
    assert_eq!(f.chain.broadcasts(), vec!["tx".to_owned()]);
    assert_eq!(last_seen(&f.store, "tx"), Some(LAST_SEEN + 10));
    assert_eq!(status(&f.store, &obs), TxStatus::CommitmentSent);
    assert_eq!(f.metrics.txs_resubmitted.get(), 1.0);
}

#[tokio::test]
async fn spent_inputs_wait_for_the_timeout() {
    let f = setup();
    let obs = queue_tx(&f.store, "req", "tx", TxType::Commitment, TxStatus::CommitmentSent);
    f.chain.spend("tx-input");

    // exactly at the timeout is not past it.
    let outcomes = f.queue.job_at(LAST_SEEN + TIMEOUT).await.unwrap();
    assert_eq!(outcomes[0].value(), Some(&TxAction::Waiting));
    assert_eq!(last_seen(&f.store, "tx"), Some(LAST_SEEN));
    assert_eq!(status(&f.store, &obs), TxStatus::CommitmentSent);
    assert!(f.chain.broadcasts().is_empty());
}

#[tokio::test]
async fn invalid_transaction_is_abandoned_after_timeout() {
    let f = setup();
    let obs = queue_tx(&f.store, "req", "tx", TxType::Commitment, TxStatus::CommitmentSent);
    f.chain.spend("tx-input");

    let outcomes = f.queue.job_at(LAST_SEEN + TIMEOUT + 1).await.unwrap();
    assert_eq!(outcomes[0].value(), Some(&TxAction::Abandoned));
    assert_eq!(status(&f.store, &obs), TxStatus::NotCommitted);
    assert!(f.store.all_txs().unwrap().is_empty());
    assert!(f.store.commitments_by_event("req").unwrap().is_empty());
    assert_eq!(f.metrics.txs_abandoned.get(), 1.0);

    // nothing blocks a new commitment for the observation.
    assert!(f.lifecycle.is_observation_valid(&obs).await.unwrap());
}

#[tokio::test]
async fn abandoning_keeps_other_watchers_commitments() {
    let f = setup();
    queue_tx(&f.store, "req", "tx", TxType::Commitment, TxStatus::CommitmentSent);
    f.store
        .save_commitment(Commitment {
            commitment_box_id: "other-box".into(),
            event_id: "req".into(),
            wid: "other-wid".into(),
            digest: "00".into(),
            spend_block_height: None,
        })
        .unwrap();
    f.chain.spend("tx-input");

    f.queue.job_at(LAST_SEEN + TIMEOUT + 1).await.unwrap();
    let left = f.store.commitments_by_event("req").unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].commitment_box_id, "other-box");
}

#[tokio::test]
async fn timed_out_observation_keeps_its_records() {
    let f = setup();
    let obs = queue_tx(&f.store, "req", "tx", TxType::Commitment, TxStatus::CommitmentSent);
    // 215 - 15 > 100, the observation times out during the validity check.
    f.chain.set_height(215);

    let outcomes = f.queue.job_at(LAST_SEEN + TIMEOUT + 1).await.unwrap();
    assert_eq!(outcomes[0].value(), Some(&TxAction::Abandoned));
    assert_eq!(status(&f.store, &obs), TxStatus::TimedOut);
    assert!(f.store.all_txs().unwrap().is_empty());
    assert_eq!(f.store.commitments_by_event("req").unwrap().len(), 1);
}

#[tokio::test]
async fn lost_trigger_waits_then_is_abandoned_without_event_trigger() {
    let f = setup();
    let obs = queue_tx(&f.store, "req", "trigger-tx", TxType::Trigger, TxStatus::RevealSent);

    let outcomes = f.queue.job_at(LAST_SEEN + 10).await.unwrap();
    assert_eq!(outcomes[0].value(), Some(&TxAction::Waiting));
    assert!(f.chain.broadcasts().is_empty());

    let outcomes = f.queue.job_at(LAST_SEEN + TIMEOUT + 1).await.unwrap();
    assert_eq!(outcomes[0].value(), Some(&TxAction::Abandoned));
    assert_eq!(status(&f.store, &obs), TxStatus::Committed);
    assert!(f.store.all_txs().unwrap().is_empty());
    assert!(f.chain.broadcasts().is_empty());
}

#[tokio::test]
async fn lost_trigger_is_broadcast_again_once_event_trigger_is_known() {
    let f = setup();
    let obs = queue_tx(&f.store, "req", "trigger-tx", TxType::Trigger, TxStatus::RevealSent);
    f.store
        .save_event_trigger(EventTrigger {
            box_id: "trigger-box".into(),
            source_tx_id: obs.source_tx_id.clone(),
            height: 19,
            spend_block_height: None,
        })
        .unwrap();

    let outcomes = f.queue.job_at(LAST_SEEN + 10).await.unwrap();
    assert_eq!(outcomes[0].value(), Some(&TxAction::Resubmitted));
    assert_eq!(f.chain.broadcasts(), vec!["trigger-tx".to_string()]);
    assert_eq!(last_seen(&f.store, "trigger-tx"), Some(LAST_SEEN + 10));
    // a shallow trigger leaves the status alone.
    assert_eq!(status(&f.store, &obs), TxStatus::RevealSent);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn failing_transaction_does_not_stop_the_pass() {
    let f = setup();
    queue_tx(&f.store, "a", "tx-a", TxType::Commitment, TxStatus::CommitmentSent);
    let b = queue_tx(&f.store, "b", "tx-b", TxType::Commitment, TxStatus::CommitmentSent);
    f.chain.fail_tx("tx-a");
    f.chain.set_confirmations("tx-b", 3);

    let outcomes = f.queue.job_at(LAST_SEEN + 10).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].key, "tx-a");
    assert!(!outcomes[0].is_ok());
    assert_eq!(outcomes[1].value(), Some(&TxAction::Confirmed));
    assert_eq!(status(&f.store, &b), TxStatus::Committed);
    // the failed tx stays queued for the next pass.
    assert_eq!(last_seen(&f.store, "tx-a"), Some(LAST_SEEN));
    assert!(logs_contain("tx-a"));
}

#[tokio::test]
async fn rejected_rebroadcast_is_reported() {
    let f = setup();
    queue_tx(&f.store, "req", "tx", TxType::Commitment, TxStatus::CommitmentSent);
    f.chain.reject_broadcasts(true);

    let outcomes = f.queue.job_at(LAST_SEEN + 10).await.unwrap();
    assert!(!outcomes[0].is_ok());
    assert_eq!(last_seen(&f.store, "tx"), Some(LAST_SEEN));
}

#[tokio::test]
async fn unreachable_node_fails_items_not_the_job() {
    let f = setup();
    queue_tx(&f.store, "req", "tx", TxType::Commitment, TxStatus::CommitmentSent);
    f.chain.set_unreachable(true);
    let outcomes = f.queue.job().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].is_ok());
}
