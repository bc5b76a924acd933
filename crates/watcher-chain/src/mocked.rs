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

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use parking_lot::Mutex;
use rosen_watcher_types::{
    BoxId, OutputCandidate, SignedTransaction, TxId, WatcherBox,
};
use rosen_watcher_utils::{Error, Result};

use super::{ChainReader, TransactionBuilder};

/// An in-process chain whose state is driven by the test.
#[derive(Debug, Default)]
pub struct MockedChain {
    height: AtomicU64,
    height_reads: AtomicUsize,
    confirmations: Mutex<HashMap<TxId, i64>>,
    spent: Mutex<HashSet<BoxId>>,
    broadcasts: Mutex<Vec<TxId>>,
    failing_txs: Mutex<HashSet<TxId>>,
    reject_broadcasts: AtomicBool,
    unreachable: AtomicBool,
    height_read_limit: Mutex<Option<usize>>,
}

impl MockedChain {
    pub fn new(height: u64) -> Self {
        let chain = Self::default();
        chain.set_height(height);
        chain
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// How many times [`ChainReader::current_height`] was called.
    pub fn height_reads(&self) -> usize {
        self.height_reads.load(Ordering::SeqCst)
    }

    pub fn set_confirmations(&self, tx_id: &str, confirmations: i64) {
        self.confirmations.lock().insert(tx_id.to_owned(), confirmations);
    }

    /// Marks a box as spent by some other transaction.
    pub fn spend(&self, box_id: &str) {
        self.spent.lock().insert(box_id.to_owned());
    }

    /// Ids of every broadcast transaction, in order.
    pub fn broadcasts(&self) -> Vec<TxId> {
        self.broadcasts.lock().clone()
    }

    /// Makes every call about `tx_id` fail with a network error.
    pub fn fail_tx(&self, tx_id: &str) {
        self.failing_txs.lock().insert(tx_id.to_owned());
    }

    /// Makes the node reject every broadcast.
    pub fn reject_broadcasts(&self, reject: bool) {
        self.reject_broadcasts.store(reject, Ordering::SeqCst);
    }

    /// Makes every call fail with a network error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes every height read after the first `limit` ones fail with a
    /// network error. `None` lifts the limit.
    pub fn fail_height_reads_after(&self, limit: Option<usize>) {
        *self.height_read_limit.lock() = limit;
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Network("node unreachable".into()));
        }
        Ok(())
    }

    fn check_tx(&self, tx_id: &str) -> Result<()> {
        self.check_reachable()?;
        if self.failing_txs.lock().contains(tx_id) {
            return Err(Error::Network(format!("request for {tx_id} failed")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChainReader for MockedChain {
    async fn current_height(&self) -> Result<u64> {
        let reads = self.height_reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.check_reachable()?;
        if matches!(*self.height_read_limit.lock(), Some(limit) if reads > limit)
        {
            return Err(Error::Network(format!("height read {reads} failed")));
        }
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn confirmation_count(&self, tx_id: &str) -> Result<i64> {
        self.check_tx(tx_id)?;
        let confirmations = self.confirmations.lock();
        Ok(confirmations.get(tx_id).copied().unwrap_or(-1))
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<()> {
        self.check_tx(&tx.id)?;
        if self.reject_broadcasts.load(Ordering::SeqCst) {
            return Err(Error::Submit(format!("{} rejected", tx.id)));
        }
        tracing::debug!(tx_id = %tx.id, "mocked chain received transaction");
        self.broadcasts.lock().push(tx.id.clone());
        Ok(())
    }

    async fn inputs_unspent(&self, inputs: &[BoxId]) -> Result<bool> {
        self.check_reachable()?;
        let spent = self.spent.lock();
        Ok(inputs.iter().all(|b| !spent.contains(b)))
    }
}

/// A transaction builder that checks value balance and derives ids from
/// the transaction content instead of signing anything.
#[derive(Debug, Default)]
pub struct MockedTxBuilder {
    built: Mutex<Vec<(Vec<WatcherBox>, Vec<OutputCandidate>)>>,
}

impl MockedTxBuilder {
    /// Inputs and outputs of every transaction built so far.
    pub fn built(&self) -> Vec<(Vec<WatcherBox>, Vec<OutputCandidate>)> {
        self.built.lock().clone()
    }
}

#[async_trait::async_trait]
impl TransactionBuilder for MockedTxBuilder {
    async fn build_and_sign(
        &self,
        secret: &str,
        inputs: &[WatcherBox],
        outputs: &[OutputCandidate],
        height: u64,
    ) -> Result<SignedTransaction> {
        let available: u64 = inputs.iter().map(|b| b.value).sum();
        let required: u64 = outputs.iter().map(OutputCandidate::value).sum();
        if required > available {
            return Err(Error::InsufficientFunds {
                required,
                available,
            });
        }
        let bytes = serde_json::to_vec(outputs)?;
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(secret.as_bytes());
        for input in inputs {
            hasher.update(input.box_id.as_bytes());
        }
        hasher.update(&bytes);
        hasher.update(height.to_be_bytes());
        let id = hex::encode(hasher.finalize());
        let output_ids =
            (0..outputs.len()).map(|i| format!("{id}:{i}")).collect();
        self.built.lock().push((inputs.to_vec(), outputs.to_vec()));
        Ok(SignedTransaction {
            id,
            inputs: inputs.iter().map(|b| b.box_id.clone()).collect(),
            outputs: output_ids,
            bytes,
        })
    }
}
