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

//! Capabilities the watcher needs from the chain it commits on.
//!
//! The watcher never talks to a node directly. It reads heights and
//! confirmation depths through a [`ChainReader`] and delegates transaction
//! assembly and signing to a [`TransactionBuilder`]. Both are implemented
//! by the chain client that embeds the watcher.

use std::sync::Arc;

use rosen_watcher_types::{BoxId, OutputCandidate, SignedTransaction, WatcherBox};
use rosen_watcher_utils::Result;

/// A mocked chain and transaction builder, for tests and local runs.
#[cfg(any(test, feature = "mocked"))]
pub mod mocked;

/// Read and broadcast access to the watcher's chain.
#[async_trait::async_trait]
pub trait ChainReader: Send + Sync {
    /// The height of the last confirmed block.
    async fn current_height(&self) -> Result<u64>;

    /// How deep the transaction is, `-1` if the chain has never seen it.
    async fn confirmation_count(&self, tx_id: &str) -> Result<i64>;

    /// Sends a signed transaction to the network.
    ///
    /// Fails with [`rosen_watcher_utils::Error::Submit`] when rejected.
    async fn broadcast(&self, tx: &SignedTransaction) -> Result<()>;

    /// Whether every box in `inputs` is still unspent.
    async fn inputs_unspent(&self, inputs: &[BoxId]) -> Result<bool>;
}

/// Builds and signs transactions from watcher boxes.
#[async_trait::async_trait]
pub trait TransactionBuilder: Send + Sync {
    /// Fails with [`rosen_watcher_utils::Error::InsufficientFunds`] when the
    /// inputs cannot pay for the outputs.
    async fn build_and_sign(
        &self,
        secret: &str,
        inputs: &[WatcherBox],
        outputs: &[OutputCandidate],
        height: u64,
    ) -> Result<SignedTransaction>;
}

#[async_trait::async_trait]
impl<T: ChainReader + ?Sized> ChainReader for Arc<T> {
    async fn current_height(&self) -> Result<u64> {
        (**self).current_height().await
    }

    async fn confirmation_count(&self, tx_id: &str) -> Result<i64> {
        (**self).confirmation_count(tx_id).await
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<()> {
        (**self).broadcast(tx).await
    }

    async fn inputs_unspent(&self, inputs: &[BoxId]) -> Result<bool> {
        (**self).inputs_unspent(inputs).await
    }
}

#[async_trait::async_trait]
impl<T: TransactionBuilder + ?Sized> TransactionBuilder for Arc<T> {
    async fn build_and_sign(
        &self,
        secret: &str,
        inputs: &[WatcherBox],
        outputs: &[OutputCandidate],
        height: u64,
    ) -> Result<SignedTransaction> {
        (**self).build_and_sign(secret, inputs, outputs, height).await
    }
}
