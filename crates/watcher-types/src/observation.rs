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

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

type Blake2b256 = Blake2b<U32>;

/// A cross-chain event detected on the source chain.
///
/// Observations are written by the extractor and never mutated afterwards.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, typed_builder::TypedBuilder,
)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Stable identifier of the event.
    #[builder(setter(into))]
    pub request_id: String,
    #[builder(setter(into))]
    pub source_tx_id: String,
    /// Height at which the observation was extracted.
    pub height: u64,
    #[builder(setter(into))]
    pub from_chain: String,
    #[builder(setter(into))]
    pub to_chain: String,
    #[builder(default, setter(into))]
    pub from_address: String,
    #[builder(default, setter(into))]
    pub to_address: String,
    #[builder(default)]
    pub amount: u64,
    #[builder(default)]
    pub bridge_fee: u64,
    #[builder(default)]
    pub network_fee: u64,
    #[builder(default, setter(into))]
    pub source_chain_token_id: String,
    #[builder(default, setter(into))]
    pub target_chain_token_id: String,
    #[builder(default, setter(into))]
    pub source_block_id: String,
}

impl Observation {
    /// The event digest this watcher commits to.
    ///
    /// Covers the whole event payload followed by the watcher id, so two
    /// watchers committing to the same event publish different digests.
    pub fn digest(&self, wid: &str) -> [u8; 32] {
        let mut hasher = Blake2b256::new();
        hasher.update(self.source_tx_id.as_bytes());
        hasher.update(self.from_chain.as_bytes());
        hasher.update(self.to_chain.as_bytes());
        hasher.update(self.from_address.as_bytes());
        hasher.update(self.to_address.as_bytes());
        hasher.update(self.amount.to_be_bytes());
        hasher.update(self.bridge_fee.to_be_bytes());
        hasher.update(self.network_fee.to_be_bytes());
        hasher.update(self.source_chain_token_id.as_bytes());
        hasher.update(self.target_chain_token_id.as_bytes());
        hasher.update(self.source_block_id.as_bytes());
        hasher.update(wid.as_bytes());
        hasher.finalize().into()
    }

    /// Hex encoded [`Observation::digest`].
    pub fn digest_hex(&self, wid: &str) -> String {
        hex::encode(self.digest(wid))
    }
}
