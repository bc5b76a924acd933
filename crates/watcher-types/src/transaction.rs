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

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{BoxId, Observation, TxId};

/// The kind of transaction a watcher submits.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TxType {
    #[display(fmt = "commitment")]
    Commitment,
    #[display(fmt = "trigger")]
    Trigger,
}

/// A signed transaction, as produced by a transaction builder.
///
/// The bytes are opaque to the watcher; the input and output box ids are
/// kept alongside so the transaction can be re-checked and re-broadcast
/// without decoding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub id: TxId,
    pub inputs: Vec<BoxId>,
    pub outputs: Vec<BoxId>,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

/// A transaction this watcher broadcast and still tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub tx_id: TxId,
    pub tx_type: TxType,
    pub tx: SignedTransaction,
    pub observation: Arc<Observation>,
    /// Unix time in milliseconds at which the transaction was last seen valid.
    pub last_seen_ms: u64,
    pub submitted_at_height: u64,
}

/// A token held in a box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub amount: u64,
}

/// An unspent box owned by this watcher: a permit box or its WID box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherBox {
    pub box_id: BoxId,
    pub value: u64,
    #[serde(default)]
    pub tokens: Vec<Token>,
}

impl WatcherBox {
    /// Sum of every token amount in the box.
    pub fn token_count(&self) -> u64 {
        self.tokens.iter().map(|t| t.amount).sum()
    }
}

/// An output the transaction builder is asked to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum OutputCandidate {
    /// The renewed permit box, carrying the remaining reward tokens.
    Permit { value: u64, rwt_count: u64, wid: String },
    /// The commitment box itself.
    Commitment {
        value: u64,
        wid: String,
        request_id: String,
        event_digest: String,
        permit_script_hash: String,
    },
    /// Change returned to the watcher.
    Payment { value: u64, tokens: Vec<Token> },
}

impl OutputCandidate {
    pub fn value(&self) -> u64 {
        match self {
            Self::Permit { value, .. }
            | Self::Commitment { value, .. }
            | Self::Payment { value, .. } => *value,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
