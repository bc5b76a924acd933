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

use serde::{Deserialize, Serialize};

use crate::BoxId;

/// A commitment box this watcher published for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub commitment_box_id: BoxId,
    /// The request id of the observation this commitment attests to.
    pub event_id: String,
    pub wid: String,
    /// Hex encoded event digest.
    pub digest: String,
    /// Height of the block that spent the box, `None` while unspent.
    pub spend_block_height: Option<u64>,
}

impl Commitment {
    pub fn is_unspent(&self) -> bool {
        self.spend_block_height.is_none()
    }
}

/// An on-chain event trigger, created once enough watchers committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTrigger {
    pub box_id: BoxId,
    pub source_tx_id: String,
    /// Height at which the trigger box was created.
    pub height: u64,
    pub spend_block_height: Option<u64>,
}
