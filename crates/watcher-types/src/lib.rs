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

//! Domain types shared by every part of the watcher.

mod commitment;
mod observation;
mod status;
mod transaction;

pub use commitment::*;
pub use observation::*;
pub use status::*;
pub use transaction::*;

/// Identifier of a box (UTXO) on the watcher's chain.
pub type BoxId = String;
/// Identifier of a transaction.
pub type TxId = String;
