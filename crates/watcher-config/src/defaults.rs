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

/// The source network is `cardano` by default.
pub fn network() -> String {
    String::from("cardano")
}
/// Observations need `2` confirmations by default.
pub const fn observation_confirmation() -> u64 {
    2
}
/// Observations time out after `720` blocks by default.
pub const fn observation_valid_threshold() -> u64 {
    720
}
/// Transactions need `4` confirmations by default.
pub const fn transaction_confirmation() -> u64 {
    4
}
/// Invalid transactions are dropped after `30` minutes by default.
pub const fn transaction_removing_timeout() -> u64 {
    30 * 60 * 1000
}
/// The transaction queue runs every `180` seconds by default.
pub const fn transaction_check_interval() -> u64 {
    180
}
/// Commitments are created every `180` seconds by default.
pub const fn commitment_creation_interval() -> u64 {
    180
}
/// The transaction fee is `1_100_000` by default.
pub const fn fee() -> u64 {
    1_100_000
}
/// The minimum box value is `1_100_000` by default.
pub const fn min_box_value() -> u64 {
    1_100_000
}
/// Spent commitments are kept for `720` blocks by default.
pub const fn cleanup_height_limit() -> u64 {
    720
}
/// The cleanup runs every `600` seconds by default.
pub const fn cleanup_interval() -> u64 {
    600
}
/// Jobs wait up to `5_000` milliseconds before each run by default.
pub const fn max_jitter() -> u64 {
    5_000
}
