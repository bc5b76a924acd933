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

#![warn(missing_docs)]

//! # Watcher Configuration Module 🕸️
//!
//! A module for configuring the watcher.
//!
//! ## Overview
//!
//! The configuration is read from every `toml` and `json` file of a
//! directory, merged with `ROSEN_` prefixed environment variables. Possible
//! sections include:
//! * `watcher`: the watcher id (`wid`), its secret and the network it watches.
//! * `observation`: confirmation depth and validity window of observations.
//! * `transactions`: confirmation depth, removing timeout and check interval
//!   of the pending transactions.
//! * `commitment`: fee, minimum box value and creation interval of commitments.
//! * `cleanup`: how old spent commitments must be before they are removed.
//! * `scheduler`: random delay added before every job run.

/// CLI configuration
#[cfg(feature = "cli")]
pub mod cli;
/// Default values of the configuration.
pub mod defaults;
/// Utils for processing configuration
pub mod utils;

use serde::{Deserialize, Serialize};

/// WatcherConfig is the configuration for the rosen watcher.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatcherConfig {
    /// Identity of this watcher.
    pub watcher: WatcherIdentityConfig,
    /// Observation confirmation and validity.
    #[serde(default)]
    pub observation: ObservationConfig,
    /// Pending transactions handling.
    #[serde(default)]
    pub transactions: TransactionsConfig,
    /// Commitment creation.
    #[serde(default)]
    pub commitment: CommitmentConfig,
    /// Spent commitments cleanup.
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Job scheduling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl WatcherConfig {
    /// Makes sure that the config is valid, by going
    /// through the whole config and doing some basic checks.
    pub fn verify(&self) -> rosen_watcher_utils::Result<()> {
        use rosen_watcher_utils::Error;
        if self.watcher.wid.trim().is_empty() {
            return Err(Error::Generic("watcher wid must not be empty"));
        }
        match self.watcher.secret.as_deref() {
            Some(s) if !s.trim().is_empty() => {}
            _ => return Err(Error::MissingSecrets),
        }
        if self.commitment.fee == 0 {
            return Err(Error::Generic("commitment fee must be positive"));
        }
        if self.commitment.min_box_value == 0 {
            return Err(Error::Generic(
                "commitment min-box-value must be positive",
            ));
        }
        let intervals = [
            self.transactions.interval,
            self.commitment.creation_interval,
            self.cleanup.interval,
        ];
        if intervals.contains(&0) {
            return Err(Error::Generic("job intervals must be positive"));
        }
        Ok(())
    }
}

/// WatcherIdentityConfig identifies this watcher on chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatcherIdentityConfig {
    /// The watcher id token.
    pub wid: String,
    /// Secret used to sign the watcher transactions.
    ///
    /// Usually provided with the `ROSEN_WATCHER__SECRET` environment variable.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    /// Name of the source network this watcher observes.
    #[serde(default = "defaults::network")]
    pub network: String,
}

/// ObservationConfig controls when an observation can be acted upon.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ObservationConfig {
    /// Number of blocks an observation must be buried under.
    #[serde(default = "defaults::observation_confirmation")]
    pub confirmation: u64,
    /// Number of blocks after which an uncommitted observation times out.
    #[serde(default = "defaults::observation_valid_threshold")]
    pub valid_threshold: u64,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            confirmation: defaults::observation_confirmation(),
            valid_threshold: defaults::observation_valid_threshold(),
        }
    }
}

/// TransactionsConfig controls the pending transactions queue.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransactionsConfig {
    /// Confirmations after which a transaction is considered final.
    #[serde(default = "defaults::transaction_confirmation")]
    pub confirmation: u64,
    /// Milliseconds an invalid transaction is kept before it is dropped.
    #[serde(default = "defaults::transaction_removing_timeout")]
    pub removing_timeout: u64,
    /// Seconds between two runs of the queue.
    #[serde(default = "defaults::transaction_check_interval")]
    pub interval: u64,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            confirmation: defaults::transaction_confirmation(),
            removing_timeout: defaults::transaction_removing_timeout(),
            interval: defaults::transaction_check_interval(),
        }
    }
}

/// CommitmentConfig controls how commitment transactions are built.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommitmentConfig {
    /// Seconds between two runs of the commitment creation.
    #[serde(default = "defaults::commitment_creation_interval")]
    pub creation_interval: u64,
    /// Transaction fee.
    #[serde(default = "defaults::fee")]
    pub fee: u64,
    /// Minimum value of a box.
    #[serde(default = "defaults::min_box_value")]
    pub min_box_value: u64,
    /// Hash of the permit contract, written in every commitment box.
    #[serde(default)]
    pub permit_script_hash: String,
}

impl Default for CommitmentConfig {
    fn default() -> Self {
        Self {
            creation_interval: defaults::commitment_creation_interval(),
            fee: defaults::fee(),
            min_box_value: defaults::min_box_value(),
            permit_script_hash: String::new(),
        }
    }
}

/// CleanupConfig controls the removal of spent commitments.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CleanupConfig {
    /// Blocks a spent commitment is kept for.
    #[serde(default = "defaults::cleanup_height_limit")]
    pub height_limit: u64,
    /// Seconds between two cleanups.
    #[serde(default = "defaults::cleanup_interval")]
    pub interval: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            height_limit: defaults::cleanup_height_limit(),
            interval: defaults::cleanup_interval(),
        }
    }
}

/// SchedulerConfig controls how jobs are run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Upper bound, in milliseconds, of the random delay before each run.
    #[serde(default = "defaults::max_jitter")]
    pub max_jitter: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_jitter: defaults::max_jitter(),
        }
    }
}
