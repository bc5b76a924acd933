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

//! Shared building blocks of the Rosen watcher: the error type, probes,
//! retry policies and metrics.

/// Metrics functionality
pub mod metric;
/// A module used for debugging watcher lifecycle, job runs, or other watcher state.
pub mod probe;
/// Retry functionality
pub mod retry;

/// An enum of all possible errors that could be encountered during the execution of the Rosen
/// Watcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Sled transaction error.
    #[error(transparent)]
    SledTransaction(
        #[from] sled::transaction::TransactionError<std::io::Error>,
    ),
    /// Prometheus registration error.
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// Config parse error.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Missing secrets in the config.
    #[error("Missing required watcher secret in the config")]
    MissingSecrets,
    /// An observation exists without its status row.
    ///
    /// Every observation gets a status when it is inserted, so this means the
    /// store is corrupted. It is never retried.
    #[error("Observation {} has no status", request_id)]
    MissingStatus {
        /// The request id of the observation.
        request_id: String,
    },
    /// The input boxes cannot cover the outputs of a transaction.
    #[error("Insufficient funds: required {}, available {}", required, available)]
    InsufficientFunds {
        /// The total value the outputs need.
        required: u64,
        /// The total value the inputs carry.
        available: u64,
    },
    /// The watcher has no unspent box holding its WID token.
    #[error("No unspent WID box found for {}", wid)]
    MissingWidBox {
        /// The watcher id.
        wid: String,
    },
    /// The chain rejected a transaction.
    #[error("Failed to submit transaction: {}", _0)]
    Submit(String),
    /// The chain could not be reached.
    #[error("Network error: {}", _0)]
    Network(String),
    /// Task stopped abnormally.
    #[error("Task Stopped Apnormally")]
    TaskStoppedAbnormally,
}

/// A type alias for the result for rosen watcher, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

/// The result of processing one item of a batch job.
///
/// A failure here belongs to the item alone; the rest of the batch still ran.
#[derive(Debug)]
pub struct ItemOutcome<K, O> {
    /// Identifies the item (a request id or a transaction id).
    pub key: K,
    /// What happened to the item, or why it failed.
    pub outcome: std::result::Result<O, String>,
}

impl<K, O> ItemOutcome<K, O> {
    pub fn ok(key: K, outcome: O) -> Self {
        Self {
            key,
            outcome: Ok(outcome),
        }
    }

    pub fn failed(key: K, error: impl std::fmt::Display) -> Self {
        Self {
            key,
            outcome: Err(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns the successful outcome, if any.
    pub fn value(&self) -> Option<&O> {
        self.outcome.as_ref().ok()
    }
}

/// Current unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
