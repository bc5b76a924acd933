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

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Progress of an observation through the commit/reveal lifecycle.
///
/// ```text
/// NotCommitted -> CommitmentSent -> Committed -> RevealSent -> Revealed
/// ```
///
/// `TimedOut` can be reached from any non-terminal status. `Revealed` and
/// `TimedOut` never move again.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TxStatus {
    #[display(fmt = "not-committed")]
    NotCommitted,
    #[display(fmt = "commitment-sent")]
    CommitmentSent,
    #[display(fmt = "committed")]
    Committed,
    #[display(fmt = "reveal-sent")]
    RevealSent,
    #[display(fmt = "revealed")]
    Revealed,
    #[display(fmt = "timed-out")]
    TimedOut,
}

impl TxStatus {
    /// The status one step forward, or `None` for a terminal status.
    pub fn upgrade(self) -> Option<Self> {
        match self {
            Self::NotCommitted => Some(Self::CommitmentSent),
            Self::CommitmentSent => Some(Self::Committed),
            Self::Committed => Some(Self::RevealSent),
            Self::RevealSent => Some(Self::Revealed),
            Self::Revealed | Self::TimedOut => None,
        }
    }

    /// The status one step back, or `None` when there is nothing to undo.
    pub fn downgrade(self) -> Option<Self> {
        match self {
            Self::CommitmentSent => Some(Self::NotCommitted),
            Self::Committed => Some(Self::CommitmentSent),
            Self::RevealSent => Some(Self::Committed),
            Self::NotCommitted | Self::Revealed | Self::TimedOut => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Revealed | Self::TimedOut)
    }
}

/// The watcher's local status row for one observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationStatus {
    pub request_id: String,
    pub status: TxStatus,
}

impl ObservationStatus {
    pub fn new(request_id: impl Into<String>, status: TxStatus) -> Self {
        Self {
            request_id: request_id.into(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_walks_the_happy_path() {
        let mut status = TxStatus::NotCommitted;
        let mut seen = vec![status];
        while let Some(next) = status.upgrade() {
            status = next;
            seen.push(status);
        }
        assert_eq!(
            seen,
            vec![
                TxStatus::NotCommitted,
                TxStatus::CommitmentSent,
                TxStatus::Committed,
                TxStatus::RevealSent,
                TxStatus::Revealed,
            ]
        );
    }

    #[test]
    fn terminal_statuses_never_move() {
        for status in [TxStatus::Revealed, TxStatus::TimedOut] {
            assert!(status.is_terminal());
            assert_eq!(status.upgrade(), None);
            assert_eq!(status.downgrade(), None);
        }
    }

    #[test]
    fn downgrade_undoes_a_sent_transaction() {
        assert_eq!(
            TxStatus::CommitmentSent.downgrade(),
            Some(TxStatus::NotCommitted)
        );
        assert_eq!(TxStatus::RevealSent.downgrade(), Some(TxStatus::Committed));
        assert_eq!(TxStatus::NotCommitted.downgrade(), None);
    }
}
