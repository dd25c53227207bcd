//! Common types shared across components

use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;

/// Ledger slot number
pub type Slot = u64;

/// Stable index assigned to a tracked transaction at creation time
pub type TrackingId = usize;

/// Confirmation strength tiers tracked by the lifecycle state machine.
///
/// `Processed` is the weak tier: the transaction was seen by a node but the
/// observation may still be discarded with an abandoned fork. `Confirmed` is
/// the strong tier: a supermajority voted on the block and reversion is no
/// longer expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
}

impl Commitment {
    /// All tiers the lifecycle subscribes to, weakest first
    pub const ALL: [Commitment; 2] = [Commitment::Processed, Commitment::Confirmed];

    pub fn is_strong(self) -> bool {
        matches!(self, Commitment::Confirmed)
    }

    pub fn as_commitment_config(self) -> CommitmentConfig {
        match self {
            Commitment::Processed => CommitmentConfig::processed(),
            Commitment::Confirmed => CommitmentConfig::confirmed(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
        }
    }
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
