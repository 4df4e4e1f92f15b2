use std::fmt;

use lf_types::{AccountId, Decimal};

/// The independent value a computed balance was compared against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FaultOrigin {
    /// The ledger store's running balance.
    StoreSnapshot,
    /// The last durable checkpoint plus the journal tail after it.
    Checkpoint { seq: u64 },
}

impl fmt::Display for FaultOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultOrigin::StoreSnapshot => f.write_str("store snapshot"),
            FaultOrigin::Checkpoint { seq } => write!(f, "checkpoint #{seq} + tail"),
        }
    }
}

/// A recomputed balance disagrees with an independently stored one.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error(
    "reconciliation fault on {account}: computed {computed}, {origin} says {expected} (tolerance {tolerance})"
)]
pub struct ReconciliationFault {
    pub account: AccountId,
    pub computed: Decimal,
    pub expected: Decimal,
    pub tolerance: Decimal,
    pub origin: FaultOrigin,
}

impl ReconciliationFault {
    pub fn discrepancy(&self) -> Decimal {
        self.computed.saturating_sub(self.expected)
    }
}

/// Verification status of one account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AccountStatus {
    #[default]
    Verified,
    /// Faulted; stays unverified until a re-audit succeeds.
    Unverified { fault: ReconciliationFault },
}

impl AccountStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, AccountStatus::Verified)
    }
}
