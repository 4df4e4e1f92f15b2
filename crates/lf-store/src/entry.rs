use std::collections::BTreeMap;

use lf_types::{AccountId, Decimal, EntryKey, OrderKey, TransactionRecord};
use serde::{Deserialize, Serialize};

/// A record version leaving the ordering buffer, ready to be appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finalization {
    pub key: EntryKey,
    pub record: TransactionRecord,
    /// Finalized after a later record was already emitted.
    pub late: bool,
    /// Set when the version is appended already superseded.
    pub superseded_by: Option<EntryKey>,
    /// Stored versions this one supersedes. Marked in the same journal
    /// record as the append.
    pub retire: Vec<EntryKey>,
}

/// A finalized record version as held by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedEntry {
    /// Journal sequence number of the append.
    pub seq: u64,
    pub key: EntryKey,
    pub record: TransactionRecord,
    pub late: bool,
    pub superseded_by: Option<EntryKey>,
}

impl FinalizedEntry {
    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(self.record.timestamp, &self.key)
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    /// Signed amount this entry adds to its account balance.
    pub fn contribution(&self) -> Decimal {
        if self.is_superseded() {
            Decimal::ZERO
        } else {
            self.record.signed_amount()
        }
    }
}

/// Per-account balances as independently computed by the verifier.
///
/// The balances cover every journal record with a sequence number below
/// `seq`, which is the sequence number of the checkpoint record itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheckpoint {
    pub seq: u64,
    pub balances: BTreeMap<AccountId, Decimal>,
}

impl BalanceCheckpoint {
    pub fn balance(&self, account: &AccountId) -> Decimal {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }
}

/// One durable store mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalOp {
    /// Append a version and mark the still-effective versions it retires.
    Append {
        entry: FinalizedEntry,
        retire: Vec<EntryKey>,
    },
    Supersede { key: EntryKey, by: EntryKey },
    Checkpoint(BalanceCheckpoint),
}

/// A journal operation stamped with its sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub seq: u64,
    pub op: JournalOp,
}

impl JournalRecord {
    pub fn append(entry: FinalizedEntry, retire: Vec<EntryKey>) -> Self {
        Self {
            seq: entry.seq,
            op: JournalOp::Append { entry, retire },
        }
    }

    pub fn checkpoint(checkpoint: BalanceCheckpoint) -> Self {
        Self {
            seq: checkpoint.seq,
            op: JournalOp::Checkpoint(checkpoint),
        }
    }
}
