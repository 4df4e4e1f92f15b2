use lf_types::{Decimal, OrderKey, Timestamp};

use crate::fault::AccountStatus;

/// How much of an account had to be re-folded for one change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FoldOutcome {
    /// The entry extended the account's tail; nothing was re-folded.
    Appended,
    /// Entries from position `from` onwards were re-folded.
    Refolded { from: usize, refolded: usize },
    /// The change did not alter any balance.
    Unchanged,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct FoldEntry {
    key: OrderKey,
    amount: Decimal,
    superseded: bool,
}

impl FoldEntry {
    fn contribution(&self) -> Decimal {
        if self.superseded {
            Decimal::ZERO
        } else {
            self.amount
        }
    }
}

/// Running balance of one account.
///
/// `entries` is sorted by order key and `prefix[i]` is the balance after
/// `entries[..=i]`.
#[derive(Clone, Debug, Default)]
pub struct AccountFold {
    entries: Vec<FoldEntry>,
    prefix: Vec<Decimal>,
    pub status: AccountStatus,
    pub currency: String,
}

impl AccountFold {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            ..Self::default()
        }
    }

    pub fn balance(&self) -> Decimal {
        self.prefix.last().copied().unwrap_or(Decimal::ZERO)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Balance after every entry with a timestamp at or before `ts`.
    pub fn balance_at(&self, ts: Timestamp) -> Decimal {
        let n = self.entries.partition_point(|e| e.key.timestamp <= ts);
        if n == 0 {
            Decimal::ZERO
        } else {
            self.prefix[n - 1]
        }
    }

    /// Fold one entry in, re-folding the tail if it lands before it.
    pub fn insert(&mut self, key: OrderKey, signed_amount: Decimal, superseded: bool) -> FoldOutcome {
        let entry = FoldEntry {
            key,
            amount: signed_amount,
            superseded,
        };
        if self.entries.last().map_or(true, |last| last.key <= entry.key) {
            let balance = self.balance().saturating_add(entry.contribution());
            self.entries.push(entry);
            self.prefix.push(balance);
            return FoldOutcome::Appended;
        }

        let at = self.entries.partition_point(|e| e.key < entry.key);
        self.entries.insert(at, entry);
        self.prefix.insert(at, Decimal::ZERO);
        let refolded = self.refold_from(at);
        FoldOutcome::Refolded { from: at, refolded }
    }

    /// Stop counting an entry. Re-folds from its position.
    pub fn supersede(&mut self, key: &OrderKey) -> Option<FoldOutcome> {
        let at = self.entries.binary_search_by(|e| e.key.cmp(key)).ok()?;
        if self.entries[at].superseded {
            return Some(FoldOutcome::Unchanged);
        }
        self.entries[at].superseded = true;
        let refolded = self.refold_from(at);
        Some(FoldOutcome::Refolded { from: at, refolded })
    }

    fn refold_from(&mut self, from: usize) -> usize {
        let mut balance = if from == 0 {
            Decimal::ZERO
        } else {
            self.prefix[from - 1]
        };
        for i in from..self.entries.len() {
            balance = balance.saturating_add(self.entries[i].contribution());
            self.prefix[i] = balance;
        }
        self.entries.len() - from
    }
}
