use std::collections::BTreeMap;

use lf_types::{AccountId, Decimal, EntryKey, TimeRange, TransactionId};

use crate::entry::{BalanceCheckpoint, Finalization, FinalizedEntry, JournalRecord};
use crate::error::StoreResult;

/// Write boundary of the ledger store.
///
/// All implementations must satisfy these invariants:
/// - `append` is called at most once per entry key; a repeat is rejected.
/// - Non-late appends arrive in ascending order-key order.
/// - The journal record of a mutation is durable before the mutation is
///   visible to readers.
/// - A balance snapshot moves by exactly the contribution of the mutation.
pub trait LedgerWriter: Send + Sync {
    /// Append a finalized version. Returns the stored entry with its
    /// journal sequence number.
    fn append(&self, finalization: Finalization) -> StoreResult<FinalizedEntry>;

    /// Mark an appended entry superseded by another version.
    ///
    /// Returns `Ok(false)` if the entry was already superseded (idempotent).
    fn supersede(&self, key: &EntryKey, by: &EntryKey) -> StoreResult<bool>;

    /// Persist a balance checkpoint computed outside the store.
    fn write_checkpoint(
        &self,
        balances: BTreeMap<AccountId, Decimal>,
    ) -> StoreResult<BalanceCheckpoint>;
}

/// Read boundary of the ledger store.
pub trait LedgerReader: Send + Sync {
    /// Point lookup of one version.
    fn get(&self, key: &EntryKey) -> StoreResult<Option<FinalizedEntry>>;

    /// Every stored version of an identity, in revision order.
    fn versions(&self, identity: &TransactionId) -> StoreResult<Vec<FinalizedEntry>>;

    /// Stored entries whose `amendment_of` names `identity`.
    fn amendments_of(&self, identity: &TransactionId) -> StoreResult<Vec<FinalizedEntry>>;

    /// Entries of an account within a time range, ordered by order key.
    /// Superseded entries are included.
    fn scan(&self, account: &AccountId, range: TimeRange) -> StoreResult<Vec<FinalizedEntry>>;

    /// Balance of an account as of the last finalized record.
    fn snapshot(&self, account: &AccountId) -> StoreResult<Decimal>;

    /// Accounts with at least one entry, sorted.
    fn accounts(&self) -> StoreResult<Vec<AccountId>>;

    /// Number of stored entries, superseded included.
    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Every entry in append order.
    fn entries(&self) -> StoreResult<Vec<FinalizedEntry>>;

    /// Most recently written checkpoint.
    fn last_checkpoint(&self) -> StoreResult<Option<BalanceCheckpoint>>;

    /// Journal records with a sequence number strictly greater than `seq`.
    fn journal_since(&self, seq: u64) -> StoreResult<Vec<JournalRecord>>;

    /// Snapshot of every account.
    ///
    /// Default implementation calls `snapshot()` per account.
    fn snapshots(&self) -> StoreResult<BTreeMap<AccountId, Decimal>> {
        self.accounts()?
            .into_iter()
            .map(|account| {
                let balance = self.snapshot(&account)?;
                Ok((account, balance))
            })
            .collect()
    }
}

/// Full store capability used by the engine.
pub trait LedgerStore: LedgerReader + LedgerWriter {}

impl<T: LedgerReader + LedgerWriter> LedgerStore for T {}
