use std::collections::BTreeMap;
use std::path::Path;

use lf_types::{AccountId, Decimal, EntryKey, TimeRange, TransactionId};
use tracing::{info, warn};

use crate::entry::{BalanceCheckpoint, Finalization, FinalizedEntry, JournalRecord};
use crate::error::StoreResult;
use crate::memory::{InMemoryLedgerStore, StoreState};
use crate::traits::{LedgerReader, LedgerWriter};
use crate::wal::{WalConfig, WriteAheadLog};

/// File name of the journal inside a store directory.
pub const JOURNAL_FILE: &str = "ledger.wal";

/// Ledger store persisted as a write-ahead journal.
///
/// Every mutation is written to the WAL before it is applied to the
/// in-memory index; opening the store replays the WAL to rebuild the index.
pub struct DurableLedgerStore {
    index: InMemoryLedgerStore,
    wal: WriteAheadLog,
}

impl DurableLedgerStore {
    /// Open (or create) a store rooted at `dir`.
    pub fn open(dir: &Path, config: WalConfig) -> StoreResult<Self> {
        let (wal, replay) = WriteAheadLog::open::<JournalRecord>(&dir.join(JOURNAL_FILE), config)?;
        let mut state = StoreState::default();
        let mut skipped = replay.skipped;

        for record in replay.records {
            let seq = record.seq;
            if seq > state.last_seq() + 1 {
                warn!(expected = state.last_seq() + 1, found = seq, "journal gap during recovery");
            }
            if let Err(e) = state.apply(record) {
                warn!(seq, error = %e, "skipping unreplayable journal record");
                skipped += 1;
            }
        }

        info!(
            path = %wal.path().display(),
            entries = state.len(),
            last_seq = state.last_seq(),
            skipped,
            truncated = replay.truncated,
            "ledger store recovered"
        );

        Ok(Self {
            index: InMemoryLedgerStore::from_state(state),
            wal,
        })
    }

    pub fn path(&self) -> &Path {
        self.wal.path()
    }

    pub fn last_seq(&self) -> StoreResult<u64> {
        self.index.last_seq()
    }
}

impl LedgerWriter for DurableLedgerStore {
    fn append(&self, finalization: Finalization) -> StoreResult<FinalizedEntry> {
        let mut state = self.index.write_state()?;
        let (entry, retire) = state.plan_append(finalization)?;
        let record = JournalRecord::append(entry.clone(), retire);
        self.wal.append(&record)?;
        state.apply(record)?;
        Ok(entry)
    }

    fn supersede(&self, key: &EntryKey, by: &EntryKey) -> StoreResult<bool> {
        let mut state = self.index.write_state()?;
        match state.plan_supersede(key, by)? {
            Some(record) => {
                self.wal.append(&record)?;
                state.apply(record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn write_checkpoint(
        &self,
        balances: BTreeMap<AccountId, Decimal>,
    ) -> StoreResult<BalanceCheckpoint> {
        let mut state = self.index.write_state()?;
        let checkpoint = state.plan_checkpoint(balances);
        let record = JournalRecord::checkpoint(checkpoint.clone());
        self.wal.append(&record)?;
        state.apply(record)?;
        Ok(checkpoint)
    }
}

impl LedgerReader for DurableLedgerStore {
    fn get(&self, key: &EntryKey) -> StoreResult<Option<FinalizedEntry>> {
        self.index.get(key)
    }

    fn versions(&self, identity: &TransactionId) -> StoreResult<Vec<FinalizedEntry>> {
        self.index.versions(identity)
    }

    fn amendments_of(&self, identity: &TransactionId) -> StoreResult<Vec<FinalizedEntry>> {
        self.index.amendments_of(identity)
    }

    fn scan(&self, account: &AccountId, range: TimeRange) -> StoreResult<Vec<FinalizedEntry>> {
        self.index.scan(account, range)
    }

    fn snapshot(&self, account: &AccountId) -> StoreResult<Decimal> {
        self.index.snapshot(account)
    }

    fn accounts(&self) -> StoreResult<Vec<AccountId>> {
        self.index.accounts()
    }

    fn len(&self) -> StoreResult<usize> {
        self.index.len()
    }

    fn entries(&self) -> StoreResult<Vec<FinalizedEntry>> {
        self.index.entries()
    }

    fn last_checkpoint(&self) -> StoreResult<Option<BalanceCheckpoint>> {
        self.index.last_checkpoint()
    }

    fn journal_since(&self, seq: u64) -> StoreResult<Vec<JournalRecord>> {
        self.index.journal_since(seq)
    }
}
