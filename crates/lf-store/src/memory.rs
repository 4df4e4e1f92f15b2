use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use lf_types::{AccountId, Decimal, EntryKey, OrderKey, TimeRange, TransactionId};

use crate::entry::{BalanceCheckpoint, Finalization, FinalizedEntry, JournalOp, JournalRecord};
use crate::error::{StoreError, StoreResult};
use crate::traits::{LedgerReader, LedgerWriter};

/// Index-backed ledger store for tests, local runs, and embedding.
///
/// Also serves as the in-memory view of [`crate::DurableLedgerStore`],
/// which rebuilds it from the write-ahead log on open.
pub struct InMemoryLedgerStore {
    inner: RwLock<StoreState>,
}

/// Store index. Mutations are split into a validating `plan_*` step that
/// produces the journal payload and an `apply` step that does not fail on
/// a planned record, so a durable backend can persist in between.
#[derive(Default)]
pub(crate) struct StoreState {
    entries: Vec<FinalizedEntry>,
    by_key: HashMap<EntryKey, usize>,
    by_identity: HashMap<TransactionId, Vec<usize>>,
    /// Entries carrying `amendment_of`, keyed by the amended identity.
    by_target: HashMap<TransactionId, Vec<usize>>,
    /// Entry positions per account, sorted by order key.
    by_account: HashMap<AccountId, Vec<usize>>,
    balances: BTreeMap<AccountId, Decimal>,
    journal: Vec<JournalRecord>,
    checkpoint: Option<BalanceCheckpoint>,
    last_in_order: Option<OrderKey>,
    last_seq: u64,
}

impl StoreState {
    fn next_seq(&self) -> u64 {
        self.last_seq + 1
    }

    pub(crate) fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Validate an append. Returns the entry to store and the retired keys
    /// that are still effective, which is what the journal records.
    pub(crate) fn plan_append(
        &self,
        finalization: Finalization,
    ) -> StoreResult<(FinalizedEntry, Vec<EntryKey>)> {
        if self.by_key.contains_key(&finalization.key) {
            return Err(StoreError::DuplicateEntry(finalization.key));
        }

        let attempted = OrderKey::new(finalization.record.timestamp, &finalization.key);
        if !finalization.late {
            if let Some(last) = &self.last_in_order {
                if attempted < *last {
                    return Err(StoreError::OutOfOrder {
                        attempted,
                        last: last.clone(),
                    });
                }
            }
        }

        let mut retire = Vec::new();
        for key in finalization.retire {
            if !self.entry(&key)?.is_superseded() && !retire.contains(&key) {
                retire.push(key);
            }
        }

        let entry = FinalizedEntry {
            seq: self.next_seq(),
            key: finalization.key,
            record: finalization.record,
            late: finalization.late,
            superseded_by: finalization.superseded_by,
        };
        self.rebalance_append(&entry, &retire)?;
        Ok((entry, retire))
    }

    pub(crate) fn plan_supersede(
        &self,
        key: &EntryKey,
        by: &EntryKey,
    ) -> StoreResult<Option<JournalRecord>> {
        let entry = self.entry(key)?;
        if entry.is_superseded() {
            return Ok(None);
        }
        self.rebalance(&[(&entry.record.account, -entry.record.signed_amount())])?;
        Ok(Some(JournalRecord {
            seq: self.next_seq(),
            op: JournalOp::Supersede {
                key: key.clone(),
                by: by.clone(),
            },
        }))
    }

    pub(crate) fn plan_checkpoint(&self, balances: BTreeMap<AccountId, Decimal>) -> BalanceCheckpoint {
        BalanceCheckpoint {
            seq: self.next_seq(),
            balances,
        }
    }

    fn entry(&self, key: &EntryKey) -> StoreResult<&FinalizedEntry> {
        self.by_key
            .get(key)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| StoreError::EntryNotFound(key.clone()))
    }

    /// Balances after applying `changes`, without touching the store.
    fn rebalance(&self, changes: &[(&AccountId, Decimal)]) -> StoreResult<BTreeMap<AccountId, Decimal>> {
        let mut next = BTreeMap::new();
        for (account, delta) in changes {
            let current = next
                .get(*account)
                .copied()
                .unwrap_or_else(|| self.snapshot(account));
            let balance = current
                .checked_add(*delta)
                .ok_or_else(|| StoreError::Overflow {
                    account: (*account).clone(),
                })?;
            next.insert((*account).clone(), balance);
        }
        Ok(next)
    }

    fn rebalance_append(
        &self,
        entry: &FinalizedEntry,
        retire: &[EntryKey],
    ) -> StoreResult<BTreeMap<AccountId, Decimal>> {
        let mut changes = vec![(&entry.record.account, entry.contribution())];
        for key in retire {
            let retired = self.entry(key)?;
            if !retired.is_superseded() {
                changes.push((&retired.record.account, -retired.record.signed_amount()));
            }
        }
        self.rebalance(&changes)
    }

    /// Apply a journal record produced by a `plan_*` step or read back from
    /// the write-ahead log. Either the whole record applies or nothing does.
    pub(crate) fn apply(&mut self, record: JournalRecord) -> StoreResult<()> {
        if record.seq <= self.last_seq {
            return Err(StoreError::StaleSequence {
                last: self.last_seq,
                found: record.seq,
            });
        }

        match &record.op {
            JournalOp::Append { entry, retire } => {
                if self.by_key.contains_key(&entry.key) {
                    return Err(StoreError::DuplicateEntry(entry.key.clone()));
                }
                let balances = self.rebalance_append(entry, retire)?;
                let retired: Vec<usize> = retire
                    .iter()
                    .filter_map(|key| self.by_key.get(key).copied())
                    .filter(|&i| !self.entries[i].is_superseded())
                    .collect();

                self.balances.extend(balances);
                for i in retired {
                    self.entries[i].superseded_by = Some(entry.key.clone());
                }

                let index = self.entries.len();
                let order_key = entry.order_key();
                let account = entry.record.account.clone();
                if !entry.late && self.last_in_order.as_ref().map_or(true, |l| order_key > *l) {
                    self.last_in_order = Some(order_key.clone());
                }

                self.by_key.insert(entry.key.clone(), index);
                self.by_identity
                    .entry(entry.key.identity.clone())
                    .or_default()
                    .push(index);
                if let Some(target) = &entry.record.amendment_of {
                    self.by_target.entry(target.clone()).or_default().push(index);
                }
                self.entries.push(entry.clone());

                let positions = self.by_account.entry(account).or_default();
                let entries = &self.entries;
                let at = positions.partition_point(|&i| entries[i].order_key() < order_key);
                positions.insert(at, index);
            }
            JournalOp::Supersede { key, by } => {
                let entry = self.entry(key)?;
                if !entry.is_superseded() {
                    let balances =
                        self.rebalance(&[(&entry.record.account, -entry.record.signed_amount())])?;
                    self.balances.extend(balances);
                    if let Some(&index) = self.by_key.get(key) {
                        self.entries[index].superseded_by = Some(by.clone());
                    }
                }
            }
            JournalOp::Checkpoint(checkpoint) => {
                self.checkpoint = Some(checkpoint.clone());
            }
        }

        self.last_seq = record.seq;
        self.journal.push(record);
        Ok(())
    }

    pub(crate) fn get(&self, key: &EntryKey) -> Option<FinalizedEntry> {
        self.by_key.get(key).map(|&i| self.entries[i].clone())
    }

    pub(crate) fn versions(&self, identity: &TransactionId) -> Vec<FinalizedEntry> {
        let mut versions: Vec<FinalizedEntry> = self
            .by_identity
            .get(identity)
            .map(|positions| positions.iter().map(|&i| self.entries[i].clone()).collect())
            .unwrap_or_default();
        versions.sort_by_key(|e| e.key.revision);
        versions
    }

    pub(crate) fn amendments_of(&self, identity: &TransactionId) -> Vec<FinalizedEntry> {
        self.by_target
            .get(identity)
            .map(|positions| positions.iter().map(|&i| self.entries[i].clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn scan(&self, account: &AccountId, range: TimeRange) -> Vec<FinalizedEntry> {
        self.by_account
            .get(account)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&i| &self.entries[i])
                    .filter(|e| range.contains(e.record.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn snapshot(&self, account: &AccountId) -> Decimal {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    pub(crate) fn accounts(&self) -> Vec<AccountId> {
        self.balances.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> Vec<FinalizedEntry> {
        self.entries.clone()
    }

    pub(crate) fn last_checkpoint(&self) -> Option<BalanceCheckpoint> {
        self.checkpoint.clone()
    }

    pub(crate) fn journal_since(&self, seq: u64) -> Vec<JournalRecord> {
        let start = self.journal.partition_point(|r| r.seq <= seq);
        self.journal[start..].to_vec()
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreState::default()),
        }
    }

    pub(crate) fn from_state(state: StoreState) -> Self {
        Self {
            inner: RwLock::new(state),
        }
    }

    pub(crate) fn read_state(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    pub(crate) fn write_state(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Sequence number of the last journal record.
    pub fn last_seq(&self) -> StoreResult<u64> {
        Ok(self.read_state()?.last_seq())
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerWriter for InMemoryLedgerStore {
    fn append(&self, finalization: Finalization) -> StoreResult<FinalizedEntry> {
        let mut state = self.write_state()?;
        let (entry, retire) = state.plan_append(finalization)?;
        state.apply(JournalRecord::append(entry.clone(), retire))?;
        Ok(entry)
    }

    fn supersede(&self, key: &EntryKey, by: &EntryKey) -> StoreResult<bool> {
        let mut state = self.write_state()?;
        match state.plan_supersede(key, by)? {
            Some(record) => {
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
        let mut state = self.write_state()?;
        let checkpoint = state.plan_checkpoint(balances);
        state.apply(JournalRecord::checkpoint(checkpoint.clone()))?;
        Ok(checkpoint)
    }
}

impl LedgerReader for InMemoryLedgerStore {
    fn get(&self, key: &EntryKey) -> StoreResult<Option<FinalizedEntry>> {
        Ok(self.read_state()?.get(key))
    }

    fn versions(&self, identity: &TransactionId) -> StoreResult<Vec<FinalizedEntry>> {
        Ok(self.read_state()?.versions(identity))
    }

    fn amendments_of(&self, identity: &TransactionId) -> StoreResult<Vec<FinalizedEntry>> {
        Ok(self.read_state()?.amendments_of(identity))
    }

    fn scan(&self, account: &AccountId, range: TimeRange) -> StoreResult<Vec<FinalizedEntry>> {
        Ok(self.read_state()?.scan(account, range))
    }

    fn snapshot(&self, account: &AccountId) -> StoreResult<Decimal> {
        Ok(self.read_state()?.snapshot(account))
    }

    fn accounts(&self) -> StoreResult<Vec<AccountId>> {
        Ok(self.read_state()?.accounts())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.read_state()?.len())
    }

    fn entries(&self) -> StoreResult<Vec<FinalizedEntry>> {
        Ok(self.read_state()?.entries())
    }

    fn last_checkpoint(&self) -> StoreResult<Option<BalanceCheckpoint>> {
        Ok(self.read_state()?.last_checkpoint())
    }

    fn journal_since(&self, seq: u64) -> StoreResult<Vec<JournalRecord>> {
        Ok(self.read_state()?.journal_since(seq))
    }
}
