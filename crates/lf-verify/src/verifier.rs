use std::collections::BTreeMap;

use lf_store::{FinalizedEntry, JournalOp, LedgerReader, StoreResult};
use lf_types::{AccountId, Decimal, TimeRange};
use tracing::{debug, error, info};

use crate::fault::{AccountStatus, FaultOrigin, ReconciliationFault};
use crate::fold::{AccountFold, FoldOutcome};

/// Incremental per-account balance verifier.
#[derive(Debug)]
pub struct BalanceVerifier {
    tolerance: Decimal,
    accounts: BTreeMap<AccountId, AccountFold>,
}

/// Result of rebuilding a verifier from a store.
#[derive(Debug)]
pub struct Recovery {
    pub verifier: BalanceVerifier,
    /// Faults found while cross-checking the rebuilt balances.
    pub faults: Vec<ReconciliationFault>,
    /// Sequence of the checkpoint used, 0 if none.
    pub checkpoint_seq: u64,
    /// Journal records replayed on top of the checkpoint.
    pub tail_len: usize,
}

impl BalanceVerifier {
    pub fn new(tolerance: Decimal) -> Self {
        Self {
            tolerance: tolerance.abs(),
            accounts: BTreeMap::new(),
        }
    }

    pub fn tolerance(&self) -> Decimal {
        self.tolerance
    }

    /// Fold a newly appended entry into its account.
    pub fn apply(&mut self, entry: &FinalizedEntry) -> FoldOutcome {
        let account = entry.record.account.clone();
        let fold = self
            .accounts
            .entry(account)
            .or_insert_with(|| AccountFold::new(entry.record.currency.clone()));
        fold.insert(
            entry.order_key(),
            entry.record.signed_amount(),
            entry.is_superseded(),
        )
    }

    /// Stop counting a previously applied entry.
    pub fn supersede(&mut self, entry: &FinalizedEntry) -> Option<FoldOutcome> {
        self.accounts
            .get_mut(&entry.record.account)?
            .supersede(&entry.order_key())
    }

    pub fn balance(&self, account: &AccountId) -> Decimal {
        self.accounts
            .get(account)
            .map(AccountFold::balance)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn balances(&self) -> BTreeMap<AccountId, Decimal> {
        self.accounts
            .iter()
            .map(|(account, fold)| (account.clone(), fold.balance()))
            .collect()
    }

    pub fn account(&self, account: &AccountId) -> Option<&AccountFold> {
        self.accounts.get(account)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountId> {
        self.accounts.keys()
    }

    pub fn currency(&self, account: &AccountId) -> Option<&str> {
        self.accounts.get(account).map(|fold| fold.currency.as_str())
    }

    pub fn status(&self, account: &AccountId) -> AccountStatus {
        self.accounts
            .get(account)
            .map(|fold| fold.status.clone())
            .unwrap_or_default()
    }

    pub fn unverified(&self) -> Vec<AccountId> {
        self.accounts
            .iter()
            .filter(|(_, fold)| !fold.status.is_verified())
            .map(|(account, _)| account.clone())
            .collect()
    }

    /// Compare an account's computed balance with an independent value.
    ///
    /// On a fault the account is marked unverified and the fault returned.
    pub fn verify(
        &mut self,
        account: &AccountId,
        expected: Decimal,
        origin: FaultOrigin,
    ) -> Result<(), ReconciliationFault> {
        let computed = self.balance(account);
        if computed
            .checked_sub(expected)
            .is_some_and(|gap| gap.abs() <= self.tolerance)
        {
            return Ok(());
        }

        let fault = ReconciliationFault {
            account: account.clone(),
            computed,
            expected,
            tolerance: self.tolerance,
            origin,
        };
        error!(%account, %computed, %expected, origin = %fault.origin, "reconciliation fault");
        self.accounts
            .entry(account.clone())
            .or_default()
            .status = AccountStatus::Unverified {
            fault: fault.clone(),
        };
        Err(fault)
    }

    /// Rebuild one account from the store and clear its unverified status
    /// if the rebuilt balance matches the store's snapshot.
    pub fn reaudit<R: LedgerReader + ?Sized>(
        &mut self,
        store: &R,
        account: &AccountId,
    ) -> StoreResult<Result<(), ReconciliationFault>> {
        let entries = store.scan(account, TimeRange::all())?;
        let currency = entries
            .first()
            .map(|e| e.record.currency.clone())
            .unwrap_or_default();
        let mut fold = AccountFold::new(currency);
        for entry in &entries {
            fold.insert(
                entry.order_key(),
                entry.record.signed_amount(),
                entry.is_superseded(),
            );
        }
        self.accounts.insert(account.clone(), fold);

        let expected = store.snapshot(account)?;
        let outcome = self.verify(account, expected, FaultOrigin::StoreSnapshot);
        if outcome.is_ok() {
            info!(%account, entries = entries.len(), "account re-audited");
        }
        Ok(outcome)
    }

    /// Rebuild a verifier from every stored entry and cross-check it against
    /// the last checkpoint plus the journal tail and the store's snapshots.
    pub fn recover<R: LedgerReader + ?Sized>(store: &R, tolerance: Decimal) -> StoreResult<Recovery> {
        let mut verifier = Self::new(tolerance);
        for entry in store.entries()? {
            verifier.apply(&entry);
        }

        let checkpoint = store.last_checkpoint()?.unwrap_or_default();
        let mut expected = checkpoint.balances.clone();
        let tail = store.journal_since(checkpoint.seq)?;
        for record in &tail {
            match &record.op {
                JournalOp::Append { entry, retire } => {
                    add(&mut expected, &entry.record.account, entry.contribution());
                    for key in retire {
                        if let Some(retired) = store.get(key)? {
                            add(&mut expected, &retired.record.account, -retired.record.signed_amount());
                        }
                    }
                }
                JournalOp::Supersede { key, .. } => {
                    if let Some(entry) = store.get(key)? {
                        add(&mut expected, &entry.record.account, -entry.record.signed_amount());
                    }
                }
                JournalOp::Checkpoint(_) => {}
            }
        }

        let mut faults = Vec::new();
        let origin = FaultOrigin::Checkpoint {
            seq: checkpoint.seq,
        };
        let mut accounts: Vec<AccountId> = expected.keys().cloned().collect();
        accounts.extend(verifier.accounts().cloned());
        accounts.sort();
        accounts.dedup();
        for account in &accounts {
            let from_checkpoint = expected.get(account).copied().unwrap_or(Decimal::ZERO);
            if let Err(fault) = verifier.verify(account, from_checkpoint, origin.clone()) {
                faults.push(fault);
                continue;
            }
            let snapshot = store.snapshot(account)?;
            if let Err(fault) = verifier.verify(account, snapshot, FaultOrigin::StoreSnapshot) {
                faults.push(fault);
            }
        }

        debug!(
            accounts = accounts.len(),
            checkpoint_seq = checkpoint.seq,
            tail = tail.len(),
            faults = faults.len(),
            "verifier recovered"
        );
        Ok(Recovery {
            verifier,
            faults,
            checkpoint_seq: checkpoint.seq,
            tail_len: tail.len(),
        })
    }
}

/// Saturates instead of panicking; a saturated balance then fails the
/// cross-check like any other divergence.
fn add(balances: &mut BTreeMap<AccountId, Decimal>, account: &AccountId, delta: Decimal) {
    let balance = balances.entry(account.clone()).or_insert(Decimal::ZERO);
    *balance = balance.saturating_add(delta);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_store::{Finalization, InMemoryLedgerStore, LedgerWriter};
    use lf_types::{EntryKey, TransactionRecord};

    fn append(store: &InMemoryLedgerStore, id: &str, ts: u64, units: i64, late: bool) -> FinalizedEntry {
        let record = if units >= 0 {
            TransactionRecord::credit(id, ts, "A", Decimal::new(units, 0), "USD")
        } else {
            TransactionRecord::debit(id, ts, "A", Decimal::new(-units, 0), "USD")
        };
        store
            .append(Finalization {
                key: EntryKey::first(id.into()),
                record,
                late,
                superseded_by: None,
                retire: Vec::new(),
            })
            .unwrap()
    }

    fn a() -> AccountId {
        AccountId::new("A")
    }

    #[test]
    fn applies_and_tracks_currency() {
        let store = InMemoryLedgerStore::new();
        let mut verifier = BalanceVerifier::new(Decimal::ZERO);
        verifier.apply(&append(&store, "x", 10, 5, false));
        verifier.apply(&append(&store, "y", 11, -2, false));
        assert_eq!(verifier.balance(&a()), Decimal::new(3, 0));
        assert_eq!(verifier.currency(&a()), Some("USD"));
        assert!(verifier.status(&a()).is_verified());
    }

    #[test]
    fn mismatch_beyond_tolerance_marks_account_unverified() {
        let store = InMemoryLedgerStore::new();
        let mut verifier = BalanceVerifier::new(Decimal::new(1, 2));
        verifier.apply(&append(&store, "x", 10, 5, false));

        assert!(verifier
            .verify(&a(), Decimal::new(501, 2), FaultOrigin::StoreSnapshot)
            .is_ok());
        let fault = verifier
            .verify(&a(), Decimal::new(6, 0), FaultOrigin::StoreSnapshot)
            .unwrap_err();
        assert_eq!(fault.discrepancy(), Decimal::new(-1, 0));
        assert_eq!(verifier.unverified(), vec![a()]);
    }

    #[test]
    fn reaudit_clears_fault_when_store_agrees() {
        let store = InMemoryLedgerStore::new();
        let mut verifier = BalanceVerifier::new(Decimal::ZERO);
        let entry = append(&store, "x", 10, 5, false);
        verifier.apply(&entry);
        verifier.apply(&entry);
        assert!(verifier
            .verify(&a(), store.snapshot(&a()).unwrap(), FaultOrigin::StoreSnapshot)
            .is_err());

        assert!(verifier.reaudit(&store, &a()).unwrap().is_ok());
        assert!(verifier.status(&a()).is_verified());
        assert_eq!(verifier.balance(&a()), Decimal::new(5, 0));
    }

    #[test]
    fn recover_from_checkpoint_and_tail() {
        let store = InMemoryLedgerStore::new();
        append(&store, "x", 10, 5, false);
        append(&store, "y", 12, 3, false);
        let mut balances = BTreeMap::new();
        balances.insert(a(), Decimal::new(8, 0));
        store.write_checkpoint(balances).unwrap();
        append(&store, "w", 11, -2, true);
        store
            .supersede(&EntryKey::first("y".into()), &EntryKey::first("w".into()))
            .unwrap();

        let recovery = BalanceVerifier::recover(&store, Decimal::ZERO).unwrap();
        assert!(recovery.faults.is_empty());
        assert_eq!(recovery.checkpoint_seq, 3);
        assert_eq!(recovery.tail_len, 2);
        assert_eq!(recovery.verifier.balance(&a()), Decimal::new(3, 0));
    }

    #[test]
    fn recover_counts_retirements_journaled_with_the_append() {
        let store = InMemoryLedgerStore::new();
        append(&store, "x", 10, 5, false);
        store.write_checkpoint(BTreeMap::from([(a(), Decimal::new(5, 0))])).unwrap();
        store
            .append(Finalization {
                key: EntryKey::new("x".into(), 1),
                record: TransactionRecord::credit("x", 12, "A", Decimal::new(7, 0), "USD"),
                late: false,
                superseded_by: None,
                retire: vec![EntryKey::first("x".into())],
            })
            .unwrap();

        let recovery = BalanceVerifier::recover(&store, Decimal::ZERO).unwrap();
        assert!(recovery.faults.is_empty());
        assert_eq!(recovery.tail_len, 1);
        assert_eq!(recovery.verifier.balance(&a()), Decimal::new(7, 0));
    }

    #[test]
    fn recover_flags_a_checkpoint_that_disagrees() {
        let store = InMemoryLedgerStore::new();
        append(&store, "x", 10, 5, false);
        let mut balances = BTreeMap::new();
        balances.insert(a(), Decimal::new(7, 0));
        store.write_checkpoint(balances).unwrap();

        let recovery = BalanceVerifier::recover(&store, Decimal::ZERO).unwrap();
        assert_eq!(recovery.faults.len(), 1);
        assert_eq!(
            recovery.faults[0].origin,
            FaultOrigin::Checkpoint { seq: 2 }
        );
        assert_eq!(recovery.verifier.unverified(), vec![a()]);
    }

    #[test]
    fn recover_without_checkpoint_replays_whole_journal() {
        let store = InMemoryLedgerStore::new();
        append(&store, "x", 10, 5, false);
        let recovery = BalanceVerifier::recover(&store, Decimal::ZERO).unwrap();
        assert!(recovery.faults.is_empty());
        assert_eq!(recovery.checkpoint_seq, 0);
        assert_eq!(recovery.tail_len, 1);
    }
}
