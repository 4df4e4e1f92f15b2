use std::collections::{BTreeMap, BTreeSet, HashMap};

use lf_index::{DedupDecision, IdentityIndex};
use lf_order::{Insertion, OrderError, OrderingBuffer, PendingRecord, SourceState, Watermark};
use lf_store::{BalanceCheckpoint, Finalization, FinalizedEntry, LedgerStore};
use lf_types::{AccountId, Decimal, SourceId, Timestamp, TransactionId, TransactionRecord};
use lf_verify::{AccountStatus, BalanceVerifier, FaultOrigin, ReconciliationFault, Recovery};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{FusionConfig, IdentityMode};
use crate::error::{FusionError, FusionResult};
use crate::event::{FusionEvent, RecordState};

/// Counters describing what the engine has done so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub ingested: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub conflicts: u64,
    pub amendments: u64,
    pub late_arrivals: u64,
    pub finalized: u64,
    pub superseded: u64,
    pub faults: u64,
    pub checkpoints: u64,
    pub source_failures: u64,
    pub rehydrated: u64,
    pub evicted: u64,
    /// Records waiting in the ordering buffer.
    pub pending: usize,
    /// Identities held by the index.
    pub indexed: usize,
}

/// Single-writer ingestion state machine.
///
/// Owns the identity index, the ordering buffer and the balance verifier;
/// every record passes through [`FusionEngine::ingest`] and every store
/// mutation happens inside it, so finalization is strictly sequential.
pub struct FusionEngine<S> {
    config: FusionConfig,
    store: S,
    index: IdentityIndex,
    buffer: OrderingBuffer,
    verifier: BalanceVerifier,
    modes: HashMap<SourceId, IdentityMode>,
    currencies: HashMap<AccountId, String>,
    outbox: Vec<FusionEvent>,
    stats: EngineStats,
    since_checkpoint: u64,
}

fn transition(identity: &TransactionId, state: RecordState) {
    debug!(%identity, %state, "record transition");
}

impl<S: LedgerStore> FusionEngine<S> {
    /// Start an engine on top of `store`, rebuilding balances from what it
    /// already holds.
    pub fn new(store: S, config: FusionConfig) -> FusionResult<Self> {
        config.validate()?;
        let Recovery {
            verifier,
            faults,
            checkpoint_seq,
            tail_len,
        } = BalanceVerifier::recover(&store, config.balance_tolerance)?;

        let mut buffer = OrderingBuffer::new(config.lateness_window);
        let entries = store.entries()?;
        if let Some(resume) = entries
            .iter()
            .filter(|e| !e.late)
            .map(FinalizedEntry::order_key)
            .max()
        {
            buffer.resume_after(resume);
        }

        let currencies = verifier
            .accounts()
            .filter_map(|account| {
                verifier
                    .currency(account)
                    .filter(|currency| !currency.is_empty())
                    .map(|currency| (account.clone(), currency.to_string()))
            })
            .collect();

        if !entries.is_empty() {
            info!(
                entries = entries.len(),
                checkpoint_seq,
                tail = tail_len,
                faults = faults.len(),
                "fusion engine resumed from store"
            );
        }

        let stats = EngineStats {
            faults: faults.len() as u64,
            ..EngineStats::default()
        };
        Ok(Self {
            config,
            store,
            index: IdentityIndex::new(),
            buffer,
            verifier,
            modes: HashMap::new(),
            currencies,
            outbox: faults.into_iter().map(FusionEvent::ReconciliationFault).collect(),
            stats,
            since_checkpoint: 0,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn register_source(&mut self, source: SourceId, mode: IdentityMode) -> FusionResult<()> {
        self.buffer.register_source(source.clone())?;
        debug!(%source, ?mode, "source registered with engine");
        self.modes.insert(source, mode);
        Ok(())
    }

    /// Validate, deduplicate and buffer one record, then finalize whatever
    /// its arrival made eligible.
    pub fn ingest(&mut self, record: TransactionRecord) -> FusionResult<DedupDecision> {
        let record = match self.admit(record) {
            Ok(record) => record,
            Err(e) => {
                self.stats.rejected += 1;
                debug!(error = %e, "record rejected");
                return Err(e);
            }
        };
        self.stats.ingested += 1;
        transition(&record.identity, RecordState::Ingested);

        self.rehydrate(&record.identity)?;
        if let Some(target) = &record.amendment_of {
            self.rehydrate(target)?;
        }

        let decision = self.index.observe(&record);
        let source = record.source_id.clone();
        let timestamp = record.timestamp;
        match &decision {
            DedupDecision::Accepted { .. } => transition(&record.identity, RecordState::Accepted),
            DedupDecision::Amendment {
                supersedes,
                target_known,
                ..
            } => {
                self.stats.amendments += 1;
                debug!(identity = %record.identity, %supersedes, target_known, "amendment accepted");
                transition(&record.identity, RecordState::Amendment);
            }
            DedupDecision::Conflict(resolution) => {
                self.stats.conflicts += 1;
                info!(
                    identity = %record.identity,
                    canonical = %resolution.canonical,
                    superseded = %resolution.superseded,
                    %source,
                    "conflicting versions detected"
                );
                transition(&record.identity, RecordState::Conflict);
                self.outbox.push(FusionEvent::ConflictDetected {
                    resolution: resolution.clone(),
                    source: source.clone(),
                });
            }
            DedupDecision::RejectedDuplicate { existing } => {
                self.stats.duplicates += 1;
                info!(identity = %record.identity, %existing, %source, "duplicate rejected");
                transition(&record.identity, RecordState::RejectedDuplicate);
                self.outbox.push(FusionEvent::DuplicateRejected {
                    identity: record.identity.clone(),
                    existing: existing.clone(),
                    source: source.clone(),
                });
            }
        }

        if let Some(key) = decision.buffered_key().cloned() {
            match self.buffer.insert(PendingRecord::new(key.clone(), record))? {
                Insertion::Buffered => transition(&key.identity, RecordState::Buffered),
                Insertion::Late(pending) => {
                    let order_key = pending.order_key();
                    let last_released = self
                        .buffer
                        .last_released()
                        .cloned()
                        .unwrap_or_else(|| order_key.clone());
                    self.stats.late_arrivals += 1;
                    info!(%key, %order_key, %last_released, "late arrival");
                    self.outbox.push(FusionEvent::LateArrival {
                        key,
                        order_key,
                        last_released,
                    });
                    self.finalize(pending, true)?;
                }
            }
        }

        self.buffer.observe_watermark(&source, timestamp)?;
        self.drain()?;
        Ok(decision)
    }

    fn admit(&mut self, mut record: TransactionRecord) -> FusionResult<TransactionRecord> {
        let state = self
            .buffer
            .source_state(&record.source_id)
            .ok_or_else(|| OrderError::UnknownSource(record.source_id.clone()))?;
        if !state.is_active() {
            return Err(OrderError::SourceNotActive {
                source_id: record.source_id.clone(),
                state: state.label(),
            }
            .into());
        }

        if self.modes.get(&record.source_id).copied().unwrap_or_default() == IdentityMode::Content
        {
            record.identity = TransactionId::from_digest(&record.payload_digest());
        }
        record.validate()?;

        match self.currencies.get(&record.account) {
            Some(expected) if *expected != record.currency => {
                return Err(FusionError::CurrencyMismatch {
                    identity: record.identity.clone(),
                    account: record.account.clone(),
                    expected: expected.clone(),
                    found: record.currency.clone(),
                });
            }
            Some(_) => {}
            None => {
                self.currencies
                    .insert(record.account.clone(), record.currency.clone());
            }
        }
        Ok(record)
    }

    /// Reload an identity the index no longer holds from the store.
    fn rehydrate(&mut self, identity: &TransactionId) -> FusionResult<()> {
        if self
            .index
            .entry(identity)
            .is_some_and(|entry| !entry.versions.is_empty())
        {
            return Ok(());
        }
        let versions = self.store.versions(identity)?;
        let amendments = self.store.amendments_of(identity)?;
        if self.index.restore(identity, &versions, &amendments) {
            self.stats.rehydrated += 1;
        }
        Ok(())
    }

    /// Advance a source's watermark and finalize what became eligible.
    pub fn advance_watermark(&mut self, source: &SourceId, ts: Timestamp) -> FusionResult<usize> {
        if self.buffer.observe_watermark(source, ts)? {
            self.drain()
        } else {
            Ok(0)
        }
    }

    pub fn close_source(&mut self, source: &SourceId) -> FusionResult<usize> {
        self.buffer.close_source(source)?;
        info!(%source, "source closed");
        self.outbox.push(FusionEvent::SourceClosed {
            source: source.clone(),
        });
        self.drain()
    }

    /// Mark a source permanently failed. Its watermark becomes infinite so
    /// it no longer holds finalization back.
    pub fn fail_source(&mut self, source: &SourceId, reason: impl Into<String>) -> FusionResult<usize> {
        let reason = reason.into();
        self.buffer.fail_source(source, reason.clone())?;
        self.stats.source_failures += 1;
        warn!(%source, %reason, "source failure");
        self.outbox.push(FusionEvent::SourceFailure {
            source: source.clone(),
            reason,
        });
        self.drain()
    }

    /// Finalize every record whose window has closed.
    pub fn drain(&mut self) -> FusionResult<usize> {
        let ready = self.buffer.drain_ready();
        let count = ready.len();
        for pending in ready {
            self.finalize(pending, false)?;
        }
        self.evict();
        Ok(count)
    }

    /// Close every active source, finalize everything still buffered and
    /// write a final checkpoint.
    pub fn shutdown(&mut self) -> FusionResult<usize> {
        let active: Vec<SourceId> = self
            .buffer
            .sources()
            .filter(|(_, state)| state.is_active())
            .map(|(source, _)| source.clone())
            .collect();
        for source in &active {
            self.buffer.close_source(source)?;
        }

        let remaining = self.buffer.drain_all();
        let count = remaining.len();
        for pending in remaining {
            self.finalize(pending, false)?;
        }
        if self.since_checkpoint > 0 {
            self.checkpoint()?;
        }
        info!(
            finalized = self.stats.finalized,
            flushed = count,
            closed = active.len(),
            "fusion engine shut down"
        );
        Ok(count)
    }

    fn finalize(&mut self, pending: PendingRecord, late: bool) -> FusionResult<()> {
        let PendingRecord { key, record } = pending;
        if let Some(target) = &record.amendment_of {
            self.rehydrate(target)?;
        }

        let plan = self.index.plan_finalization(&key, &record);
        let entry = self.store.append(Finalization {
            key: key.clone(),
            record,
            late,
            superseded_by: plan.superseded_by,
            retire: plan.retire.clone(),
        })?;
        let outcome = self.verifier.apply(&entry);
        self.stats.finalized += 1;
        debug!(
            %key,
            seq = entry.seq,
            late,
            superseded = entry.is_superseded(),
            ?outcome,
            "record finalized"
        );
        transition(&key.identity, RecordState::Finalized);

        let mut touched = BTreeSet::new();
        touched.insert(entry.record.account.clone());
        self.outbox.push(FusionEvent::Finalized(entry));

        for retired in plan.retire {
            let Some(stored) = self.store.get(&retired)? else {
                continue;
            };
            if stored.superseded_by.as_ref() != Some(&key) {
                continue;
            }
            let outcome = self.verifier.supersede(&stored);
            self.stats.superseded += 1;
            debug!(key = %retired, by = %key, ?outcome, "entry superseded");
            touched.insert(stored.record.account.clone());
            self.outbox.push(FusionEvent::Superseded {
                key: retired,
                by: key.clone(),
            });
        }

        for account in &touched {
            self.cross_check(account)?;
        }

        self.since_checkpoint += 1;
        if self.since_checkpoint >= self.config.checkpoint_interval {
            self.checkpoint()?;
        }
        Ok(())
    }

    fn cross_check(&mut self, account: &AccountId) -> FusionResult<()> {
        if !self.verifier.status(account).is_verified() {
            return Ok(());
        }
        let expected = self.store.snapshot(account)?;
        if let Err(fault) = self
            .verifier
            .verify(account, expected, FaultOrigin::StoreSnapshot)
        {
            self.stats.faults += 1;
            self.outbox.push(FusionEvent::ReconciliationFault(fault));
        }
        Ok(())
    }

    fn evict(&mut self) {
        let Watermark::At(frontier) = self.buffer.frontier() else {
            return;
        };
        let grace = self
            .config
            .lateness_window
            .saturating_add(self.config.index_retention_horizon);
        let evicted = self
            .index
            .evict_finalized_before(frontier.saturating_sub(grace));
        self.stats.evicted += evicted as u64;
    }

    /// Persist the verified balances as a durable checkpoint.
    ///
    /// Unverified accounts are left out so a faulted balance is never used
    /// as a recovery baseline.
    pub fn checkpoint(&mut self) -> FusionResult<BalanceCheckpoint> {
        let balances: BTreeMap<AccountId, Decimal> = self
            .verifier
            .balances()
            .into_iter()
            .filter(|(account, _)| self.verifier.status(account).is_verified())
            .collect();
        let accounts = balances.len();
        let checkpoint = self.store.write_checkpoint(balances)?;
        self.since_checkpoint = 0;
        self.stats.checkpoints += 1;
        info!(seq = checkpoint.seq, accounts, "balance checkpoint written");
        self.outbox.push(FusionEvent::Checkpoint {
            seq: checkpoint.seq,
            accounts,
        });
        Ok(checkpoint)
    }

    /// Rebuild one account from the store. A successful re-audit clears
    /// its unverified status.
    pub fn reaudit(&mut self, account: &AccountId) -> FusionResult<AccountStatus> {
        if let Err(fault) = self.verifier.reaudit(&self.store, account)? {
            self.stats.faults += 1;
            self.outbox.push(FusionEvent::ReconciliationFault(fault));
        }
        Ok(self.verifier.status(account))
    }

    pub fn balance(&self, account: &AccountId) -> Decimal {
        self.verifier.balance(account)
    }

    pub fn balances(&self) -> BTreeMap<AccountId, Decimal> {
        self.verifier.balances()
    }

    pub fn account_status(&self, account: &AccountId) -> AccountStatus {
        self.verifier.status(account)
    }

    /// Faults of every account that is currently unverified.
    pub fn faults(&self) -> Vec<ReconciliationFault> {
        self.verifier
            .unverified()
            .iter()
            .filter_map(|account| match self.verifier.status(account) {
                AccountStatus::Unverified { fault } => Some(fault),
                AccountStatus::Verified => None,
            })
            .collect()
    }

    pub fn frontier(&self) -> Watermark {
        self.buffer.frontier()
    }

    pub fn source_state(&self, source: &SourceId) -> Option<&SourceState> {
        self.buffer.source_state(source)
    }

    pub fn sources(&self) -> Vec<(SourceId, SourceState)> {
        self.buffer
            .sources()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            pending: self.buffer.len(),
            indexed: self.index.len(),
            ..self.stats.clone()
        }
    }

    /// Take every event produced since the last call.
    pub fn drain_events(&mut self) -> Vec<FusionEvent> {
        std::mem::take(&mut self.outbox)
    }
}
