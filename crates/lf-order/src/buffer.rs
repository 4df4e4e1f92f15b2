use std::collections::BTreeMap;

use lf_types::{EntryKey, OrderKey, SourceId, Timestamp, TransactionRecord};
use tracing::{debug, trace};

use crate::error::{OrderError, OrderResult};
use crate::source::{SourceState, Watermark};

/// A deduplicated record version waiting for its window to close.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRecord {
    pub key: EntryKey,
    pub record: TransactionRecord,
}

impl PendingRecord {
    pub fn new(key: EntryKey, record: TransactionRecord) -> Self {
        Self { key, record }
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(self.record.timestamp, &self.key)
    }
}

/// Outcome of inserting a record into the buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Insertion {
    Buffered,
    /// The record sorts before something already released. It is handed
    /// back to be finalized immediately, out of order.
    Late(PendingRecord),
}

/// Holds pending records until every active source has moved past them.
#[derive(Debug)]
pub struct OrderingBuffer {
    lateness_window: u64,
    sources: BTreeMap<SourceId, SourceState>,
    pending: BTreeMap<OrderKey, PendingRecord>,
    last_released: Option<OrderKey>,
}

impl OrderingBuffer {
    pub fn new(lateness_window: u64) -> Self {
        Self {
            lateness_window,
            sources: BTreeMap::new(),
            pending: BTreeMap::new(),
            last_released: None,
        }
    }

    pub fn lateness_window(&self) -> u64 {
        self.lateness_window
    }

    pub fn register_source(&mut self, source: SourceId) -> OrderResult<()> {
        if self.sources.contains_key(&source) {
            return Err(OrderError::AlreadyRegistered(source));
        }
        debug!(%source, "source registered");
        self.sources
            .insert(source, SourceState::Active { watermark: None });
        Ok(())
    }

    pub fn source_state(&self, source: &SourceId) -> Option<&SourceState> {
        self.sources.get(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = (&SourceId, &SourceState)> {
        self.sources.iter()
    }

    pub fn active_sources(&self) -> usize {
        self.sources.values().filter(|s| s.is_active()).count()
    }

    fn active_mut(&mut self, source: &SourceId) -> OrderResult<&mut SourceState> {
        let state = self
            .sources
            .get_mut(source)
            .ok_or_else(|| OrderError::UnknownSource(source.clone()))?;
        if !state.is_active() {
            return Err(OrderError::SourceNotActive {
                source_id: source.clone(),
                state: state.label(),
            });
        }
        Ok(state)
    }

    /// Advance a source's watermark. Regressions are ignored.
    ///
    /// Returns `true` if the watermark moved.
    pub fn observe_watermark(&mut self, source: &SourceId, ts: Timestamp) -> OrderResult<bool> {
        let state = self.active_mut(source)?;
        if let SourceState::Active { watermark } = state {
            if let Some(current) = *watermark {
                if current >= ts {
                    if current > ts {
                        trace!(%source, %current, reported = %ts, "watermark regression ignored");
                    }
                    return Ok(false);
                }
            }
            *watermark = Some(ts);
        }
        Ok(true)
    }

    pub fn close_source(&mut self, source: &SourceId) -> OrderResult<()> {
        let state = self.active_mut(source)?;
        *state = SourceState::Closed;
        debug!(%source, "source closed");
        Ok(())
    }

    pub fn fail_source(&mut self, source: &SourceId, reason: impl Into<String>) -> OrderResult<()> {
        let state = self.active_mut(source)?;
        *state = SourceState::Failed {
            reason: reason.into(),
        };
        debug!(%source, "source failed");
        Ok(())
    }

    /// Minimum watermark over all sources.
    pub fn frontier(&self) -> Watermark {
        self.sources
            .values()
            .map(SourceState::watermark)
            .min()
            .unwrap_or(Watermark::Infinite)
    }

    /// Active sources currently holding the frontier back.
    pub fn blocking_sources(&self) -> Vec<SourceId> {
        let frontier = self.frontier();
        if frontier == Watermark::Infinite {
            return Vec::new();
        }
        self.sources
            .iter()
            .filter(|(_, state)| state.watermark() == frontier)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn last_released(&self) -> Option<&OrderKey> {
        self.last_released.as_ref()
    }

    /// Treat everything up to `key` as already released, e.g. after the
    /// ledger was reopened. Never moves the release point backwards.
    pub fn resume_after(&mut self, key: OrderKey) {
        if self.last_released.as_ref().map_or(true, |last| key > *last) {
            debug!(%key, "ordering resumed");
            self.last_released = Some(key);
        }
    }

    pub fn insert(&mut self, pending: PendingRecord) -> OrderResult<Insertion> {
        let key = pending.order_key();
        if self.last_released.as_ref().is_some_and(|last| key < *last) {
            return Ok(Insertion::Late(pending));
        }
        if self.pending.contains_key(&key) {
            return Err(OrderError::AlreadyBuffered(key));
        }
        self.pending.insert(key, pending);
        Ok(Insertion::Buffered)
    }

    /// Release every pending record whose window has closed, in order.
    pub fn drain_ready(&mut self) -> Vec<PendingRecord> {
        let frontier = self.frontier();
        let mut released = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if !frontier.releases(entry.key().timestamp, self.lateness_window) {
                break;
            }
            let (key, pending) = entry.remove_entry();
            self.last_released = Some(key);
            released.push(pending);
        }
        released
    }

    /// Release everything regardless of watermarks, in order.
    pub fn drain_all(&mut self) -> Vec<PendingRecord> {
        let pending = std::mem::take(&mut self.pending);
        if let Some(last) = pending.keys().next_back() {
            self.last_released = Some(last.clone());
        }
        pending.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Earliest pending order key.
    pub fn oldest_pending(&self) -> Option<&OrderKey> {
        self.pending.keys().next()
    }
}
