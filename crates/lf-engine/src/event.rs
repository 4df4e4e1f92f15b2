use std::fmt;

use lf_index::ConflictResolution;
use lf_store::FinalizedEntry;
use lf_types::{EntryKey, OrderKey, SourceId, TransactionId};
use lf_verify::ReconciliationFault;

/// Stage of a record in the ingestion state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordState {
    Ingested,
    Accepted,
    Amendment,
    Conflict,
    RejectedDuplicate,
    Buffered,
    Finalized,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordState::Ingested => "ingested",
            RecordState::Accepted => "accepted",
            RecordState::Amendment => "amendment",
            RecordState::Conflict => "conflict",
            RecordState::RejectedDuplicate => "rejected-duplicate",
            RecordState::Buffered => "buffered",
            RecordState::Finalized => "finalized",
        };
        f.write_str(label)
    }
}

/// Something the engine surfaces to its caller.
#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    /// An exact re-submission was coalesced.
    DuplicateRejected {
        identity: TransactionId,
        existing: EntryKey,
        source: SourceId,
    },
    /// Two versions of one identity disagree.
    ConflictDetected {
        resolution: ConflictResolution,
        source: SourceId,
    },
    /// A record arrived after its position in the order was released.
    LateArrival {
        key: EntryKey,
        order_key: OrderKey,
        last_released: OrderKey,
    },
    Finalized(FinalizedEntry),
    Superseded { key: EntryKey, by: EntryKey },
    SourceClosed { source: SourceId },
    SourceFailure { source: SourceId, reason: String },
    ReconciliationFault(ReconciliationFault),
    Checkpoint { seq: u64, accounts: usize },
}

impl FusionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            FusionEvent::DuplicateRejected { .. } => "duplicate-rejected",
            FusionEvent::ConflictDetected { .. } => "conflict-detected",
            FusionEvent::LateArrival { .. } => "late-arrival",
            FusionEvent::Finalized(_) => "finalized",
            FusionEvent::Superseded { .. } => "superseded",
            FusionEvent::SourceClosed { .. } => "source-closed",
            FusionEvent::SourceFailure { .. } => "source-failure",
            FusionEvent::ReconciliationFault(_) => "reconciliation-fault",
            FusionEvent::Checkpoint { .. } => "checkpoint",
        }
    }
}

impl fmt::Display for FusionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionEvent::DuplicateRejected {
                identity,
                existing,
                source,
            } => write!(f, "duplicate {identity} from {source} (matches {existing})"),
            FusionEvent::ConflictDetected { resolution, source } => write!(
                f,
                "conflict on {} from {source}: {} canonical, {} superseded",
                resolution.incoming.identity, resolution.canonical, resolution.superseded
            ),
            FusionEvent::LateArrival {
                key,
                order_key,
                last_released,
            } => write!(f, "late arrival {key} at {order_key}, behind {last_released}"),
            FusionEvent::Finalized(entry) => write!(
                f,
                "finalized {} as #{}{}",
                entry.key,
                entry.seq,
                if entry.is_superseded() { " (superseded)" } else { "" }
            ),
            FusionEvent::Superseded { key, by } => write!(f, "{key} superseded by {by}"),
            FusionEvent::SourceClosed { source } => write!(f, "source {source} closed"),
            FusionEvent::SourceFailure { source, reason } => {
                write!(f, "source {source} failed: {reason}")
            }
            FusionEvent::ReconciliationFault(fault) => write!(f, "{fault}"),
            FusionEvent::Checkpoint { seq, accounts } => {
                write!(f, "checkpoint #{seq} over {accounts} accounts")
            }
        }
    }
}
