use lf_types::{EntryKey, TransactionId};

/// Outcome of observing a record in the identity index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DedupDecision {
    /// First sighting of the identity.
    Accepted { key: EntryKey },
    /// First sighting of an identity that amends another one.
    Amendment {
        key: EntryKey,
        supersedes: TransactionId,
        /// `false` when the target has never been observed.
        target_known: bool,
    },
    /// The identity was seen with a different payload.
    Conflict(ConflictResolution),
    /// Byte-for-byte equivalent to an already observed version.
    RejectedDuplicate { existing: EntryKey },
}

impl DedupDecision {
    /// Key of the version that enters the ordering buffer, if any.
    pub fn buffered_key(&self) -> Option<&EntryKey> {
        match self {
            DedupDecision::Accepted { key } | DedupDecision::Amendment { key, .. } => Some(key),
            DedupDecision::Conflict(resolution) => Some(&resolution.incoming),
            DedupDecision::RejectedDuplicate { .. } => None,
        }
    }
}

/// Resolution of two versions of one identity with differing payloads.
///
/// The version with the later timestamp is canonical; equal timestamps are
/// broken by the larger content digest so the outcome is independent of
/// arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictResolution {
    pub incoming: EntryKey,
    pub canonical: EntryKey,
    pub superseded: EntryKey,
}

impl ConflictResolution {
    pub fn incoming_wins(&self) -> bool {
        self.canonical == self.incoming
    }
}

/// Superseded markers implied by finalizing one version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizationPlan {
    /// Append the finalizing version already superseded by this key.
    pub superseded_by: Option<EntryKey>,
    /// Previously finalized versions the finalizing version retires.
    pub retire: Vec<EntryKey>,
}
