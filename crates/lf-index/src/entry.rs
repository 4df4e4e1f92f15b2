use lf_types::{ContentDigest, EntryKey, Timestamp, TransactionId};

/// Lifecycle of one version inside the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionState {
    /// Observed, not yet appended to the store.
    Pending,
    /// Appended; `superseded` mirrors the store's marker.
    Finalized { superseded: bool },
}

/// One observed version of an identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionSlot {
    pub revision: u32,
    pub digest: ContentDigest,
    pub timestamp: Timestamp,
    pub state: VersionState,
}

impl VersionSlot {
    /// Conflict rank: later timestamp wins, then larger digest.
    pub(crate) fn rank(&self) -> (Timestamp, ContentDigest) {
        (self.timestamp, self.digest)
    }

    pub fn is_effective_finalized(&self) -> bool {
        self.state == VersionState::Finalized { superseded: false }
    }
}

/// Everything the index knows about one identity.
///
/// An entry may have no versions at all when it only records that an
/// amendment has already retired the identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityEntry {
    pub versions: Vec<VersionSlot>,
    /// Revision of the canonical version.
    pub canonical: u32,
    /// Finalized amendment that retired this identity.
    pub amended_by: Option<EntryKey>,
    /// Latest timestamp seen for the identity or its amendment.
    pub horizon: Timestamp,
}

impl IdentityEntry {
    pub fn pending(&self) -> usize {
        self.versions
            .iter()
            .filter(|v| v.state == VersionState::Pending)
            .count()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    pub fn version(&self, revision: u32) -> Option<&VersionSlot> {
        self.versions.iter().find(|v| v.revision == revision)
    }

    pub(crate) fn version_mut(&mut self, revision: u32) -> Option<&mut VersionSlot> {
        self.versions.iter_mut().find(|v| v.revision == revision)
    }

    pub fn canonical_key(&self, identity: &TransactionId) -> Option<EntryKey> {
        if self.versions.is_empty() {
            None
        } else {
            Some(EntryKey::new(identity.clone(), self.canonical))
        }
    }

    pub(crate) fn next_revision(&self) -> u32 {
        self.versions
            .iter()
            .map(|v| v.revision + 1)
            .max()
            .unwrap_or(0)
    }
}
