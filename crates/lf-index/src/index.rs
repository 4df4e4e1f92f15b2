use std::collections::{BTreeSet, HashMap};

use lf_store::FinalizedEntry;
use lf_types::{EntryKey, Timestamp, TransactionId, TransactionRecord};
use tracing::{debug, warn};

use crate::decision::{ConflictResolution, DedupDecision, FinalizationPlan};
use crate::entry::{IdentityEntry, VersionSlot, VersionState};

/// In-memory identity index owned by the fusion engine.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    entries: HashMap<TransactionId, IdentityEntry>,
    /// Identities with no pending version, ordered by horizon.
    idle: BTreeSet<(Timestamp, TransactionId)>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: &TransactionId) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn entry(&self, identity: &TransactionId) -> Option<&IdentityEntry> {
        self.entries.get(identity)
    }

    /// Key of the current canonical version of an identity.
    pub fn canonical(&self, identity: &TransactionId) -> Option<EntryKey> {
        self.entries
            .get(identity)
            .and_then(|entry| entry.canonical_key(identity))
    }

    /// Classify an incoming record and register it as a pending version
    /// unless it is an exact duplicate.
    pub fn observe(&mut self, record: &TransactionRecord) -> DedupDecision {
        let digest = record.digest();
        let identity = record.identity.clone();
        let target_known = record
            .amendment_of
            .as_ref()
            .map(|target| self.entries.contains_key(target));

        let entry = self.entries.entry(identity.clone()).or_default();
        self.idle.remove(&(entry.horizon, identity.clone()));

        let decision = if let Some(existing) = entry.versions.iter().find(|v| v.digest == digest) {
            DedupDecision::RejectedDuplicate {
                existing: EntryKey::new(identity.clone(), existing.revision),
            }
        } else {
            let revision = entry.next_revision();
            let slot = VersionSlot {
                revision,
                digest,
                timestamp: record.timestamp,
                state: VersionState::Pending,
            };
            let incoming = EntryKey::new(identity.clone(), revision);
            let current = entry.version(entry.canonical).cloned();
            entry.horizon = entry.horizon.max(record.timestamp);

            match current {
                None => {
                    entry.canonical = revision;
                    entry.versions.push(slot);
                    match (&record.amendment_of, target_known) {
                        (Some(target), Some(known)) => DedupDecision::Amendment {
                            key: incoming,
                            supersedes: target.clone(),
                            target_known: known,
                        },
                        _ => DedupDecision::Accepted { key: incoming },
                    }
                }
                Some(current) => {
                    let current_key = EntryKey::new(identity.clone(), current.revision);
                    let incoming_wins = slot.rank() > current.rank();
                    entry.versions.push(slot);
                    if incoming_wins {
                        entry.canonical = revision;
                        DedupDecision::Conflict(ConflictResolution {
                            incoming: incoming.clone(),
                            canonical: incoming,
                            superseded: current_key,
                        })
                    } else {
                        DedupDecision::Conflict(ConflictResolution {
                            incoming: incoming.clone(),
                            canonical: current_key,
                            superseded: incoming,
                        })
                    }
                }
            }
        };

        if entry.is_idle() {
            self.idle.insert((entry.horizon, identity));
        }
        decision
    }

    /// Rehydrate an evicted identity from its stored versions and the
    /// stored amendments that target it.
    ///
    /// Returns `false` if the index already holds versions for the identity
    /// or there is nothing to restore.
    pub fn restore(
        &mut self,
        identity: &TransactionId,
        versions: &[FinalizedEntry],
        amendments: &[FinalizedEntry],
    ) -> bool {
        if versions.is_empty() && amendments.is_empty() {
            return false;
        }
        if self
            .entries
            .get(identity)
            .is_some_and(|entry| !entry.versions.is_empty())
        {
            return false;
        }

        let mut entry = self.entries.remove(identity).unwrap_or_default();
        self.idle.remove(&(entry.horizon, identity.clone()));

        for stored in versions {
            entry.versions.push(VersionSlot {
                revision: stored.key.revision,
                digest: stored.record.digest(),
                timestamp: stored.record.timestamp,
                state: VersionState::Finalized {
                    superseded: stored.is_superseded(),
                },
            });
            entry.horizon = entry.horizon.max(stored.record.timestamp);
            if let Some(by) = stored.superseded_by.as_ref().filter(|by| by.identity != *identity) {
                entry.amended_by = Some(by.clone());
            }
        }
        if let Some(amendment) = amendments.iter().find(|a| !a.is_superseded()) {
            entry.amended_by = Some(amendment.key.clone());
            entry.horizon = entry.horizon.max(amendment.record.timestamp);
        }
        if let Some(winner) = entry.versions.iter().max_by_key(|v| v.rank()) {
            entry.canonical = winner.revision;
        }

        debug!(%identity, versions = entry.versions.len(), "identity restored from store");
        self.idle.insert((entry.horizon, identity.clone()));
        self.entries.insert(identity.clone(), entry);
        true
    }

    /// Mark a pending version finalized and compute the superseded markers
    /// its finalization implies.
    ///
    /// A version that is not canonical, or whose identity was retired by an
    /// amendment, is appended already superseded. An effective version
    /// retires every other effective version of its identity and, if it is
    /// an amendment, every effective version of the amended identity.
    pub fn plan_finalization(
        &mut self,
        key: &EntryKey,
        record: &TransactionRecord,
    ) -> FinalizationPlan {
        let Some(entry) = self.entries.get_mut(&key.identity) else {
            warn!(%key, "finalizing a version the index never observed");
            return FinalizationPlan::default();
        };
        self.idle.remove(&(entry.horizon, key.identity.clone()));

        let superseded_by = if let Some(amendment) = &entry.amended_by {
            Some(amendment.clone())
        } else if key.revision != entry.canonical {
            Some(EntryKey::new(key.identity.clone(), entry.canonical))
        } else {
            None
        };

        let mut retire = Vec::new();
        if superseded_by.is_none() {
            for version in entry
                .versions
                .iter_mut()
                .filter(|v| v.revision != key.revision && v.is_effective_finalized())
            {
                version.state = VersionState::Finalized { superseded: true };
                retire.push(EntryKey::new(key.identity.clone(), version.revision));
            }
        }
        if let Some(slot) = entry.version_mut(key.revision) {
            slot.state = VersionState::Finalized {
                superseded: superseded_by.is_some(),
            };
        }
        if entry.is_idle() {
            self.idle.insert((entry.horizon, key.identity.clone()));
        }

        let amended = record
            .amendment_of
            .as_ref()
            .filter(|target| **target != key.identity);
        if let (None, Some(target)) = (&superseded_by, amended) {
            let target_entry = self.entries.entry(target.clone()).or_default();
            self.idle.remove(&(target_entry.horizon, target.clone()));
            target_entry.amended_by = Some(key.clone());
            target_entry.horizon = target_entry.horizon.max(record.timestamp);
            for version in target_entry
                .versions
                .iter_mut()
                .filter(|v| v.is_effective_finalized())
            {
                version.state = VersionState::Finalized { superseded: true };
                retire.push(EntryKey::new(target.clone(), version.revision));
            }
            if target_entry.is_idle() {
                self.idle.insert((target_entry.horizon, target.clone()));
            }
        }

        FinalizationPlan {
            superseded_by,
            retire,
        }
    }

    /// Evict idle identities whose horizon is before `cutoff`.
    pub fn evict_finalized_before(&mut self, cutoff: Timestamp) -> usize {
        let mut evicted = 0;
        while let Some((horizon, identity)) = self.idle.first().cloned() {
            if horizon >= cutoff {
                break;
            }
            self.idle.pop_first();
            let removable = self
                .entries
                .get(&identity)
                .is_some_and(|e| e.is_idle() && e.horizon == horizon);
            if removable {
                self.entries.remove(&identity);
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, %cutoff, remaining = self.entries.len(), "index eviction");
        }
        evicted
    }
}
