use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::TransactionId;
use crate::temporal::Timestamp;

/// Storage key of one version of a transaction.
///
/// Conflicting versions of the same identity receive increasing revisions in
/// arrival order; revision 0 is the first version ever observed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub identity: TransactionId,
    pub revision: u32,
}

impl EntryKey {
    pub fn new(identity: TransactionId, revision: u32) -> Self {
        Self { identity, revision }
    }

    /// Key of the first observed version.
    pub fn first(identity: TransactionId) -> Self {
        Self::new(identity, 0)
    }
}

impl fmt::Debug for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryKey({}@r{})", self.identity, self.revision)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@r{}", self.identity, self.revision)
    }
}

/// Total order of finalized records: timestamp, then identity, then revision.
///
/// Field order matters: the derived `Ord` compares fields top to bottom.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderKey {
    pub timestamp: Timestamp,
    pub identity: TransactionId,
    pub revision: u32,
}

impl OrderKey {
    pub fn new(timestamp: Timestamp, key: &EntryKey) -> Self {
        Self {
            timestamp,
            identity: key.identity.clone(),
            revision: key.revision,
        }
    }

    pub fn entry_key(&self) -> EntryKey {
        EntryKey::new(self.identity.clone(), self.revision)
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@r{}", self.timestamp, self.identity, self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ts: u64, id: &str, rev: u32) -> OrderKey {
        OrderKey::new(Timestamp::new(ts), &EntryKey::new(id.into(), rev))
    }

    #[test]
    fn timestamp_dominates_identity() {
        assert!(key(10, "Z", 0) < key(11, "A", 0));
    }

    #[test]
    fn identity_breaks_timestamp_ties() {
        assert!(key(10, "A", 5) < key(10, "B", 0));
    }

    #[test]
    fn revision_breaks_identity_ties() {
        assert!(key(10, "A", 0) < key(10, "A", 1));
    }

    #[test]
    fn entry_key_roundtrips_through_order_key() {
        let entry = EntryKey::new("X".into(), 2);
        let order = OrderKey::new(Timestamp::new(7), &entry);
        assert_eq!(order.entry_key(), entry);
        assert_eq!(entry.to_string(), "X@r2");
    }
}
