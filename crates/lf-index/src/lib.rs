//! Dedup/identity index for LedgerFusion.
//!
//! Maps each transaction identity to the versions observed for it and to
//! its current canonical version. The index decides, per incoming record,
//! whether it is new, an amendment, a conflicting resubmission, or an exact
//! duplicate; and, per finalized version, which stored versions it retires.
//!
//! Finalized identities older than the retention horizon are evicted; the
//! ledger store is authoritative for them and can [`IdentityIndex::restore`]
//! them on demand.
//!
//! # Key Types
//!
//! - [`IdentityIndex`] -- the index itself
//! - [`DedupDecision`] -- outcome of observing a record
//! - [`ConflictResolution`] -- which of two conflicting versions is canonical
//! - [`FinalizationPlan`] -- superseded markers to write when a version finalizes

pub mod decision;
pub mod entry;
pub mod index;

pub use decision::{ConflictResolution, DedupDecision, FinalizationPlan};
pub use entry::{IdentityEntry, VersionSlot, VersionState};
pub use index::IdentityIndex;
