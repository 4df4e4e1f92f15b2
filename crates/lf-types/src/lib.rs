//! Foundation types for LedgerFusion.
//!
//! This crate provides the identity, temporal, and record types shared by
//! every other LedgerFusion crate. It has no knowledge of ingestion,
//! ordering, or storage; it only defines the values that flow between them.
//!
//! # Key Types
//!
//! - [`TransactionRecord`] -- Immutable value for one ledger entry
//! - [`TransactionId`] -- Logical identity used for deduplication
//! - [`SourceId`] / [`AccountId`] -- Origin adapter and ledger account names
//! - [`Timestamp`] -- Ordering time in integer ticks
//! - [`ContentDigest`] -- BLAKE3 digest of a record's canonical payload
//! - [`EntryKey`] / [`OrderKey`] -- Version-aware storage and ordering keys

pub mod error;
pub mod identity;
pub mod key;
pub mod record;
pub mod temporal;

pub use error::TypeError;
pub use identity::{AccountId, SourceId, TransactionId};
pub use key::{EntryKey, OrderKey};
pub use record::{ContentDigest, Direction, TransactionRecord};
pub use temporal::{TimeRange, Timestamp};

/// Exact decimal amount type used for every monetary value.
pub use rust_decimal::Decimal;
