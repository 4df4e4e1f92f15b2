//! Append-only ledger storage for LedgerFusion.
//!
//! The store holds every finalized transaction version, the superseded
//! marker of each, a per-account running balance, and balance checkpoints
//! written by the verifier. Every mutation is a [`JournalRecord`] with a
//! monotonically increasing sequence number, so a crash can be recovered by
//! replaying from the last checkpoint plus the journal tail.
//!
//! # Storage Backends
//!
//! All backends implement [`LedgerReader`] and [`LedgerWriter`]:
//!
//! - [`InMemoryLedgerStore`] -- index-backed store for tests and embedding
//! - [`DurableLedgerStore`] -- the same index, rebuilt on open from a
//!   CRC-framed [`WriteAheadLog`]
//!
//! # Design Rules
//!
//! 1. Entries are immutable once appended; only the superseded marker changes.
//! 2. An entry key is appended at most once.
//! 3. Non-late appends arrive in ascending order-key order.
//! 4. Write-ahead: the journal record is persisted before the index changes.
//! 5. Superseded entries stay in the store but contribute nothing to balances.

pub mod durable;
pub mod entry;
pub mod error;
pub mod memory;
pub mod traits;
pub mod wal;

pub use durable::DurableLedgerStore;
pub use entry::{BalanceCheckpoint, Finalization, FinalizedEntry, JournalOp, JournalRecord};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryLedgerStore;
pub use traits::{LedgerReader, LedgerStore, LedgerWriter};
pub use wal::{Replay, SyncMode, WalConfig, WriteAheadLog};
