use lf_types::{AccountId, EntryKey, OrderKey};

/// Errors from ledger store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The entry key was already appended.
    #[error("entry {0} already appended")]
    DuplicateEntry(EntryKey),

    /// A non-late append sorts before the last in-order append.
    #[error("append out of order: {attempted} sorts before {last}")]
    OutOfOrder { attempted: OrderKey, last: OrderKey },

    /// The referenced entry does not exist.
    #[error("entry not found: {0}")]
    EntryNotFound(EntryKey),

    /// A journal record was replayed twice or out of sequence.
    #[error("journal sequence {found} is not after {last}")]
    StaleSequence { last: u64, found: u64 },

    /// A balance left the representable decimal range.
    #[error("balance of {account} overflows")]
    Overflow { account: AccountId },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the write-ahead log.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A lock guarding store state was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
