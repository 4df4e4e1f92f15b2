use lf_order::OrderError;
use lf_store::StoreError;
use lf_types::{AccountId, TransactionId, TypeError};

/// Errors produced by the fusion engine and its runtime.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// The record failed structural validation.
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] TypeError),

    /// The record's currency differs from the one fixed for its account.
    #[error("record {identity} uses {found} but account {account} is denominated in {expected}")]
    CurrencyMismatch {
        identity: TransactionId,
        account: AccountId,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine actor has stopped and no longer accepts messages.
    #[error("fusion engine is shut down")]
    Shutdown,

    /// A runtime task panicked or was cancelled.
    #[error("runtime task failed: {0}")]
    Task(String),
}

impl FusionError {
    /// Returns `true` for errors that reject a single input and leave the
    /// engine fully usable.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            FusionError::InvalidRecord(_)
                | FusionError::CurrencyMismatch { .. }
                | FusionError::Order(OrderError::UnknownSource(_))
                | FusionError::Order(OrderError::SourceNotActive { .. })
        )
    }
}

pub type FusionResult<T> = Result<T, FusionError>;

/// Errors reported by a source adapter while reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// A read failed but may succeed if retried.
    #[error("transient read failure: {0}")]
    Transient(String),

    /// The source cannot produce any more input.
    #[error("permanent read failure: {0}")]
    Permanent(String),

    /// One item could not be decoded; the adapter can continue past it.
    #[error("malformed input at {location}: {reason}")]
    Malformed { location: String, reason: String },

    #[error("no input within {after_ms} ms")]
    TimedOut { after_ms: u64 },
}

impl AdapterError {
    /// Returns `true` if the source must be marked failed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AdapterError::Permanent(_) | AdapterError::TimedOut { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_types::SourceId;

    #[test]
    fn rejections_are_distinguished_from_engine_failures() {
        assert!(FusionError::from(TypeError::Empty("account")).is_rejection());
        assert!(FusionError::from(OrderError::UnknownSource(SourceId::new("S9"))).is_rejection());
        assert!(!FusionError::from(StoreError::LockPoisoned).is_rejection());
        assert!(!FusionError::Shutdown.is_rejection());
    }

    #[test]
    fn adapter_error_severity() {
        assert!(AdapterError::Permanent("gone".into()).is_fatal());
        assert!(AdapterError::TimedOut { after_ms: 50 }.is_fatal());
        assert!(!AdapterError::Transient("busy".into()).is_fatal());
        let malformed = AdapterError::Malformed {
            location: "line 3".into(),
            reason: "expected value".into(),
        };
        assert!(!malformed.is_fatal());
        assert_eq!(malformed.to_string(), "malformed input at line 3: expected value");
    }
}
