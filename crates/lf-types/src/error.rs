use thiserror::Error;

/// Errors produced by type construction and validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("empty {0}")]
    Empty(&'static str),

    #[error("negative amount {amount} on {identity}")]
    NegativeAmount { identity: String, amount: String },

    #[error("amount {amount} on {identity} is out of range")]
    AmountOutOfRange { identity: String, amount: String },

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: u64, end: u64 },
}
