use lf_types::{OrderKey, SourceId};

/// Errors produced by the ordering buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("source {0} is already registered")]
    AlreadyRegistered(SourceId),

    #[error("source {source_id} is {state}")]
    SourceNotActive { source_id: SourceId, state: &'static str },

    #[error("record {0} is already buffered")]
    AlreadyBuffered(OrderKey),
}

pub type OrderResult<T> = Result<T, OrderError>;
