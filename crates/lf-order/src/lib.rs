//! Ordering buffer for LedgerFusion.
//!
//! Converts out-of-order input from several sources into one stream ordered
//! by `(timestamp, identity, revision)`. Each source carries a watermark;
//! a pending record is released once the minimum watermark over all active
//! sources exceeds its timestamp plus the lateness window. Closed and failed
//! sources count as an infinite watermark.
//!
//! A stalled source holds back everything at or after its watermark. This
//! is intentional backpressure: total order is preferred over liveness.

pub mod buffer;
pub mod error;
pub mod source;

pub use buffer::{Insertion, OrderingBuffer, PendingRecord};
pub use error::{OrderError, OrderResult};
pub use source::{SourceState, Watermark};
