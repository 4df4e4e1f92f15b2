//! Fusion engine for LedgerFusion.
//!
//! Merges transaction records from several independent sources into one
//! ordered, deduplicated ledger:
//!
//! 1. **Admit**: validate the record, apply the source's identity mode and
//!    enforce one currency per account.
//! 2. **Deduplicate**: the identity index classifies the record as new, an
//!    amendment, a conflicting version or an exact duplicate.
//! 3. **Order**: the ordering buffer holds it until every active source's
//!    watermark has passed its timestamp plus the lateness window.
//! 4. **Finalize**: append to the ledger store, apply supersessions, fold
//!    into the balance verifier and cross-check against the store.
//!
//! [`FusionEngine`] is the synchronous state machine. [`FusionRuntime`]
//! wraps it in a single-writer actor fed by one task per
//! [`SourceAdapter`].

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod runtime;

pub use adapter::{JsonLinesAdapter, SourceAdapter, SourceItem, VecAdapter};
pub use config::{FusionConfig, IdentityMode, SourceConfig, StoreConfig};
pub use engine::{EngineStats, FusionEngine};
pub use error::{AdapterError, FusionError, FusionResult};
pub use event::{FusionEvent, RecordState};
pub use runtime::{
    EngineActor, EngineHandle, EngineMessage, FusionRuntime, RunSummary, ShutdownTrigger,
    SourceOutcome,
};
