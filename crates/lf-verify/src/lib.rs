//! Balance verification for LedgerFusion.
//!
//! The [`BalanceVerifier`] folds finalized entries into per-account running
//! balances independently of the ledger store. Each account keeps its
//! entries sorted by order key together with prefix balances, so a late or
//! superseded entry re-folds only the tail of that account.
//!
//! Balances are cross-checked against the store's snapshot and against the
//! last durable checkpoint plus the journal tail. A disagreement beyond the
//! configured tolerance is a [`ReconciliationFault`]; the account is marked
//! unverified until a re-audit succeeds.

pub mod fault;
pub mod fold;
pub mod verifier;

pub use fault::{AccountStatus, FaultOrigin, ReconciliationFault};
pub use fold::{AccountFold, FoldOutcome};
pub use verifier::{BalanceVerifier, Recovery};
