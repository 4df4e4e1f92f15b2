use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::record::ContentDigest;

/// Prefix marking an identity derived from a record's content digest.
const CONTENT_PREFIX: &str = "h:";

/// Stable key identifying one logical transaction.
///
/// Two records with the same `TransactionId` describe the same logical
/// transaction: they are either exact duplicates or conflicting versions.
/// Identities are opaque strings; sources that cannot guarantee stable ids
/// can derive one from the record content via [`TransactionId::from_digest`].
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Wrap an externally assigned identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity built from a source id and a source-local sequence number.
    pub fn from_source_seq(source: &SourceId, seq: u64) -> Self {
        Self(format!("{}:{seq}", source.as_str()))
    }

    /// Identity derived from a record's content digest.
    pub fn from_digest(digest: &ContentDigest) -> Self {
        Self(format!("{CONTENT_PREFIX}{}", digest.to_hex()))
    }

    /// Returns `true` if this identity was derived from content.
    pub fn is_content_derived(&self) -> bool {
        self.0.starts_with(CONTENT_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validate that the identity is usable as a dedup key.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.0.trim().is_empty() {
            return Err(TypeError::Empty("transaction identity"));
        }
        Ok(())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Name of the adapter that produced a record.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Ledger account a record posts to.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
