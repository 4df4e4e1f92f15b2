use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::identity::{AccountId, SourceId, TransactionId};
use crate::key::{EntryKey, OrderKey};
use crate::temporal::Timestamp;

/// Posting direction of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    fn tag(&self) -> &'static [u8] {
        match self {
            Direction::Credit => b"credit",
            Direction::Debit => b"debit",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Credit => f.write_str("credit"),
            Direction::Debit => f.write_str("debit"),
        }
    }
}

/// BLAKE3 digest of a record's canonical payload.
///
/// Two records with equal digests are treated as byte-for-byte equivalent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_id(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.short_id())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_id())
    }
}

/// Immutable value describing one ledger entry as reported by a source.
///
/// `amount` is always non-negative; `direction` carries the sign.
/// `amendment_of` is a back-reference by identity, never an ownership edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub identity: TransactionId,
    pub timestamp: Timestamp,
    pub account: AccountId,
    pub amount: Decimal,
    pub direction: Direction,
    pub currency: String,
    #[serde(default)]
    pub amendment_of: Option<TransactionId>,
    #[serde(default)]
    pub source_id: SourceId,
}

impl TransactionRecord {
    /// Largest accepted amount, 10^20. Summing fewer than 10^8 such amounts
    /// stays inside the range of [`Decimal`].
    pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x6310_0000, 0x6BC7_5E2D, 0x5, false, 0);

    pub fn new(
        identity: impl Into<TransactionId>,
        timestamp: Timestamp,
        account: impl Into<AccountId>,
        amount: Decimal,
        direction: Direction,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            timestamp,
            account: account.into(),
            amount,
            direction,
            currency: currency.into(),
            amendment_of: None,
            source_id: SourceId::default(),
        }
    }

    pub fn credit(
        identity: impl Into<TransactionId>,
        timestamp: u64,
        account: impl Into<AccountId>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self::new(
            identity,
            Timestamp::new(timestamp),
            account,
            amount,
            Direction::Credit,
            currency,
        )
    }

    pub fn debit(
        identity: impl Into<TransactionId>,
        timestamp: u64,
        account: impl Into<AccountId>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self::new(
            identity,
            Timestamp::new(timestamp),
            account,
            amount,
            Direction::Debit,
            currency,
        )
    }

    pub fn with_source(mut self, source: impl Into<SourceId>) -> Self {
        self.source_id = source.into();
        self
    }

    pub fn amending(mut self, target: impl Into<TransactionId>) -> Self {
        self.amendment_of = Some(target.into());
        self
    }

    /// Amount with the direction applied: credits add, debits subtract.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }

    pub fn order_key(&self, revision: u32) -> OrderKey {
        OrderKey::new(self.timestamp, &EntryKey::new(self.identity.clone(), revision))
    }

    /// Digest of the canonical payload.
    ///
    /// `source_id` is excluded so replicas reporting the same transaction
    /// coalesce. The amount is normalized so `100` and `100.00` are equal.
    pub fn digest(&self) -> ContentDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ledgerfusion-record-v1:");
        hasher.update(self.identity.as_str().as_bytes());
        hasher.update(b"\0");
        self.hash_payload(&mut hasher);
        ContentDigest(*hasher.finalize().as_bytes())
    }

    /// Digest of the payload without the identity, used to derive
    /// identities for sources that cannot supply stable ones.
    pub fn payload_digest(&self) -> ContentDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ledgerfusion-payload-v1:");
        self.hash_payload(&mut hasher);
        ContentDigest(*hasher.finalize().as_bytes())
    }

    fn hash_payload(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&self.timestamp.ticks().to_le_bytes());
        hasher.update(self.account.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.amount.normalize().to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.direction.tag());
        hasher.update(b"\0");
        hasher.update(self.currency.as_bytes());
        hasher.update(b"\0");
        if let Some(target) = &self.amendment_of {
            hasher.update(b"amends:");
            hasher.update(target.as_str().as_bytes());
        }
    }

    /// Structural checks applied before a record enters the engine.
    pub fn validate(&self) -> Result<(), TypeError> {
        self.identity.validate()?;
        if self.account.as_str().trim().is_empty() {
            return Err(TypeError::Empty("account"));
        }
        if self.currency.trim().is_empty() {
            return Err(TypeError::Empty("currency"));
        }
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(TypeError::NegativeAmount {
                identity: self.identity.to_string(),
                amount: self.amount.to_string(),
            });
        }
        if self.amount > Self::MAX_AMOUNT {
            return Err(TypeError::AmountOutOfRange {
                identity: self.identity.to_string(),
                amount: self.amount.to_string(),
            });
        }
        if let Some(target) = &self.amendment_of {
            target.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record() -> TransactionRecord {
        TransactionRecord::credit("X", 10, "A", Decimal::new(100, 0), "USD")
    }

    #[test]
    fn signed_amount_follows_direction() {
        let credit = TransactionRecord::credit("c", 1, "A", Decimal::new(5, 0), "USD");
        let debit = TransactionRecord::debit("d", 1, "A", Decimal::new(2, 0), "USD");
        assert_eq!(credit.signed_amount(), Decimal::new(5, 0));
        assert_eq!(debit.signed_amount(), Decimal::new(-2, 0));
    }

    #[test]
    fn digest_ignores_source() {
        let a = record().with_source("S1");
        let b = record().with_source("S2");
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_normalizes_amount_scale() {
        let a = record();
        let mut b = record();
        b.amount = Decimal::new(10000, 2);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_detects_payload_changes() {
        let a = record();
        let mut b = record();
        b.amount = Decimal::new(150, 0);
        assert_ne!(a.digest(), b.digest());

        let c = record().amending("W");
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn payload_digest_ignores_identity() {
        let a = record();
        let mut b = record();
        b.identity = TransactionId::new("Y");
        assert_eq!(a.payload_digest(), b.payload_digest());
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn validation_rejects_negative_amounts() {
        let mut r = record();
        r.amount = Decimal::new(-1, 0);
        assert!(matches!(
            r.validate(),
            Err(TypeError::NegativeAmount { .. })
        ));
    }

    #[test]
    fn validation_rejects_blank_fields() {
        let mut r = record();
        r.account = AccountId::new("");
        assert_eq!(r.validate(), Err(TypeError::Empty("account")));

        let mut r = record();
        r.currency = " ".into();
        assert_eq!(r.validate(), Err(TypeError::Empty("currency")));
    }

    #[test]
    fn amounts_above_the_bound_are_rejected() {
        assert_eq!(TransactionRecord::MAX_AMOUNT.to_string(), "100000000000000000000");
        let mut r = record();
        r.amount = TransactionRecord::MAX_AMOUNT;
        assert!(r.validate().is_ok());
        r.amount = Decimal::MAX;
        assert!(matches!(
            r.validate(),
            Err(TypeError::AmountOutOfRange { .. })
        ));
    }

    #[test]
    fn zero_amount_is_valid() {
        let mut r = record();
        r.amount = Decimal::ZERO;
        assert!(r.validate().is_ok());
    }

    #[test]
    fn json_shape() {
        let json = r#"{"identity":"X","timestamp":10,"account":"A","amount":"100.50","direction":"debit","currency":"USD"}"#;
        let r: TransactionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.direction, Direction::Debit);
        assert_eq!(r.amount, Decimal::new(10050, 2));
        assert!(r.amendment_of.is_none());
        assert!(r.source_id.is_empty());
    }

    #[test]
    fn bincode_roundtrip_preserves_amount() {
        let r = record().with_source("S1").amending("W");
        let bytes = bincode::serialize(&r).unwrap();
        let back: TransactionRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn bincode_roundtrip_without_amendment() {
        let r = record().with_source("S1");
        assert!(r.amendment_of.is_none());
        let bytes = bincode::serialize(&r).unwrap();
        let back: TransactionRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn digest_hex_roundtrip() {
        let d = record().digest();
        assert_eq!(ContentDigest::from_hex(&d.to_hex()).unwrap(), d);
        assert!(ContentDigest::from_hex("zz").is_err());
    }

    proptest! {
        #[test]
        fn digest_is_deterministic(ts in 0u64..1_000_000, cents in 0i64..10_000_000) {
            let a = TransactionRecord::credit("P", ts, "A", Decimal::new(cents, 2), "EUR");
            let b = a.clone().with_source("elsewhere");
            prop_assert_eq!(a.digest(), b.digest());
        }
    }
}
