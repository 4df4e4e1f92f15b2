use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Ordering time of a transaction, in integer ticks.
///
/// Sources may use logical clocks or wall-clock milliseconds; the engine
/// only requires a total order and saturating addition of the lateness
/// window. The CLI interprets ticks as milliseconds since the UNIX epoch.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    pub const fn new(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Wall-clock milliseconds since UNIX epoch.
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }

    pub const fn ticks(&self) -> u64 {
        self.0
    }

    /// Add a window, clamping at [`Timestamp::MAX`].
    pub fn saturating_add(&self, ticks: u64) -> Self {
        Self(self.0.saturating_add(ticks))
    }

    /// Subtract a window, clamping at [`Timestamp::MIN`].
    pub fn saturating_sub(&self, ticks: u64) -> Self {
        Self(self.0.saturating_sub(ticks))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(ticks: u64) -> Self {
        Self(ticks)
    }
}

/// Half-open time interval `[start, end)` used for account scans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, TypeError> {
        if start > end {
            return Err(TypeError::InvalidRange {
                start: start.ticks(),
                end: end.ticks(),
            });
        }
        Ok(Self { start, end })
    }

    /// Every timestamp, including [`Timestamp::MAX`].
    pub fn all() -> Self {
        Self {
            start: Timestamp::MIN,
            end: Timestamp::MAX,
        }
    }

    /// Everything at or after `start`.
    pub fn since(start: Timestamp) -> Self {
        Self {
            start,
            end: Timestamp::MAX,
        }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        // An unbounded range also admits `Timestamp::MAX` itself.
        ts >= self.start && (ts < self.end || self.end == Timestamp::MAX)
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}
