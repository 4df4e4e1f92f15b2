use std::fmt;

use lf_types::Timestamp;

/// Effective watermark of a source.
///
/// Variant order matters: the derived `Ord` gives
/// `Unset < At(_) < Infinite`, so the minimum over all sources is the
/// finalization frontier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Watermark {
    /// Active source that has reported nothing yet; blocks everything.
    Unset,
    At(Timestamp),
    /// Closed or failed source, or no sources at all.
    Infinite,
}

impl Watermark {
    /// Returns `true` if a record at `timestamp` may be released with the
    /// given lateness window.
    pub fn releases(&self, timestamp: Timestamp, lateness_window: u64) -> bool {
        *self > Watermark::At(timestamp.saturating_add(lateness_window))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Unset => f.write_str("unset"),
            Watermark::At(ts) => write!(f, "{ts}"),
            Watermark::Infinite => f.write_str("infinite"),
        }
    }
}

/// Lifecycle of one source as seen by the ordering buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceState {
    Active { watermark: Option<Timestamp> },
    Closed,
    Failed { reason: String },
}

impl SourceState {
    pub fn watermark(&self) -> Watermark {
        match self {
            SourceState::Active { watermark: None } => Watermark::Unset,
            SourceState::Active {
                watermark: Some(ts),
            } => Watermark::At(*ts),
            SourceState::Closed | SourceState::Failed { .. } => Watermark::Infinite,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SourceState::Active { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceState::Active { .. } => "active",
            SourceState::Closed => "closed",
            SourceState::Failed { .. } => "failed",
        }
    }
}
