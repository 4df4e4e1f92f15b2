use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lf_store::SyncMode;
use lf_types::{Decimal, SourceId};
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};

/// How the engine derives the identity of a source's records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// Use the identity the source reports.
    #[default]
    Declared,
    /// Replace it with a digest of the payload, for sources whose
    /// identities are not stable across replays.
    Content,
}

/// Where and how the ledger is persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store directory; `None` keeps the ledger in memory.
    pub path: Option<PathBuf>,
    pub sync: SyncMode,
}

/// One JSON-lines source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    pub path: PathBuf,
    #[serde(default)]
    pub identity: IdentityMode,
}

/// Engine and runtime settings, loaded from TOML.
///
/// Timestamps are abstract ticks; the CLI treats them as milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Ticks a record waits past its timestamp before it may finalize.
    pub lateness_window: u64,
    /// Ticks an idle identity stays indexed beyond the lateness window.
    pub index_retention_horizon: u64,
    /// Largest balance discrepancy attributed to rounding.
    pub balance_tolerance: Decimal,
    /// Finalizations between balance checkpoints.
    pub checkpoint_interval: u64,
    /// Capacity of the engine mailbox.
    pub channel_capacity: usize,
    /// Fail a source that produces nothing for this long.
    pub adapter_read_timeout_ms: Option<u64>,
    /// Consecutive transient read errors tolerated before a source fails.
    pub max_transient_failures: u32,
    pub store: StoreConfig,
    pub sources: Vec<SourceConfig>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            lateness_window: 0,
            index_retention_horizon: 3_600_000,
            balance_tolerance: Decimal::ZERO,
            checkpoint_interval: 1_000,
            channel_capacity: 1_024,
            adapter_read_timeout_ms: None,
            max_transient_failures: 3,
            store: StoreConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl FusionConfig {
    pub fn from_toml(text: &str) -> FusionResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| FusionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> FusionResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FusionError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> FusionResult<()> {
        if self.channel_capacity == 0 {
            return Err(FusionError::Config("channel_capacity must be positive".into()));
        }
        if self.checkpoint_interval == 0 {
            return Err(FusionError::Config("checkpoint_interval must be positive".into()));
        }
        if self.balance_tolerance.is_sign_negative() && !self.balance_tolerance.is_zero() {
            return Err(FusionError::Config(format!(
                "balance_tolerance must not be negative, got {}",
                self.balance_tolerance
            )));
        }
        if self.adapter_read_timeout_ms == Some(0) {
            return Err(FusionError::Config("adapter_read_timeout_ms must be positive".into()));
        }

        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if source.id.as_str().trim().is_empty() {
                return Err(FusionError::Config("source id must not be empty".into()));
            }
            if !seen.insert(&source.id) {
                return Err(FusionError::Config(format!("duplicate source id {}", source.id)));
            }
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.adapter_read_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = FusionConfig::default();
        assert_eq!(c.lateness_window, 0);
        assert_eq!(c.balance_tolerance, Decimal::ZERO);
        assert_eq!(c.channel_capacity, 1_024);
        assert!(c.store.path.is_none());
        assert!(c.read_timeout().is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn parses_full_toml() {
        let c = FusionConfig::from_toml(
            r#"
            lateness_window = 250
            index_retention_horizon = 60000
            balance_tolerance = "0.01"
            checkpoint_interval = 10
            adapter_read_timeout_ms = 5000

            [store]
            path = "/var/lib/ledgerfusion"
            sync = "every-write"

            [[sources]]
            id = "bank"
            path = "bank.jsonl"

            [[sources]]
            id = "card"
            path = "card.jsonl"
            identity = "content"
            "#,
        )
        .unwrap();

        assert_eq!(c.lateness_window, 250);
        assert_eq!(c.balance_tolerance, Decimal::new(1, 2));
        assert_eq!(c.read_timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(c.store.sync, SyncMode::EveryWrite);
        assert_eq!(c.store.path, Some(PathBuf::from("/var/lib/ledgerfusion")));
        assert_eq!(c.sources.len(), 2);
        assert_eq!(c.sources[0].identity, IdentityMode::Declared);
        assert_eq!(c.sources[1].identity, IdentityMode::Content);
        // Unset fields keep their defaults.
        assert_eq!(c.max_transient_failures, 3);
    }

    #[test]
    fn rejects_invalid_values() {
        let zero = FusionConfig {
            channel_capacity: 0,
            ..FusionConfig::default()
        };
        assert!(matches!(zero.validate(), Err(FusionError::Config(_))));

        let negative = FusionConfig {
            balance_tolerance: Decimal::new(-1, 2),
            ..FusionConfig::default()
        };
        assert!(negative.validate().is_err());

        let err = FusionConfig::from_toml(
            r#"
            [[sources]]
            id = "bank"
            path = "a.jsonl"
            [[sources]]
            id = "bank"
            path = "b.jsonl"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate source id bank"));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = FusionConfig::from_toml("lateness_window = \"soon\"").unwrap_err();
        assert!(matches!(err, FusionError::Config(_)));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fusion.toml");
        std::fs::write(&path, "lateness_window = 7\n").unwrap();
        assert_eq!(FusionConfig::from_file(&path).unwrap().lateness_window, 7);
        assert!(FusionConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
