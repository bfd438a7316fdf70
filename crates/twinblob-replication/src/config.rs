use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use twinblob_journal::{BackoffPolicy, FileJournalConfig, JournalSettings, SyncMode};

use crate::error::ConfigError;

/// Top-level configuration file.
///
/// ```toml
/// [blob_store]
/// primary = "s3"
/// secondary = "archive"
/// replication = "enabled"
///
/// [blob_store.journal]
/// kind = "file"
/// path = "/var/lib/twinblob/obligations.wal"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TwinBlobConfig {
    pub blob_store: BlobStoreConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    /// Registry name of the authoritative store.
    pub primary: String,
    /// Registry name of the replica. Required when replication is enabled.
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default)]
    pub replication: ReplicationMode,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    #[default]
    Enabled,
    /// Single-store passthrough: the primary is used directly.
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.jitter_factor,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Maximum concurrent secondary operations.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Must exceed `attempt_timeout_ms`.
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            lease_timeout_ms: default_lease_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ReconcilerConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalKind {
    #[default]
    Memory,
    File,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub kind: JournalKind,
    /// Log file location; required for `kind = "file"`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub sync: SyncMode,
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            kind: JournalKind::default(),
            path: None,
            sync: SyncMode::default(),
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

impl JournalConfig {
    pub fn file_config(&self) -> FileJournalConfig {
        FileJournalConfig {
            sync_mode: self.sync,
            compaction_threshold: self.compaction_threshold,
        }
    }
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_factor() -> f64 {
    0.5
}

fn default_max_workers() -> usize {
    8
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}

fn default_lease_timeout_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_compaction_threshold() -> usize {
    1024
}

impl TwinBlobConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check internal consistency. Store names are checked against a
    /// registry at wiring time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bs = &self.blob_store;
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if bs.primary.is_empty() {
            return invalid("blob_store.primary must name a store".into());
        }
        if bs.replication == ReplicationMode::Enabled {
            match bs.secondary.as_deref() {
                None | Some("") => {
                    return invalid("blob_store.secondary is required when replication is enabled".into())
                }
                Some(secondary) if secondary == bs.primary => {
                    return invalid(format!(
                        "primary and secondary must be different stores (both are {secondary:?})"
                    ))
                }
                Some(_) => {}
            }
        }

        if bs.reconciler.max_workers == 0 {
            return invalid("blob_store.reconciler.max_workers must be greater than 0".into());
        }
        if bs.reconciler.attempt_timeout_ms == 0 {
            return invalid("blob_store.reconciler.attempt_timeout_ms must be greater than 0".into());
        }
        if bs.reconciler.lease_timeout_ms <= bs.reconciler.attempt_timeout_ms {
            return invalid(format!(
                "lease_timeout_ms ({}) must exceed attempt_timeout_ms ({})",
                bs.reconciler.lease_timeout_ms, bs.reconciler.attempt_timeout_ms
            ));
        }
        if bs.reconciler.poll_interval_ms == 0 {
            return invalid("blob_store.reconciler.poll_interval_ms must be greater than 0".into());
        }

        if bs.backoff.base_delay_ms > bs.backoff.max_delay_ms {
            return invalid(format!(
                "base_delay_ms ({}) must not exceed max_delay_ms ({})",
                bs.backoff.base_delay_ms, bs.backoff.max_delay_ms
            ));
        }
        if !(0.0..=1.0).contains(&bs.backoff.jitter_factor) {
            return invalid(format!(
                "jitter_factor must be within [0, 1], got {}",
                bs.backoff.jitter_factor
            ));
        }

        if bs.journal.kind == JournalKind::File && bs.journal.path.is_none() {
            return invalid("blob_store.journal.path is required for a file journal".into());
        }
        Ok(())
    }

    pub fn journal_settings(&self) -> JournalSettings {
        JournalSettings {
            backoff: self.blob_store.backoff.policy(),
            lease_timeout: self.blob_store.reconciler.lease_timeout(),
        }
    }
}
