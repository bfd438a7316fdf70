use std::path::PathBuf;

use thiserror::Error;
use twinblob_journal::JournalError;
use twinblob_store::StoreError;
use twinblob_types::StoreRole;

#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The authoritative write failed; nothing was journaled.
    #[error("primary write failed for bucket {bucket}: {source}")]
    PrimaryWrite {
        bucket: String,
        #[source]
        source: StoreError,
    },

    #[error("primary read failed for bucket {bucket}: {source}")]
    PrimaryRead {
        bucket: String,
        #[source]
        source: StoreError,
    },

    /// A secondary operation failed. Recorded on the obligation and retried.
    #[error("secondary write failed: {0}")]
    SecondaryWrite(#[source] StoreError),

    /// The primary write succeeded but its obligation could not be journaled.
    #[error("replication obligation lost for {obligation}: {source}")]
    ObligationLost {
        obligation: String,
        #[source]
        source: JournalError,
    },

    #[error("listing the {role} store failed: {source}")]
    Probe {
        role: StoreRole,
        #[source]
        source: StoreError,
    },

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<ReplicationError> for StoreError {
    /// Primary failures keep their original error so callers of the
    /// drop-in store still see `NotFound` as such.
    fn from(e: ReplicationError) -> Self {
        match e {
            ReplicationError::PrimaryWrite { source, .. }
            | ReplicationError::PrimaryRead { source, .. }
            | ReplicationError::SecondaryWrite(source)
            | ReplicationError::Probe { source, .. } => source,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("store {0:?} is not registered")]
    UnknownStore(String),
}
