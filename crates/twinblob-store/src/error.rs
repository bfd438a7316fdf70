use twinblob_types::{BlobId, BucketName};

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob was not found.
    #[error("blob {id} not found in bucket {bucket}")]
    NotFound { bucket: BucketName, id: BlobId },

    /// The store cannot be reached (network partition, maintenance, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer in time.
    #[error("store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` if this error means the blob does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
