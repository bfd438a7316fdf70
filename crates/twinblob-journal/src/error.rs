use std::io;

/// Errors produced by the delivery journal.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// I/O error during log or file operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A thread panicked while holding the journal lock.
    #[error("journal lock poisoned")]
    Poisoned,
}

impl<T> From<std::sync::PoisonError<T>> for JournalError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Poisoned
    }
}

/// Convenience alias used throughout the journal crate.
pub type Result<T> = std::result::Result<T, JournalError>;
