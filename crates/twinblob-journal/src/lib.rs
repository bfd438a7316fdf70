//! Delivery journal for TwinBlob.
//!
//! The journal holds one pending [`Obligation`] per [`ObligationKey`]: a
//! record that something must still be made true in the secondary store.
//! Workers lease obligations with [`ObligationJournal::drain_ready`] and
//! report the outcome with `mark_delivered` or `mark_failed`.
//!
//! # Ordering Rules
//!
//! 1. A newer obligation for a key supersedes the pending one; appending the
//!    same kind again coalesces.
//! 2. A wipe (`DeleteBucket`, `DeleteAllBuckets`) cancels every pending
//!    obligation in its scope.
//! 3. A leased key is never handed out again until the lease is released or
//!    expires.
//! 4. Work appended after a pending wipe waits for the wipe; a wipe waits
//!    for in-flight work in its scope.
//!
//! [`FileJournal`] persists every change in a CRC-framed write-ahead log
//! and replays it on open. [`InMemoryJournal`] keeps everything in process.

pub mod backoff;
pub mod error;
pub mod file;
pub mod memory;
pub mod obligation;
mod state;
pub mod traits;
pub mod wal;

pub use backoff::BackoffPolicy;
pub use error::{JournalError, Result};
pub use file::{FileJournal, FileJournalConfig};
pub use memory::InMemoryJournal;
pub use obligation::{LeasedObligation, Obligation, ObligationKey, ObligationKind};
pub use state::{JournalRecord, JournalSettings};
pub use traits::ObligationJournal;
pub use wal::{read_records, SyncMode, WriteAheadLog};
