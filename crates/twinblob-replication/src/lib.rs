//! Primary/secondary blob replication for TwinBlob.
//!
//! [`ReplicatingBlobStore`] is a drop-in [`BlobStoreDao`](twinblob_store::BlobStoreDao):
//! it writes to the primary on the caller's path and journals an obligation
//! for the secondary. A [`Reconciler`] drains the journal with a bounded
//! worker pool, retrying with backoff until every obligation is delivered.
//! [`ConsistencyProber`] compares the two stores for verification tooling.
//!
//! # Guarantees
//!
//! - A successful write is in the primary before the call returns.
//! - The secondary never slows down or fails a caller.
//! - Every journaled obligation is eventually delivered once the secondary
//!   is reachable; a lost obligation is logged, counted and repairable with
//!   [`ReplicatingBlobStore::resync_all`].
//! - At most one operation per blob is in flight against the secondary.
//!
//! [`BlobStoreWiring`] builds the whole graph from a [`TwinBlobConfig`].

pub mod config;
pub mod error;
mod journal_task;
pub mod orchestrator;
pub mod prober;
pub mod reconciler;
pub mod wiring;

pub use config::{
    BackoffConfig, BlobStoreConfig, JournalConfig, JournalKind, ReconcilerConfig, ReplicationMode,
    TwinBlobConfig,
};
pub use error::{ConfigError, ReplicationError, ReplicationResult};
pub use orchestrator::{ReplicatingBlobStore, ReplicationStats, ResyncReport};
pub use prober::{ConsistencyProber, DriftReport};
pub use reconciler::{Reconciler, ReconcilerHandle, ReconcilerSettings, RunSummary};
pub use wiring::{BlobStoreWiring, StoreRegistry};
