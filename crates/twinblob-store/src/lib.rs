//! Single-store blob storage interface for TwinBlob.
//!
//! Every backing object store (primary or secondary) is driven through the
//! same [`BlobStoreDao`] contract: save, read, delete and list byte payloads
//! addressed by bucket and content-derived id. The replication layer sits on
//! top of two such stores and implements the contract itself, so callers
//! cannot tell a replicated store from a plain one.
//!
//! # Implementations
//!
//! - [`InMemoryBlobStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`FaultyBlobStore`] -- wrapper that makes any store unavailable or
//!   stalled on demand, to exercise outage handling
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written (content addressing guarantees this).
//! 2. Saving an existing id is a no-op that succeeds.
//! 3. Deleting a missing blob or bucket succeeds.
//! 4. Reading a missing blob returns [`StoreError::NotFound`].
//! 5. The store never interprets blob contents.

pub mod error;
pub mod fault;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use fault::{FaultMode, FaultyBlobStore};
pub use memory::InMemoryBlobStore;
pub use traits::BlobStoreDao;
