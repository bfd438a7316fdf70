use std::time::Duration;

use twinblob_types::Timestamp;

use crate::error::Result;
use crate::obligation::{LeasedObligation, Obligation, ObligationKey, ObligationKind};

/// Store of pending replication obligations.
///
/// All methods take `&self`; implementations synchronize internally and are
/// shared between the orchestrator and reconciler workers behind an `Arc`.
pub trait ObligationJournal: Send + Sync {
    /// Record that `kind` must be made true in the secondary store.
    ///
    /// Returns the pending obligation for the key: the existing one if an
    /// obligation of the same kind is already pending, otherwise a new one
    /// that supersedes whatever it cancels.
    fn append(&self, kind: ObligationKind, now: Timestamp) -> Result<Obligation>;

    /// Lease up to `limit` obligations eligible at `now`, in `seq` order.
    fn drain_ready(&self, now: Timestamp, limit: usize) -> Result<Vec<LeasedObligation>>;

    /// Release the lease and remove the obligation if it was not superseded.
    fn mark_delivered(&self, leased: &LeasedObligation) -> Result<()>;

    /// Release the lease and schedule the next attempt.
    fn mark_failed(&self, leased: &LeasedObligation, error: &str, now: Timestamp) -> Result<()>;

    /// All pending obligations in `seq` order, leased or not.
    fn pending(&self) -> Result<Vec<Obligation>>;

    /// Number of pending obligations.
    fn len(&self) -> Result<usize>;

    /// Returns `true` if nothing is pending.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The pending obligation under `key`, if any.
    fn get(&self, key: &ObligationKey) -> Result<Option<Obligation>>;

    /// How long a drained obligation stays leased. An attempt that outlives
    /// its lease may overlap with the next attempt on the same key.
    fn lease_timeout(&self) -> Duration;
}
