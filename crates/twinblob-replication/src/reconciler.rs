use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use twinblob_journal::{LeasedObligation, ObligationJournal, ObligationKind};
use twinblob_store::{BlobStoreDao, StoreError};
use twinblob_types::Timestamp;

use crate::config::ReconcilerConfig;
use crate::error::{ReplicationError, ReplicationResult};
use crate::journal_task;
use crate::orchestrator::ReplicatingBlobStore;

/// Runtime settings of a [`Reconciler`].
#[derive(Clone, Debug)]
pub struct ReconcilerSettings {
    /// Maximum concurrent secondary operations.
    pub max_workers: usize,
    pub attempt_timeout: Duration,
    /// Fallback wakeup when no append signals the loop.
    pub poll_interval: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from(&ReconcilerConfig::default())
    }
}

impl From<&ReconcilerConfig> for ReconcilerSettings {
    fn from(config: &ReconcilerConfig) -> Self {
        Self {
            max_workers: config.max_workers.max(1),
            attempt_timeout: config.attempt_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Tally of one [`Reconciler::run_once`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Failed,
}

struct Shared {
    primary: Arc<dyn BlobStoreDao>,
    secondary: Arc<dyn BlobStoreDao>,
    journal: Arc<dyn ObligationJournal>,
    wakeup: Arc<Notify>,
    permits: Arc<Semaphore>,
    settings: ReconcilerSettings,
}

/// Drains the journal and applies obligations to the secondary store.
///
/// Each obligation is leased while a worker holds it, so a key never has two
/// attempts in flight. Failures and timeouts are handed back to the journal,
/// which schedules the retry; there is no attempt limit.
pub struct Reconciler {
    shared: Arc<Shared>,
}

impl Reconciler {
    /// Build a reconciler over `store`'s stores and journal.
    ///
    /// An `attempt_timeout` that would outlive the journal's lease is capped
    /// below it, so an expired lease never hands a key to a second worker
    /// while the first attempt still runs.
    pub fn new(store: &ReplicatingBlobStore, mut settings: ReconcilerSettings) -> Self {
        let lease = store.journal().lease_timeout();
        let ceiling = lease - lease / 10;
        if settings.attempt_timeout > ceiling {
            warn!(
                attempt_timeout = ?settings.attempt_timeout,
                lease_timeout = ?lease,
                "attempt timeout exceeds the journal lease; capping it"
            );
            settings.attempt_timeout = ceiling;
        }
        let max_workers = settings.max_workers.max(1);
        Self {
            shared: Arc::new(Shared {
                primary: Arc::clone(store.primary()),
                secondary: Arc::clone(store.secondary()),
                journal: Arc::clone(store.journal()),
                wakeup: Arc::clone(store.wakeup()),
                permits: Arc::new(Semaphore::new(max_workers)),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.shared.settings
    }

    /// Deliver everything eligible now and wait for the attempts to finish.
    ///
    /// Keeps draining while passes make progress, so work released by a
    /// delivered wipe or a superseded attempt is picked up in the same call.
    /// Obligations that fail are left for their backoff to expire.
    pub async fn run_once(&self) -> ReplicationResult<RunSummary> {
        let mut summary = RunSummary::default();
        loop {
            let batch = self
                .shared
                .journal
                .drain_ready(Timestamp::now(), self.shared.settings.max_workers)?;
            if batch.is_empty() {
                break;
            }

            let mut tasks = JoinSet::new();
            for leased in batch {
                let permit = self.shared.acquire().await;
                tasks.spawn(Arc::clone(&self.shared).deliver(leased, permit));
            }

            let mut delivered = 0;
            while let Some(joined) = tasks.join_next().await {
                summary.attempted += 1;
                match joined {
                    Ok(Outcome::Delivered) => delivered += 1,
                    Ok(Outcome::Failed) => summary.failed += 1,
                    Err(e) => {
                        error!(error = %e, "delivery task panicked");
                        summary.failed += 1;
                    }
                }
            }
            summary.delivered += delivered;
            if delivered == 0 {
                break;
            }
        }
        Ok(summary)
    }

    /// Start the background loop.
    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.shared.run(shutdown_rx));
        ReconcilerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

/// Handle to a running reconciler loop.
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop draining new work and wait for in-flight attempts to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "reconciler task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Shared {
    async fn acquire(&self) -> OwnedSemaphorePermit {
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("reconciler semaphore is never closed"),
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        match self.journal.len() {
            Ok(pending) => info!(
                pending,
                max_workers = self.settings.max_workers,
                "reconciler started; recovered obligations"
            ),
            Err(e) => error!(error = %e, "reconciler started; journal unreadable"),
        }

        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "delivery task panicked");
                }
            }

            let free = self.permits.available_permits();
            if free > 0 {
                match self.journal.drain_ready(Timestamp::now(), free) {
                    Ok(batch) => {
                        for leased in batch {
                            let permit = self.acquire().await;
                            tasks.spawn(Arc::clone(&self).deliver(leased, permit));
                        }
                    }
                    Err(e) => error!(error = %e, "failed to drain journal"),
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.wakeup.notified() => {}
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "delivery task panicked");
                    }
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        let in_flight = tasks.len();
        while tasks.join_next().await.is_some() {}
        info!(in_flight, "reconciler stopped");
    }

    /// Run one attempt and report it to the journal.
    async fn deliver(self: Arc<Self>, leased: LeasedObligation, permit: OwnedSemaphorePermit) -> Outcome {
        let seq = leased.obligation.seq;
        let attempt = leased.obligation.attempt_count + 1;
        // The attempt must end while the lease is still held.
        let remaining = leased.expires_at.since(Timestamp::now());
        let timeout = self.settings.attempt_timeout.min(remaining);

        let result = match tokio::time::timeout(timeout, self.execute(&leased.obligation.kind)).await {
            Ok(result) => result,
            Err(_) => Err(ReplicationError::SecondaryWrite(StoreError::Timeout(timeout))),
        };
        drop(permit);

        match result {
            Ok(()) => {
                debug!(seq, obligation = %leased.obligation.kind, attempt, "obligation delivered");
                let marked =
                    journal_task::run(&self.journal, move |journal| journal.mark_delivered(&leased)).await;
                if let Err(e) = marked {
                    error!(seq, error = %e, "failed to record delivery");
                }
                Outcome::Delivered
            }
            Err(err) => {
                warn!(seq, obligation = %leased.obligation.kind, attempt, error = %err, "replication attempt failed");
                let message = err.to_string();
                let marked = journal_task::run(&self.journal, move |journal| {
                    journal.mark_failed(&leased, &message, Timestamp::now())
                })
                .await;
                if let Err(e) = marked {
                    error!(seq, error = %e, "failed to record failed attempt");
                }
                Outcome::Failed
            }
        }
    }

    async fn execute(&self, kind: &ObligationKind) -> ReplicationResult<()> {
        match kind {
            ObligationKind::Save { bucket, blob_id } => {
                let data = match self.primary.read(bucket, blob_id).await {
                    Ok(data) => data,
                    Err(e) if e.is_not_found() => {
                        // Deleted from the primary since; its delete obligation
                        // covers the secondary.
                        debug!(%bucket, %blob_id, "blob gone from primary; save obligation dropped");
                        return Ok(());
                    }
                    Err(source) => {
                        return Err(ReplicationError::PrimaryRead {
                            bucket: bucket.to_string(),
                            source,
                        })
                    }
                };
                self.secondary.save(bucket, blob_id, data).await.map_err(ReplicationError::SecondaryWrite)
            }
            ObligationKind::Delete { bucket, blob_id } => {
                self.secondary.delete(bucket, blob_id).await.map_err(ReplicationError::SecondaryWrite)
            }
            ObligationKind::DeleteBucket { bucket } => {
                self.secondary.delete_bucket(bucket).await.map_err(ReplicationError::SecondaryWrite)
            }
            ObligationKind::DeleteAllBuckets => {
                self.secondary.delete_all_buckets().await.map_err(ReplicationError::SecondaryWrite)
            }
        }
    }
}
