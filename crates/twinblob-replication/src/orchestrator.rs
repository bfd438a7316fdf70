use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, error, info};
use twinblob_journal::{ObligationJournal, ObligationKind};
use twinblob_store::{BlobStoreDao, StoreError, StoreResult};
use twinblob_types::{BlobId, BucketName, Timestamp};

use crate::error::{ReplicationError, ReplicationResult};
use crate::journal_task;
use crate::prober::{ConsistencyProber, DriftReport};

/// Counters exposed by [`ReplicatingBlobStore::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Primary writes whose obligation could not be journaled.
    pub obligations_lost: u64,
    /// Obligations waiting for delivery.
    pub pending: usize,
}

/// Outcome of a resync pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub buckets_scanned: usize,
    pub saves_enqueued: usize,
    pub deletes_enqueued: usize,
    /// Drifted blobs left alone because an obligation is already pending.
    pub already_pending: usize,
}

/// Blob store that writes to a primary and replicates to a secondary.
///
/// Every mutation is applied to the primary synchronously, then recorded as
/// an obligation in the journal; the secondary is brought up to date by a
/// [`Reconciler`](crate::Reconciler). Reads and listings are served by the
/// primary. The secondary is never awaited on the caller's path.
pub struct ReplicatingBlobStore {
    primary: Arc<dyn BlobStoreDao>,
    secondary: Arc<dyn BlobStoreDao>,
    journal: Arc<dyn ObligationJournal>,
    wakeup: Arc<Notify>,
    obligations_lost: AtomicU64,
}

impl ReplicatingBlobStore {
    pub fn new(
        primary: Arc<dyn BlobStoreDao>,
        secondary: Arc<dyn BlobStoreDao>,
        journal: Arc<dyn ObligationJournal>,
    ) -> Self {
        Self {
            primary,
            secondary,
            journal,
            wakeup: Arc::new(Notify::new()),
            obligations_lost: AtomicU64::new(0),
        }
    }

    pub fn primary(&self) -> &Arc<dyn BlobStoreDao> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<dyn BlobStoreDao> {
        &self.secondary
    }

    pub fn journal(&self) -> &Arc<dyn ObligationJournal> {
        &self.journal
    }

    /// Signalled whenever an obligation is appended.
    pub fn wakeup(&self) -> &Arc<Notify> {
        &self.wakeup
    }

    /// A prober over the same pair of stores.
    pub fn prober(&self) -> ConsistencyProber {
        ConsistencyProber::new(Arc::clone(&self.primary), Arc::clone(&self.secondary))
    }

    pub fn stats(&self) -> ReplicationResult<ReplicationStats> {
        Ok(ReplicationStats {
            obligations_lost: self.obligations_lost.load(Ordering::Relaxed),
            pending: self.journal.len()?,
        })
    }

    /// Store `data` under its content-derived id.
    pub async fn save_content(&self, bucket: &BucketName, data: Bytes) -> ReplicationResult<BlobId> {
        let id = BlobId::of(&data);
        self.save(bucket, &id, data).await?;
        Ok(id)
    }

    pub async fn save(&self, bucket: &BucketName, id: &BlobId, data: Bytes) -> ReplicationResult<()> {
        self.primary
            .save(bucket, id, data)
            .await
            .map_err(|source| primary_write(bucket, source))?;
        self.enqueue(ObligationKind::save(bucket.clone(), *id)).await;
        Ok(())
    }

    pub async fn read(&self, bucket: &BucketName, id: &BlobId) -> ReplicationResult<Bytes> {
        self.primary
            .read(bucket, id)
            .await
            .map_err(|source| ReplicationError::PrimaryRead {
                bucket: bucket.to_string(),
                source,
            })
    }

    pub async fn delete(&self, bucket: &BucketName, id: &BlobId) -> ReplicationResult<()> {
        self.primary
            .delete(bucket, id)
            .await
            .map_err(|source| primary_write(bucket, source))?;
        self.enqueue(ObligationKind::delete(bucket.clone(), *id)).await;
        Ok(())
    }

    pub async fn delete_bucket(&self, bucket: &BucketName) -> ReplicationResult<()> {
        self.primary
            .delete_bucket(bucket)
            .await
            .map_err(|source| primary_write(bucket, source))?;
        self.enqueue(ObligationKind::DeleteBucket {
            bucket: bucket.clone(),
        })
        .await;
        Ok(())
    }

    pub async fn delete_all_buckets(&self) -> ReplicationResult<()> {
        self.primary
            .delete_all_buckets()
            .await
            .map_err(|source| ReplicationError::PrimaryWrite {
                bucket: "*".into(),
                source,
            })?;
        self.enqueue(ObligationKind::DeleteAllBuckets).await;
        Ok(())
    }

    pub async fn list_buckets(&self) -> ReplicationResult<Vec<BucketName>> {
        self.primary
            .list_buckets()
            .await
            .map_err(|source| ReplicationError::PrimaryRead {
                bucket: "*".into(),
                source,
            })
    }

    pub async fn list_blobs(&self, bucket: &BucketName) -> ReplicationResult<Vec<BlobId>> {
        self.primary
            .list_blobs(bucket)
            .await
            .map_err(|source| ReplicationError::PrimaryRead {
                bucket: bucket.to_string(),
                source,
            })
    }

    /// Compare one bucket across both stores and enqueue obligations for
    /// every difference.
    pub async fn resync_bucket(&self, bucket: &BucketName) -> ReplicationResult<ResyncReport> {
        let drift = self.prober().compare_bucket(bucket).await?;
        let mut report = ResyncReport {
            buckets_scanned: 1,
            ..ResyncReport::default()
        };
        self.repair(&drift, &mut report).await?;
        Ok(report)
    }

    /// Compare every bucket known to either store and enqueue obligations
    /// for every difference.
    pub async fn resync_all(&self) -> ReplicationResult<ResyncReport> {
        let drifts = self.prober().compare_all().await?;
        let mut report = ResyncReport {
            buckets_scanned: drifts.len(),
            ..ResyncReport::default()
        };
        for drift in &drifts {
            self.repair(drift, &mut report).await?;
        }
        info!(
            buckets = report.buckets_scanned,
            saves = report.saves_enqueued,
            deletes = report.deletes_enqueued,
            "resync complete"
        );
        Ok(report)
    }

    async fn repair(&self, drift: &DriftReport, report: &mut ResyncReport) -> ReplicationResult<()> {
        let bucket = &drift.bucket;
        for id in &drift.missing_in_secondary {
            let kind = ObligationKind::save(bucket.clone(), *id);
            if self.journal.get(&kind.key())?.is_some() {
                report.already_pending += 1;
                continue;
            }
            journal_task::run(&self.journal, move |journal| journal.append(kind, Timestamp::now())).await?;
            report.saves_enqueued += 1;
        }
        for id in &drift.only_in_secondary {
            let kind = ObligationKind::delete(bucket.clone(), *id);
            if self.journal.get(&kind.key())?.is_some() {
                report.already_pending += 1;
                continue;
            }
            // The listing may be stale; only delete what the primary still lacks.
            match self.primary.read(bucket, id).await {
                Err(e) if e.is_not_found() => {}
                Ok(_) => continue,
                Err(source) => {
                    return Err(ReplicationError::PrimaryRead {
                        bucket: bucket.to_string(),
                        source,
                    })
                }
            }
            journal_task::run(&self.journal, move |journal| journal.append(kind, Timestamp::now())).await?;
            report.deletes_enqueued += 1;
        }
        if report.saves_enqueued + report.deletes_enqueued > 0 {
            self.wakeup.notify_one();
        }
        Ok(())
    }

    /// Journal an obligation for a mutation already applied to the primary.
    ///
    /// A journal failure does not fail the caller: the primary holds the
    /// data, and the loss is logged and counted for a later resync.
    async fn enqueue(&self, kind: ObligationKind) {
        let record = kind.clone();
        let appended =
            journal_task::run(&self.journal, move |journal| journal.append(record, Timestamp::now())).await;
        match appended {
            Ok(ob) => {
                debug!(seq = ob.seq, obligation = %ob.kind, "replication obligation recorded");
                self.wakeup.notify_one();
            }
            Err(source) => {
                self.obligations_lost.fetch_add(1, Ordering::Relaxed);
                let lost = ReplicationError::ObligationLost {
                    obligation: kind.to_string(),
                    source,
                };
                error!(error = %lost, "secondary will diverge until resync");
            }
        }
    }
}

fn primary_write(bucket: &BucketName, source: StoreError) -> ReplicationError {
    ReplicationError::PrimaryWrite {
        bucket: bucket.to_string(),
        source,
    }
}

#[async_trait]
impl BlobStoreDao for ReplicatingBlobStore {
    async fn save(&self, bucket: &BucketName, id: &BlobId, data: Bytes) -> StoreResult<()> {
        Ok(ReplicatingBlobStore::save(self, bucket, id, data).await?)
    }

    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StoreResult<Bytes> {
        Ok(ReplicatingBlobStore::read(self, bucket, id).await?)
    }

    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StoreResult<()> {
        Ok(ReplicatingBlobStore::delete(self, bucket, id).await?)
    }

    async fn delete_bucket(&self, bucket: &BucketName) -> StoreResult<()> {
        Ok(ReplicatingBlobStore::delete_bucket(self, bucket).await?)
    }

    async fn delete_all_buckets(&self) -> StoreResult<()> {
        Ok(ReplicatingBlobStore::delete_all_buckets(self).await?)
    }

    async fn list_buckets(&self) -> StoreResult<Vec<BucketName>> {
        Ok(ReplicatingBlobStore::list_buckets(self).await?)
    }

    async fn list_blobs(&self, bucket: &BucketName) -> StoreResult<Vec<BlobId>> {
        Ok(ReplicatingBlobStore::list_blobs(self, bucket).await?)
    }
}

impl std::fmt::Debug for ReplicatingBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatingBlobStore")
            .field("obligations_lost", &self.obligations_lost.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinblob_journal::{InMemoryJournal, JournalError, LeasedObligation, Obligation, ObligationKey};
    use twinblob_store::{FaultMode, FaultyBlobStore, InMemoryBlobStore};

    struct Fixture {
        primary: Arc<FaultyBlobStore>,
        primary_data: Arc<InMemoryBlobStore>,
        secondary: Arc<InMemoryBlobStore>,
        journal: Arc<InMemoryJournal>,
        store: ReplicatingBlobStore,
    }

    fn fixture() -> Fixture {
        let primary_data = Arc::new(InMemoryBlobStore::new());
        let primary = Arc::new(FaultyBlobStore::new(primary_data.clone()));
        let secondary = Arc::new(InMemoryBlobStore::new());
        let journal = Arc::new(InMemoryJournal::default());
        let store = ReplicatingBlobStore::new(primary.clone(), secondary.clone(), journal.clone());
        Fixture {
            primary,
            primary_data,
            secondary,
            journal,
            store,
        }
    }

    fn bucket(name: &str) -> BucketName {
        BucketName::new(name).unwrap()
    }

    /// Journal whose every append fails.
    struct BrokenJournal;

    impl ObligationJournal for BrokenJournal {
        fn append(&self, _: ObligationKind, _: Timestamp) -> twinblob_journal::Result<Obligation> {
            Err(JournalError::Io(std::io::Error::other("disk full")))
        }
        fn drain_ready(&self, _: Timestamp, _: usize) -> twinblob_journal::Result<Vec<LeasedObligation>> {
            Ok(Vec::new())
        }
        fn mark_delivered(&self, _: &LeasedObligation) -> twinblob_journal::Result<()> {
            Ok(())
        }
        fn mark_failed(&self, _: &LeasedObligation, _: &str, _: Timestamp) -> twinblob_journal::Result<()> {
            Ok(())
        }
        fn pending(&self) -> twinblob_journal::Result<Vec<Obligation>> {
            Ok(Vec::new())
        }
        fn len(&self) -> twinblob_journal::Result<usize> {
            Ok(0)
        }
        fn get(&self, _: &ObligationKey) -> twinblob_journal::Result<Option<Obligation>> {
            Ok(None)
        }
        fn lease_timeout(&self) -> std::time::Duration {
            std::time::Duration::from_secs(60)
        }
    }

    #[tokio::test]
    async fn save_writes_primary_and_journals() {
        let f = fixture();
        let b = bucket("mail");
        let id = f.store.save_content(&b, Bytes::from_static(b"hello")).await.unwrap();

        assert!(f.primary_data.contains(&b, &id));
        assert!(f.secondary.is_empty(), "secondary is written by the reconciler only");
        let pending = f.journal.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, ObligationKind::save(b, id));
    }

    #[tokio::test]
    async fn failed_primary_write_creates_no_obligation() {
        let f = fixture();
        f.primary.set_mode(FaultMode::Unavailable);
        let err = f
            .store
            .save_content(&bucket("mail"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::PrimaryWrite { .. }));
        assert!(f.journal.is_empty().unwrap());
    }

    #[tokio::test]
    async fn journal_failure_does_not_fail_save() {
        let primary = Arc::new(InMemoryBlobStore::new());
        let store = ReplicatingBlobStore::new(
            primary.clone(),
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(BrokenJournal),
        );
        let b = bucket("mail");
        let id = store.save_content(&b, Bytes::from_static(b"kept")).await.unwrap();

        assert!(primary.contains(&b, &id));
        assert_eq!(store.stats().unwrap().obligations_lost, 1);
    }

    #[tokio::test]
    async fn reads_come_from_primary_and_keep_not_found() {
        let f = fixture();
        let b = bucket("mail");
        let id = f.store.save_content(&b, Bytes::from_static(b"body")).await.unwrap();
        assert_eq!(f.store.read(&b, &id).await.unwrap(), Bytes::from_static(b"body"));

        let dao: &dyn BlobStoreDao = &f.store;
        let missing = dao.read(&b, &BlobId::of(b"nope")).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn delete_supersedes_pending_save() {
        let f = fixture();
        let b = bucket("mail");
        let id = f.store.save_content(&b, Bytes::from_static(b"short-lived")).await.unwrap();
        f.store.delete(&b, &id).await.unwrap();

        let pending = f.journal.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, ObligationKind::delete(b.clone(), id));
        assert!(!f.primary_data.contains(&b, &id));
    }

    #[tokio::test]
    async fn delete_all_buckets_collapses_pending_work() {
        let f = fixture();
        for name in ["a", "b", "c"] {
            f.store
                .save_content(&bucket(name), Bytes::from(name.as_bytes().to_vec()))
                .await
                .unwrap();
        }
        f.store.delete_bucket(&bucket("a")).await.unwrap();
        f.store.delete_all_buckets().await.unwrap();

        let pending = f.journal.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, ObligationKind::DeleteAllBuckets);
        assert!(f.primary_data.is_empty());
    }

    #[tokio::test]
    async fn stats_report_pending_obligations() {
        let f = fixture();
        f.store.save_content(&bucket("a"), Bytes::from_static(b"1")).await.unwrap();
        f.store.save_content(&bucket("a"), Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(
            f.store.stats().unwrap(),
            ReplicationStats {
                obligations_lost: 0,
                pending: 2
            }
        );
    }

    #[tokio::test]
    async fn resync_enqueues_both_directions() {
        let f = fixture();
        let b = bucket("mail");
        // Drift that no obligation describes.
        let only_primary = f.primary_data.save_content(&b, Bytes::from_static(b"p")).await.unwrap();
        let only_secondary = f.secondary.save_content(&b, Bytes::from_static(b"s")).await.unwrap();

        let report = f.store.resync_bucket(&b).await.unwrap();
        assert_eq!(report.saves_enqueued, 1);
        assert_eq!(report.deletes_enqueued, 1);

        let kinds: Vec<_> = f.journal.pending().unwrap().into_iter().map(|o| o.kind).collect();
        assert!(kinds.contains(&ObligationKind::save(b.clone(), only_primary)));
        assert!(kinds.contains(&ObligationKind::delete(b.clone(), only_secondary)));

        let again = f.store.resync_all().await.unwrap();
        assert_eq!(again.already_pending, 2);
        assert_eq!(again.saves_enqueued + again.deletes_enqueued, 0);
    }
}
