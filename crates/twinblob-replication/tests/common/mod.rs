//! Shared fixtures for the replication integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use twinblob_journal::{BackoffPolicy, InMemoryJournal, JournalSettings, ObligationJournal};
use twinblob_replication::{ReconcilerSettings, ReplicatingBlobStore};
use twinblob_store::{BlobStoreDao, FaultyBlobStore, InMemoryBlobStore, StoreResult};
use twinblob_types::{BlobId, BucketName};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn bucket(name: &str) -> BucketName {
    BucketName::new(name).unwrap()
}

pub fn fast_journal_settings() -> JournalSettings {
    JournalSettings {
        backoff: BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(50), 0.5),
        lease_timeout: Duration::from_secs(5),
    }
}

pub fn fast_reconciler_settings() -> ReconcilerSettings {
    ReconcilerSettings {
        max_workers: 4,
        attempt_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(10),
    }
}

/// Poll `check` until it returns `true` or [`TEST_TIMEOUT`] passes.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Primary and secondary in-memory stores, the secondary behind a fault
/// switch, joined by a replicating store.
pub struct Harness {
    pub primary: Arc<InMemoryBlobStore>,
    pub secondary: Arc<FaultyBlobStore>,
    pub secondary_data: Arc<InMemoryBlobStore>,
    pub journal: Arc<dyn ObligationJournal>,
    pub store: Arc<ReplicatingBlobStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_journal(Arc::new(InMemoryJournal::new(fast_journal_settings())))
    }

    pub fn with_journal(journal: Arc<dyn ObligationJournal>) -> Self {
        Self::with_secondary(journal, |data| data)
    }

    /// Build a harness whose secondary is `wrap(secondary_data)`.
    pub fn with_secondary(
        journal: Arc<dyn ObligationJournal>,
        wrap: impl FnOnce(Arc<dyn BlobStoreDao>) -> Arc<dyn BlobStoreDao>,
    ) -> Self {
        let primary = Arc::new(InMemoryBlobStore::new());
        let secondary_data = Arc::new(InMemoryBlobStore::new());
        let data: Arc<dyn BlobStoreDao> = secondary_data.clone();
        let secondary = Arc::new(FaultyBlobStore::new(wrap(data)));
        let store = Arc::new(ReplicatingBlobStore::new(
            primary.clone(),
            secondary.clone(),
            journal.clone(),
        ));
        Self {
            primary,
            secondary,
            secondary_data,
            journal,
            store,
        }
    }

    pub async fn ids(store: &dyn BlobStoreDao, bucket: &BucketName) -> Vec<BlobId> {
        store.list_blobs(bucket).await.unwrap()
    }

    pub async fn converged(&self) -> bool {
        self.store.prober().is_converged().await.unwrap_or(false)
    }

    /// Wait until both stores hold the same ids in every bucket.
    pub async fn wait_converged(&self) {
        let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
        while !self.converged().await {
            assert!(tokio::time::Instant::now() < deadline, "stores never converged");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Wrapper that records how many operations per blob overlap in time.
pub struct InstrumentedBlobStore {
    inner: Arc<dyn BlobStoreDao>,
    delay: Duration,
    in_flight: Mutex<HashMap<(BucketName, BlobId), usize>>,
    max_overlap: AtomicUsize,
    calls: AtomicUsize,
}

impl InstrumentedBlobStore {
    pub fn new(inner: Arc<dyn BlobStoreDao>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            in_flight: Mutex::new(HashMap::new()),
            max_overlap: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Highest number of simultaneous operations seen for one blob.
    pub fn max_overlap(&self) -> usize {
        self.max_overlap.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, bucket: &BucketName, id: &BlobId) -> InFlight<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (bucket.clone(), *id);
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(key.clone()).or_default();
        *count += 1;
        self.max_overlap.fetch_max(*count, Ordering::SeqCst);
        InFlight { store: self, key }
    }

    async fn tracked<T>(
        &self,
        bucket: &BucketName,
        id: &BlobId,
        op: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        // Released on drop, so a timed-out attempt stops counting too.
        let _in_flight = self.enter(bucket, id);
        tokio::time::sleep(self.delay).await;
        op.await
    }
}

struct InFlight<'a> {
    store: &'a InstrumentedBlobStore,
    key: (BucketName, BlobId),
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.store.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(&self.key) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl BlobStoreDao for InstrumentedBlobStore {
    async fn save(&self, bucket: &BucketName, id: &BlobId, data: Bytes) -> StoreResult<()> {
        self.tracked(bucket, id, self.inner.save(bucket, id, data)).await
    }

    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StoreResult<Bytes> {
        self.tracked(bucket, id, self.inner.read(bucket, id)).await
    }

    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StoreResult<()> {
        self.tracked(bucket, id, self.inner.delete(bucket, id)).await
    }

    async fn delete_bucket(&self, bucket: &BucketName) -> StoreResult<()> {
        self.inner.delete_bucket(bucket).await
    }

    async fn delete_all_buckets(&self) -> StoreResult<()> {
        self.inner.delete_all_buckets().await
    }

    async fn list_buckets(&self) -> StoreResult<Vec<BucketName>> {
        self.inner.list_buckets().await
    }

    async fn list_blobs(&self, bucket: &BucketName) -> StoreResult<Vec<BlobId>> {
        self.inner.list_blobs(bucket).await
    }
}
