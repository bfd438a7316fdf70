use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::debug;
use twinblob_types::{BlobId, BucketName};

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStoreDao;

/// Failure behavior of a [`FaultyBlobStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FaultMode {
    /// Calls are forwarded to the wrapped store.
    #[default]
    Healthy,
    /// Calls fail immediately with [`StoreError::Unavailable`].
    Unavailable,
    /// Calls hang until the mode changes, like a paused container.
    Stalled,
}

/// Wrapper that injects outages into any [`BlobStoreDao`].
///
/// The mode can be flipped at any time from another task. Calls already
/// waiting in [`FaultMode::Stalled`] resume (or fail) as soon as the mode
/// changes.
pub struct FaultyBlobStore {
    inner: Arc<dyn BlobStoreDao>,
    mode: watch::Sender<FaultMode>,
    latency: Duration,
}

impl FaultyBlobStore {
    pub fn new(inner: Arc<dyn BlobStoreDao>) -> Self {
        let (mode, _) = watch::channel(FaultMode::Healthy);
        Self {
            inner,
            mode,
            latency: Duration::ZERO,
        }
    }

    /// Add a fixed delay in front of every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_mode(&self, mode: FaultMode) {
        debug!(?mode, "fault mode changed");
        self.mode.send_replace(mode);
    }

    pub fn mode(&self) -> FaultMode {
        *self.mode.borrow()
    }

    /// Shorthand for `set_mode(FaultMode::Stalled)`.
    pub fn pause(&self) {
        self.set_mode(FaultMode::Stalled);
    }

    /// Shorthand for `set_mode(FaultMode::Healthy)`.
    pub fn resume(&self) {
        self.set_mode(FaultMode::Healthy);
    }

    /// The wrapped store, bypassing fault injection.
    pub fn inner(&self) -> &Arc<dyn BlobStoreDao> {
        &self.inner
    }

    async fn gate(&self) -> StoreResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut rx = self.mode.subscribe();
        loop {
            let mode = *rx.borrow_and_update();
            match mode {
                FaultMode::Healthy => return Ok(()),
                FaultMode::Unavailable => {
                    return Err(StoreError::Unavailable("injected outage".into()))
                }
                FaultMode::Stalled => {
                    if rx.changed().await.is_err() {
                        return Err(StoreError::Unavailable("fault controller dropped".into()));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl BlobStoreDao for FaultyBlobStore {
    async fn save(&self, bucket: &BucketName, id: &BlobId, data: Bytes) -> StoreResult<()> {
        self.gate().await?;
        self.inner.save(bucket, id, data).await
    }

    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StoreResult<Bytes> {
        self.gate().await?;
        self.inner.read(bucket, id).await
    }

    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StoreResult<()> {
        self.gate().await?;
        self.inner.delete(bucket, id).await
    }

    async fn delete_bucket(&self, bucket: &BucketName) -> StoreResult<()> {
        self.gate().await?;
        self.inner.delete_bucket(bucket).await
    }

    async fn delete_all_buckets(&self) -> StoreResult<()> {
        self.gate().await?;
        self.inner.delete_all_buckets().await
    }

    async fn list_buckets(&self) -> StoreResult<Vec<BucketName>> {
        self.gate().await?;
        self.inner.list_buckets().await
    }

    async fn list_blobs(&self, bucket: &BucketName) -> StoreResult<Vec<BlobId>> {
        self.gate().await?;
        self.inner.list_blobs(bucket).await
    }
}

impl std::fmt::Debug for FaultyBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyBlobStore")
            .field("mode", &self.mode())
            .field("latency", &self.latency)
            .finish()
    }
}
