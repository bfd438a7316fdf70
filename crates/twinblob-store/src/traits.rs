use async_trait::async_trait;
use bytes::Bytes;
use twinblob_types::{BlobId, BucketName};

use crate::error::StoreResult;

/// Uniform contract of a single backing blob store.
///
/// All implementations must satisfy these invariants:
/// - Blobs are immutable once written. The same content always maps to the
///   same [`BlobId`], so saving an id that already exists is a no-op.
/// - Concurrent reads are always safe.
/// - Deleting something that does not exist succeeds.
/// - All backend errors are propagated, never silently ignored.
#[async_trait]
pub trait BlobStoreDao: Send + Sync {
    /// Store `data` under `id` in `bucket`, creating the bucket if needed.
    async fn save(&self, bucket: &BucketName, id: &BlobId, data: Bytes) -> StoreResult<()>;

    /// Read a blob. Returns [`StoreError::NotFound`](crate::StoreError::NotFound)
    /// if it does not exist.
    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StoreResult<Bytes>;

    /// Delete a blob.
    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StoreResult<()>;

    /// Delete a bucket and every blob in it.
    async fn delete_bucket(&self, bucket: &BucketName) -> StoreResult<()>;

    /// Delete every bucket.
    async fn delete_all_buckets(&self) -> StoreResult<()>;

    /// List the buckets holding at least one blob.
    async fn list_buckets(&self) -> StoreResult<Vec<BucketName>>;

    /// List the ids stored in `bucket`. An unknown bucket lists empty.
    async fn list_blobs(&self, bucket: &BucketName) -> StoreResult<Vec<BlobId>>;

    /// Store content under its content-derived id and return that id.
    async fn save_content(&self, bucket: &BucketName, data: Bytes) -> StoreResult<BlobId> {
        let id = BlobId::of(&data);
        self.save(bucket, &id, data).await?;
        Ok(id)
    }
}
