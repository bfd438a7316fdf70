use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use twinblob_types::{BlobId, BucketName};

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStoreDao;

type Buckets = BTreeMap<BucketName, BTreeMap<BlobId, Bytes>>;

/// In-memory, map-based blob store.
///
/// Intended for tests and embedding. Buckets and blobs are held behind a
/// `RwLock`; payloads are `Bytes`, so reads are cheap reference-count bumps.
/// A bucket exists exactly as long as it holds at least one blob.
pub struct InMemoryBlobStore {
    buckets: RwLock<Buckets>,
}

impl InMemoryBlobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of blobs across all buckets.
    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .expect("lock poisoned")
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    /// Returns `true` if the store holds no blob.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.buckets
            .read()
            .expect("lock poisoned")
            .values()
            .flat_map(BTreeMap::values)
            .map(|data| data.len() as u64)
            .sum()
    }

    /// Returns `true` if `id` is stored in `bucket`.
    pub fn contains(&self, bucket: &BucketName, id: &BlobId) -> bool {
        self.buckets
            .read()
            .expect("lock poisoned")
            .get(bucket)
            .is_some_and(|blobs| blobs.contains_key(id))
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStoreDao for InMemoryBlobStore {
    async fn save(&self, bucket: &BucketName, id: &BlobId, data: Bytes) -> StoreResult<()> {
        let mut buckets = self.buckets.write().expect("lock poisoned");
        // Idempotent: content addressing guarantees the same id always maps
        // to the same content.
        buckets
            .entry(bucket.clone())
            .or_default()
            .entry(*id)
            .or_insert(data);
        Ok(())
    }

    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StoreResult<Bytes> {
        let buckets = self.buckets.read().expect("lock poisoned");
        buckets
            .get(bucket)
            .and_then(|blobs| blobs.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.clone(),
                id: *id,
            })
    }

    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StoreResult<()> {
        let mut buckets = self.buckets.write().expect("lock poisoned");
        if let Some(blobs) = buckets.get_mut(bucket) {
            blobs.remove(id);
            if blobs.is_empty() {
                buckets.remove(bucket);
            }
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &BucketName) -> StoreResult<()> {
        self.buckets.write().expect("lock poisoned").remove(bucket);
        Ok(())
    }

    async fn delete_all_buckets(&self) -> StoreResult<()> {
        self.buckets.write().expect("lock poisoned").clear();
        Ok(())
    }

    async fn list_buckets(&self) -> StoreResult<Vec<BucketName>> {
        Ok(self
            .buckets
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect())
    }

    async fn list_blobs(&self, bucket: &BucketName) -> StoreResult<Vec<BlobId>> {
        Ok(self
            .buckets
            .read()
            .expect("lock poisoned")
            .get(bucket)
            .map(|blobs| blobs.keys().copied().collect())
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len();
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &count)
            .finish()
    }
}
