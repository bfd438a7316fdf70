use std::collections::BTreeSet;
use std::sync::Arc;

use twinblob_store::BlobStoreDao;
use twinblob_types::{BlobId, BucketName, StoreRole};

use crate::error::{ReplicationError, ReplicationResult};

/// Differences between the two stores for one bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriftReport {
    pub bucket: BucketName,
    /// Ids held by the primary but not the secondary, sorted.
    pub missing_in_secondary: Vec<BlobId>,
    /// Ids held by the secondary but not the primary, sorted.
    pub only_in_secondary: Vec<BlobId>,
}

impl DriftReport {
    pub fn is_converged(&self) -> bool {
        self.missing_in_secondary.is_empty() && self.only_in_secondary.is_empty()
    }
}

/// Read-only view of both stores for verification tooling.
#[derive(Clone)]
pub struct ConsistencyProber {
    primary: Arc<dyn BlobStoreDao>,
    secondary: Arc<dyn BlobStoreDao>,
}

impl ConsistencyProber {
    pub fn new(primary: Arc<dyn BlobStoreDao>, secondary: Arc<dyn BlobStoreDao>) -> Self {
        Self { primary, secondary }
    }

    fn store(&self, role: StoreRole) -> &Arc<dyn BlobStoreDao> {
        match role {
            StoreRole::Primary => &self.primary,
            StoreRole::Secondary => &self.secondary,
        }
    }

    pub async fn list_buckets(&self, role: StoreRole) -> ReplicationResult<Vec<BucketName>> {
        self.store(role)
            .list_buckets()
            .await
            .map_err(|source| ReplicationError::Probe { role, source })
    }

    pub async fn list_blobs(&self, role: StoreRole, bucket: &BucketName) -> ReplicationResult<Vec<BlobId>> {
        self.store(role)
            .list_blobs(bucket)
            .await
            .map_err(|source| ReplicationError::Probe { role, source })
    }

    pub async fn compare_bucket(&self, bucket: &BucketName) -> ReplicationResult<DriftReport> {
        let primary: BTreeSet<BlobId> = self
            .list_blobs(StoreRole::Primary, bucket)
            .await?
            .into_iter()
            .collect();
        let secondary: BTreeSet<BlobId> = self
            .list_blobs(StoreRole::Secondary, bucket)
            .await?
            .into_iter()
            .collect();

        Ok(DriftReport {
            bucket: bucket.clone(),
            missing_in_secondary: primary.difference(&secondary).copied().collect(),
            only_in_secondary: secondary.difference(&primary).copied().collect(),
        })
    }

    /// Compare every bucket listed by either store, in bucket order.
    pub async fn compare_all(&self) -> ReplicationResult<Vec<DriftReport>> {
        let mut buckets: BTreeSet<BucketName> =
            self.list_buckets(StoreRole::Primary).await?.into_iter().collect();
        buckets.extend(self.list_buckets(StoreRole::Secondary).await?);

        let mut reports = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            reports.push(self.compare_bucket(bucket).await?);
        }
        Ok(reports)
    }

    /// Returns `true` if every bucket holds the same ids in both stores.
    pub async fn is_converged(&self) -> ReplicationResult<bool> {
        Ok(self.compare_all().await?.iter().all(DriftReport::is_converged))
    }
}

impl std::fmt::Debug for ConsistencyProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyProber").finish_non_exhaustive()
    }
}
