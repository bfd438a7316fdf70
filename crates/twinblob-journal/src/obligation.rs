use std::fmt;

use serde::{Deserialize, Serialize};
use twinblob_types::{BlobId, BucketName, Timestamp};

/// What must be made true in the secondary store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObligationKind {
    /// Copy the blob from the primary into the secondary.
    Save { bucket: BucketName, blob_id: BlobId },
    /// Remove the blob from the secondary.
    Delete { bucket: BucketName, blob_id: BlobId },
    /// Remove a whole bucket from the secondary.
    DeleteBucket { bucket: BucketName },
    /// Remove every bucket from the secondary.
    DeleteAllBuckets,
}

impl ObligationKind {
    pub fn save(bucket: BucketName, blob_id: BlobId) -> Self {
        Self::Save { bucket, blob_id }
    }

    pub fn delete(bucket: BucketName, blob_id: BlobId) -> Self {
        Self::Delete { bucket, blob_id }
    }

    /// The coalescing key of this obligation.
    pub fn key(&self) -> ObligationKey {
        match self {
            Self::Save { bucket, blob_id } | Self::Delete { bucket, blob_id } => {
                ObligationKey::Blob {
                    bucket: bucket.clone(),
                    blob_id: *blob_id,
                }
            }
            Self::DeleteBucket { bucket } => ObligationKey::Bucket {
                bucket: bucket.clone(),
            },
            Self::DeleteAllBuckets => ObligationKey::AllBuckets,
        }
    }

    /// Returns `true` for bucket-wide and store-wide deletions.
    pub fn is_wipe(&self) -> bool {
        matches!(self, Self::DeleteBucket { .. } | Self::DeleteAllBuckets)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Save { .. } => "save",
            Self::Delete { .. } => "delete",
            Self::DeleteBucket { .. } => "delete-bucket",
            Self::DeleteAllBuckets => "delete-all-buckets",
        }
    }
}

impl fmt::Display for ObligationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.label(), self.key())
    }
}

/// Coalescing key: a key holds at most one pending obligation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObligationKey {
    Blob { bucket: BucketName, blob_id: BlobId },
    Bucket { bucket: BucketName },
    AllBuckets,
}

impl ObligationKey {
    /// Returns `true` if a wipe keyed by `self` removes what `other` targets.
    ///
    /// Only wipe keys cover anything; a key never covers itself.
    pub fn covers(&self, other: &ObligationKey) -> bool {
        match (self, other) {
            (Self::AllBuckets, Self::AllBuckets) => false,
            (Self::AllBuckets, _) => true,
            (Self::Bucket { bucket }, Self::Blob { bucket: b, .. }) => bucket == b,
            _ => false,
        }
    }
}

impl fmt::Display for ObligationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blob { bucket, blob_id } => write!(f, "{bucket}/{}", blob_id.short_hex()),
            Self::Bucket { bucket } => write!(f, "{bucket}/*"),
            Self::AllBuckets => write!(f, "*"),
        }
    }
}

/// A durable record that something must be made consistent in the
/// secondary store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    /// Journal-assigned position; later obligations have larger values.
    pub seq: u64,
    pub kind: ObligationKind,
    pub created_at: Timestamp,
    /// Number of failed delivery attempts so far.
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Earliest time the next attempt may start.
    pub next_attempt_at: Timestamp,
}

impl Obligation {
    pub fn new(seq: u64, kind: ObligationKind, created_at: Timestamp) -> Self {
        Self {
            seq,
            kind,
            created_at,
            attempt_count: 0,
            last_error: None,
            next_attempt_at: created_at,
        }
    }

    pub fn key(&self) -> ObligationKey {
        self.kind.key()
    }

    pub fn is_ready(&self, now: Timestamp) -> bool {
        self.next_attempt_at <= now
    }
}

/// An obligation handed to exactly one worker until it is marked delivered
/// or failed, or until `expires_at` passes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeasedObligation {
    pub obligation: Obligation,
    /// Distinguishes successive leases of the same obligation.
    pub lease_id: u64,
    pub expires_at: Timestamp,
}
