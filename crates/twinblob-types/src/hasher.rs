use crate::blob_id::BlobId;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so the same bytes hashed under two domains never collide.
/// Blob identifiers are always derived with [`ContentHasher::BLOB`].
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for blob content.
    pub const BLOB: Self = Self {
        domain: "twinblob-blob-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> BlobId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        BlobId::from_hash(*hasher.finalize().as_bytes())
    }

    /// Verify that data produces the expected blob ID.
    pub fn verify(&self, data: &[u8], expected: &BlobId) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"Subject: hello";
        assert_eq!(ContentHasher::BLOB.hash(data), ContentHasher::BLOB.hash(data));
    }

    #[test]
    fn custom_domain_differs_from_blob_domain() {
        let other = ContentHasher::new("my-custom-domain-v1");
        assert_ne!(other.hash(b"data"), ContentHasher::BLOB.hash(b"data"));
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ContentHasher::BLOB.hash(b"original");
        assert!(ContentHasher::BLOB.verify(b"original", &id));
        assert!(!ContentHasher::BLOB.verify(b"tampered", &id));
    }

    #[test]
    fn domain_hash_differs_from_raw_blake3() {
        let raw = *blake3::hash(b"test").as_bytes();
        assert_ne!(raw, *ContentHasher::BLOB.hash(b"test").as_bytes());
    }
}
