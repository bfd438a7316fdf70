use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Maximum length of a bucket name, in bytes.
pub const MAX_BUCKET_NAME_LEN: usize = 255;

/// Logical namespace partitioning blobs (per deployment, per retention
/// policy, ...).
///
/// Names are non-empty, at most [`MAX_BUCKET_NAME_LEN`] bytes, and made of
/// lowercase ASCII letters, digits, `.`, `_` and `-`. The same rules hold in
/// every object store the name is handed to.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketName(String);

impl BucketName {
    /// The bucket used when a caller does not pick one.
    pub const DEFAULT: &'static str = "default-bucket";

    /// Validate and wrap a bucket name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::InvalidBucketName {
                name,
                reason: "empty",
            });
        }
        if name.len() > MAX_BUCKET_NAME_LEN {
            return Err(TypeError::InvalidBucketName {
                name,
                reason: "longer than 255 bytes",
            });
        }
        let valid = name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-'));
        if !valid {
            return Err(TypeError::InvalidBucketName {
                name,
                reason: "allowed characters are [a-z0-9._-]",
            });
        }
        Ok(Self(name))
    }

    /// The default bucket.
    pub fn default_bucket() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketName({})", self.0)
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BucketName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BucketName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BucketName> for String {
    fn from(bucket: BucketName) -> Self {
        bucket.0
    }
}

impl AsRef<str> for BucketName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
