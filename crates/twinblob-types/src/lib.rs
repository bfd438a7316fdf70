//! Foundation types for TwinBlob.
//!
//! This crate provides the identifier and namespace types shared by every
//! other TwinBlob crate.
//!
//! # Key Types
//!
//! - [`BlobId`]: Content-addressed identifier (domain-separated BLAKE3 hash)
//! - [`BucketName`]: Validated logical namespace for blobs
//! - [`StoreRole`]: Which of the two backing stores an operation targets
//! - [`ContentHasher`]: Derives a [`BlobId`] from blob content
//! - [`Timestamp`]: Wall-clock milliseconds used for scheduling retries

pub mod blob_id;
pub mod bucket;
pub mod error;
pub mod hasher;
pub mod role;
pub mod temporal;

pub use blob_id::BlobId;
pub use bucket::BucketName;
pub use error::TypeError;
pub use hasher::ContentHasher;
pub use role::StoreRole;
pub use temporal::Timestamp;
