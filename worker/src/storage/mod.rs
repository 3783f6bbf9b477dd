//! # Object Store Adapter
//!
//! Content-addressed blob storage behind a trait so the runtime can be wired
//! to MinIO in production and to an in-memory double in tests. Two logical
//! buckets exist: uploads (input models) and results (part files and the
//! bundle archive).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

/// Content type stored for STL objects.
pub const STL_CONTENT_TYPE: &str = "application/sla";

/// Content type stored for bundle archives.
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Metadata for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub content_type: Option<String>,
    /// Hex SHA-256 of the content, recorded on put.
    pub sha256: Option<String>,
}

/// Blob storage operations the runtime needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Uploads a file from disk.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let bytes = tokio::fs::read(path).await?;
        self.put(bucket, key, bytes, content_type).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;

    /// URL from which the object can be fetched without credentials until
    /// `ttl` elapses.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StoreError>;

    /// Keys under `prefix`, lexicographic.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Deletes every key under `prefix`, returning the count removed.
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<u32, StoreError>;

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat, StoreError>;
}

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hex SHA-256 digest of a payload.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
