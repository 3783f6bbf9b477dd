//! In-memory object store double for tests and self-contained development.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{sha256_hex, ObjectStat, ObjectStore, StoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
    sha256: String,
}

/// Map-backed store with the same visible behavior as the S3 adapter.
#[derive(Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let sha256 = sha256_hex(&bytes);
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                sha256,
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.bytes.clone())
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key)))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        if !self.exists(bucket, key).await? {
            return Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(format!(
            "memory://{}/{}?expires={}",
            bucket,
            key,
            ttl.as_secs()
        ))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().await;
        if let Some(objects) = buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<u32, StoreError> {
        let mut buckets = self.buckets.write().await;
        let Some(objects) = buckets.get_mut(bucket) else {
            return Ok(0);
        };
        let doomed: Vec<String> = objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            objects.remove(key);
        }
        Ok(doomed.len() as u32)
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat, StoreError> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| ObjectStat {
                size: object.bytes.len() as u64,
                content_type: Some(object.content_type.clone()),
                sha256: Some(object.sha256.clone()),
            })
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::STL_CONTENT_TYPE;

    #[tokio::test]
    async fn test_put_get_stat_round_trip() {
        let store = MemoryStore::new();
        store
            .put("uploads", "a/model.stl", b"hello".to_vec(), STL_CONTENT_TYPE)
            .await
            .unwrap();

        assert_eq!(store.get("uploads", "a/model.stl").await.unwrap(), b"hello");
        assert!(store.exists("uploads", "a/model.stl").await.unwrap());
        assert!(!store.exists("uploads", "a/other.stl").await.unwrap());

        let stat = store.stat("uploads", "a/model.stl").await.unwrap();
        assert_eq!(stat.size, 5);
        assert_eq!(stat.content_type.as_deref(), Some(STL_CONTENT_TYPE));
        assert_eq!(stat.sha256.as_deref(), Some(sha256_hex(b"hello").as_str()));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get("uploads", "nope").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.stl");
        std::fs::write(&path, b"solid bytes").unwrap();

        let store = MemoryStore::new();
        store
            .put_file("uploads", "f/model.stl", &path, STL_CONTENT_TYPE)
            .await
            .unwrap();
        assert_eq!(
            store.get("uploads", "f/model.stl").await.unwrap(),
            b"solid bytes"
        );
    }

    #[tokio::test]
    async fn test_list_and_delete_prefix() {
        let store = MemoryStore::new();
        for key in ["job1/part_1_1_1.stl", "job1/part_2_1_1.stl", "job2/x.stl"] {
            store
                .put("results", key, vec![0u8], STL_CONTENT_TYPE)
                .await
                .unwrap();
        }

        let listed = store.list("results", "job1/").await.unwrap();
        assert_eq!(listed.len(), 2);

        let removed = store.delete_prefix("results", "job1/").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list("results", "").await.unwrap().len(), 1);
    }
}
