//! In-memory storage engine

use super::{md5_hex, StorageEngine};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use ripple_core::{Error, Result, META_BUCKET};
use std::collections::{BTreeMap, HashMap};

/// Volatile storage, mainly for tests and ephemeral nodes
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, BTreeMap<String, Bytes>>>,
    distributed: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let mut buckets = HashMap::new();
        buckets.insert(META_BUCKET.to_string(), BTreeMap::new());
        Self {
            buckets: RwLock::new(buckets),
            distributed: false,
        }
    }

    pub fn with_distributed(mut self, distributed: bool) -> Self {
        self.distributed = distributed;
        self
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEngine for MemoryStorage {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<String> {
        let etag = md5_hex(&data);
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::NoSuchBucketNamed(bucket.to_string()))?;
        objects.insert(key.to_string(), data);
        Ok(etag)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
            .ok_or(Error::NoSuchKey)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.buckets
            .write()
            .get_mut(bucket)
            .and_then(|objects| objects.remove(key))
            .map(|_| ())
            .ok_or(Error::NoSuchKey)
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self
            .buckets
            .read()
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key)))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = self.buckets.write();
        if buckets.contains_key(bucket) {
            return Err(Error::BucketAlreadyExists);
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = self.buckets.write();
        match buckets.get(bucket) {
            None => Err(Error::NoSuchBucketNamed(bucket.to_string())),
            Some(objects) if !objects.is_empty() => Err(Error::BucketNotEmpty),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.read().contains_key(bucket))
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .buckets
            .read()
            .keys()
            .filter(|name| !name.starts_with('.'))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    fn is_distributed(&self) -> bool {
        self.distributed
    }
}
