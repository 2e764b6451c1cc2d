//! Storage engine implementations

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use ripple_core::{Error, Result, META_BUCKET};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Storage engine trait
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Store object data, returning its ETag
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<String>;

    /// Retrieve object data
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Delete object. Missing objects yield `Error::NoSuchKey`.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Check if object exists
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Create bucket
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Delete an empty bucket
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Check if bucket exists
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// User-visible buckets (the meta bucket is excluded)
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Whether this engine backs a multi-node deployment
    fn is_distributed(&self) -> bool;
}

/// Compute the hex MD5 of a byte slice (used for ETags and object paths)
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Local filesystem storage engine
pub struct LocalStorage {
    data_dir: PathBuf,
    distributed: bool,
}

impl LocalStorage {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            distributed: false,
        }
    }

    /// Mark this engine as part of a multi-node deployment
    pub fn with_distributed(mut self, distributed: bool) -> Self {
        self.distributed = distributed;
        self
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(self.bucket_path(META_BUCKET).join("objects")).await?;
        info!("Storage initialized at {:?}", self.data_dir);
        Ok(())
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        // Hash-based directory structure to avoid too many files in one dir
        let hash = md5_hex(key.as_bytes());
        let prefix = &hash[..2];
        self.data_dir
            .join(bucket)
            .join("objects")
            .join(prefix)
            .join(&hash)
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.data_dir.join(bucket)
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if fs::try_exists(self.bucket_path(bucket)).await? {
            Ok(())
        } else {
            Err(Error::NoSuchBucketNamed(bucket.to_string()))
        }
    }
}

#[async_trait]
impl StorageEngine for LocalStorage {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<String> {
        self.ensure_bucket(bucket).await?;
        let path = self.object_path(bucket, key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never observe a partial object
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &path).await?;

        let etag = md5_hex(&data);
        debug!("Stored object {}/{} ({} bytes)", bucket, key, data.len());

        Ok(etag)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let path = self.object_path(bucket, key);

        match fs::read(&path).await {
            Ok(data) => {
                debug!("Retrieved object {}/{} ({} bytes)", bucket, key, data.len());
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NoSuchKey),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key);

        match fs::remove_file(&path).await {
            Ok(()) => {
                // Drop the hash directory once empty
                if let Some(parent) = path.parent() {
                    if let Err(e) = fs::remove_dir(parent).await {
                        debug!("Keeping {}: {}", parent.display(), e);
                    }
                }
                debug!("Deleted object {}/{}", bucket, key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NoSuchKey),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.object_path(bucket, key)).await?)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let path = self.bucket_path(bucket);
        if fs::try_exists(&path).await? {
            return Err(Error::BucketAlreadyExists);
        }
        fs::create_dir_all(path.join("objects")).await?;
        info!("Created bucket {}", bucket);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let path = self.bucket_path(bucket);
        self.ensure_bucket(bucket).await?;

        let objects_path = path.join("objects");
        if fs::try_exists(&objects_path).await? {
            let mut entries = fs::read_dir(&objects_path).await?;
            if entries.next_entry().await?.is_some() {
                return Err(Error::BucketNotEmpty);
            }
        }

        fs::remove_dir_all(&path).await?;
        info!("Deleted bucket {}", bucket);
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(fs::try_exists(self.bucket_path(bucket)).await?)
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let mut buckets = Vec::new();
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(buckets),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                buckets.push(name);
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    fn is_distributed(&self) -> bool {
        self.distributed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.init().await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, storage) = storage().await;
        storage.create_bucket("photos").await.unwrap();

        let etag = storage
            .put("photos", "img/a.png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert_eq!(etag, md5_hex(b"png"));
        assert_eq!(
            storage.get("photos", "img/a.png").await.unwrap(),
            Bytes::from_static(b"png")
        );
        assert!(storage.exists("photos", "img/a.png").await.unwrap());

        storage.delete("photos", "img/a.png").await.unwrap();
        assert!(matches!(
            storage.get("photos", "img/a.png").await,
            Err(Error::NoSuchKey)
        ));
        assert!(matches!(
            storage.delete("photos", "img/a.png").await,
            Err(Error::NoSuchKey)
        ));
    }

    #[tokio::test]
    async fn test_delete_keeps_shared_hash_directory() {
        let (_dir, storage) = storage().await;
        storage.create_bucket("photos").await.unwrap();
        assert_eq!(md5_hex(b"k3")[..2], md5_hex(b"k31")[..2]);

        storage.put("photos", "k3", Bytes::from_static(b"a")).await.unwrap();
        storage.put("photos", "k31", Bytes::from_static(b"b")).await.unwrap();

        storage.delete("photos", "k3").await.unwrap();
        assert_eq!(
            storage.get("photos", "k31").await.unwrap(),
            Bytes::from_static(b"b")
        );

        storage.delete("photos", "k31").await.unwrap();
        storage.delete_bucket("photos").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_requires_bucket() {
        let (_dir, storage) = storage().await;
        assert!(matches!(
            storage.put("missing", "k", Bytes::new()).await,
            Err(Error::NoSuchBucketNamed(_))
        ));
    }

    #[tokio::test]
    async fn test_list_buckets_hides_meta_bucket() {
        let (_dir, storage) = storage().await;
        storage.create_bucket("b").await.unwrap();
        storage.create_bucket("a").await.unwrap();
        assert_eq!(storage.list_buckets().await.unwrap(), vec!["a", "b"]);
        assert!(storage.bucket_exists(META_BUCKET).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_bucket_must_be_empty() {
        let (_dir, storage) = storage().await;
        storage.create_bucket("photos").await.unwrap();
        storage
            .put("photos", "k", Bytes::from_static(b"v"))
            .await
            .unwrap();
        assert!(matches!(
            storage.delete_bucket("photos").await,
            Err(Error::BucketNotEmpty)
        ));

        storage.delete("photos", "k").await.unwrap();
        storage.delete_bucket("photos").await.unwrap();
        assert!(!storage.bucket_exists("photos").await.unwrap());
        assert!(matches!(
            storage.delete_bucket("photos").await,
            Err(Error::NoSuchBucketNamed(_))
        ));
    }
}
