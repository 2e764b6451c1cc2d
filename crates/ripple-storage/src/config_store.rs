//! Durable bucket configuration
//!
//! Notification and listener configurations live as objects in the meta
//! bucket, under `buckets/<bucket>/notification.xml` and
//! `buckets/<bucket>/listener.json`.

use bytes::Bytes;
use ripple_core::types::{ListenerConfig, NotificationConfiguration};
use ripple_core::{
    Error, Result, BUCKET_CONFIG_PREFIX, BUCKET_LISTENER_CONFIG, BUCKET_NOTIFICATION_CONFIG,
    META_BUCKET,
};
use std::sync::Arc;
use tracing::{debug, error};

use crate::engine::StorageEngine;

/// Reads and writes per-bucket configuration through a storage engine
#[derive(Clone)]
pub struct ConfigStore {
    storage: Arc<dyn StorageEngine>,
}

impl ConfigStore {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    /// Whether listener configuration must be persisted for other nodes
    pub fn is_distributed(&self) -> bool {
        self.storage.is_distributed()
    }

    fn notification_path(bucket: &str) -> String {
        format!("{}/{}/{}", BUCKET_CONFIG_PREFIX, bucket, BUCKET_NOTIFICATION_CONFIG)
    }

    fn listener_path(bucket: &str) -> String {
        format!("{}/{}/{}", BUCKET_CONFIG_PREFIX, bucket, BUCKET_LISTENER_CONFIG)
    }

    /// Load a bucket's notification configuration. `None` when never set.
    pub async fn load_notification_config(
        &self,
        bucket: &str,
    ) -> Result<Option<NotificationConfiguration>> {
        let data = match self
            .storage
            .get(META_BUCKET, &Self::notification_path(bucket))
            .await
        {
            Ok(data) => data,
            Err(Error::NoSuchKey) => return Ok(None),
            Err(e) => return Err(e),
        };

        let xml = std::str::from_utf8(&data)
            .map_err(|e| Error::MalformedXML(format!("notification.xml is not UTF-8: {}", e)))?;
        NotificationConfiguration::from_xml(xml).map(Some)
    }

    /// Overwrite a bucket's notification configuration
    pub async fn save_notification_config(
        &self,
        bucket: &str,
        config: &NotificationConfiguration,
    ) -> Result<()> {
        let xml = config.to_xml()?;
        self.storage
            .put(META_BUCKET, &Self::notification_path(bucket), Bytes::from(xml))
            .await
            .inspect_err(|e| error!("Failed to persist notification config for {}: {}", bucket, e))?;
        debug!("Saved notification config for bucket {}", bucket);
        Ok(())
    }

    /// Remove a bucket's notification configuration; missing is success
    pub async fn delete_notification_config(&self, bucket: &str) -> Result<()> {
        match self
            .storage
            .delete(META_BUCKET, &Self::notification_path(bucket))
            .await
        {
            Ok(()) | Err(Error::NoSuchKey) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Load a bucket's listener sequence (empty when never persisted)
    pub async fn load_listener_configs(&self, bucket: &str) -> Result<Vec<ListenerConfig>> {
        let data = match self
            .storage
            .get(META_BUCKET, &Self::listener_path(bucket))
            .await
        {
            Ok(data) => data,
            Err(Error::NoSuchKey) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        serde_json::from_slice(&data).map_err(|e| {
            Error::InternalError(format!("Corrupt listener config for {}: {}", bucket, e))
        })
    }

    /// Remove a bucket's persisted listener sequence; missing is success
    pub async fn delete_listener_configs(&self, bucket: &str) -> Result<()> {
        match self
            .storage
            .delete(META_BUCKET, &Self::listener_path(bucket))
            .await
        {
            Ok(()) | Err(Error::NoSuchKey) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Persist a bucket's listener sequence. Single-node deployments keep
    /// listeners in memory only.
    pub async fn save_listener_configs(
        &self,
        bucket: &str,
        listeners: &[ListenerConfig],
    ) -> Result<()> {
        if !self.is_distributed() {
            return Ok(());
        }

        let data = serde_json::to_vec(listeners)
            .map_err(|e| Error::InternalError(format!("Failed to encode listeners: {}", e)))?;
        self.storage
            .put(META_BUCKET, &Self::listener_path(bucket), Bytes::from(data))
            .await
            .inspect_err(|e| error!("Failed to persist listener config for {}: {}", bucket, e))?;
        debug!(
            "Saved {} listener config(s) for bucket {}",
            listeners.len(),
            bucket
        );
        Ok(())
    }
}
