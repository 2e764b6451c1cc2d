//! Bucket notification service
//!
//! Configuration workflows follow one pattern: take the bucket lock, persist
//! the new state, broadcast it to every node (this one included), release.
//! A persistence failure aborts before anything is broadcast. Peer failures
//! during the broadcast are logged and do not fail the call.

mod listener;
mod peer;

pub use listener::{
    encode_frame, ChannelSink, ListenerSession, ResponseSink, SinkError, StreamEnd,
    FRAME_DELIMITER,
};
pub use peer::{PeerEventForwarder, PeerHandler};

use ripple_cluster::{BucketLease, BucketLocker, PeerBroadcaster};
use ripple_core::types::{
    EventDescriptor, ListenRequest, ListenerConfig, NotificationConfiguration, ObjectEvent,
    PeerMessage,
};
use ripple_core::utils::{validate_bucket_name, DestinationIdGenerator};
use ripple_core::{Error, Result};
use ripple_storage::ConfigStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::events::{DispatchSummary, EventNotifier};

/// Notification configuration workflows and listener sessions
pub struct NotificationService {
    store: ConfigStore,
    notifier: Arc<EventNotifier>,
    broadcaster: Arc<PeerBroadcaster>,
    locker: Arc<dyn BucketLocker>,
    ids: DestinationIdGenerator,
    keep_alive: Duration,
}

impl NotificationService {
    pub fn new(
        store: ConfigStore,
        notifier: Arc<EventNotifier>,
        broadcaster: Arc<PeerBroadcaster>,
        locker: Arc<dyn BucketLocker>,
        keep_alive: Duration,
    ) -> Self {
        let ids = DestinationIdGenerator::new(
            notifier.config().region.clone(),
            notifier.node_id().to_string(),
        );
        Self {
            store,
            notifier,
            broadcaster,
            locker,
            ids,
            keep_alive,
        }
    }

    pub fn notifier(&self) -> &Arc<EventNotifier> {
        &self.notifier
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.store.storage().bucket_exists(bucket).await? {
            Ok(())
        } else {
            Err(Error::NoSuchBucketNamed(bucket.to_string()))
        }
    }

    async fn acquire(&self, bucket: &str) -> Result<BucketLease> {
        Ok(self.locker.acquire(bucket).await?)
    }

    async fn release(&self, lease: BucketLease) {
        let bucket = lease.bucket().to_string();
        if let Err(e) = self.locker.release(lease).await {
            warn!("Failed to release lock on {}: {}", bucket, e);
        }
    }

    // ------------------------------------------------------------------
    // Notification configuration
    // ------------------------------------------------------------------

    /// Notification configuration of a bucket as propagated to this node;
    /// empty when never set
    pub async fn get_notification_config(&self, bucket: &str) -> Result<NotificationConfiguration> {
        self.ensure_bucket(bucket).await?;
        Ok(self.notifier.notification_config(bucket).unwrap_or_default())
    }

    /// Validate, persist and propagate a bucket's notification configuration
    pub async fn put_notification_config(
        &self,
        bucket: &str,
        config: NotificationConfiguration,
    ) -> Result<()> {
        self.ensure_bucket(bucket).await?;
        config.validate()?;

        let lease = self.acquire(bucket).await?;
        let result = self.store_notification_config(bucket, config).await;
        self.release(lease).await;
        result
    }

    async fn store_notification_config(
        &self,
        bucket: &str,
        config: NotificationConfiguration,
    ) -> Result<()> {
        self.store.save_notification_config(bucket, &config).await?;
        info!(
            "Updated notification config for {} ({} destination(s))",
            bucket,
            config.descriptors().count()
        );
        self.broadcaster
            .broadcast(PeerMessage::UpdateBucketNotification {
                bucket: bucket.to_string(),
                config: Some(config),
            })
            .await;
        Ok(())
    }

    /// Drop a bucket's notification and listener configuration on every
    /// node. Listener streams on the bucket end.
    pub async fn delete_notification_config(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;

        let lease = self.acquire(bucket).await?;
        let result = self.remove_bucket_config(bucket).await;
        self.release(lease).await;
        result
    }

    /// Delete an empty bucket and its configuration under the bucket lock,
    /// so no configuration update can interleave with the deletion
    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;

        let lease = self.acquire(bucket).await?;
        let result = self.store.storage().delete_bucket(bucket).await;
        if result.is_ok() {
            if let Err(e) = self.remove_bucket_config(bucket).await {
                warn!("Bucket {} deleted but its configuration remains: {}", bucket, e);
            }
        }
        self.release(lease).await;
        result
    }

    async fn remove_bucket_config(&self, bucket: &str) -> Result<()> {
        self.store.delete_notification_config(bucket).await?;
        self.store.delete_listener_configs(bucket).await?;
        info!("Removed notification config for {}", bucket);
        self.broadcaster
            .broadcast(PeerMessage::UpdateBucketNotification {
                bucket: bucket.to_string(),
                config: None,
            })
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Listener configuration
    // ------------------------------------------------------------------

    /// Listener sequence to modify. Every change is broadcast to all nodes
    /// before the lock is released, so the holder's cache is current.
    fn current_listeners(&self, bucket: &str) -> Vec<ListenerConfig> {
        self.notifier.listener_configs(bucket)
    }

    async fn store_listeners(&self, bucket: &str, listeners: Vec<ListenerConfig>) -> Result<()> {
        self.store.save_listener_configs(bucket, &listeners).await?;
        self.broadcaster
            .broadcast(PeerMessage::UpdateBucketListener {
                bucket: bucket.to_string(),
                listeners,
            })
            .await;
        Ok(())
    }

    /// Append a listener to a bucket's sequence
    pub async fn add_listener_config(&self, bucket: &str, listener: ListenerConfig) -> Result<()> {
        let lease = self.acquire(bucket).await?;
        let result: Result<()> = async {
            let mut listeners = self.current_listeners(bucket);
            listeners.push(listener);
            self.store_listeners(bucket, listeners).await
        }
        .await;
        self.release(lease).await;
        result
    }

    /// Remove the first listener with `destination_id`. Returns whether one
    /// was found; an unknown destination changes nothing.
    pub async fn remove_listener_config(&self, bucket: &str, destination_id: &str) -> Result<bool> {
        let lease = self.acquire(bucket).await?;
        let result: Result<bool> = async {
            let mut listeners = self.current_listeners(bucket);
            let Some(position) = listeners
                .iter()
                .position(|l| l.destination_id() == destination_id)
            else {
                return Ok(false);
            };
            listeners.remove(position);
            self.store_listeners(bucket, listeners).await?;
            Ok(true)
        }
        .await;
        self.release(lease).await;
        result
    }

    // ------------------------------------------------------------------
    // Listener sessions
    // ------------------------------------------------------------------

    /// Validate a listen request and register a listener bound to this node.
    /// Events may arrive on the session as soon as this returns.
    pub async fn register_listener(
        self: &Arc<Self>,
        bucket: &str,
        request: &ListenRequest,
    ) -> Result<ListenerSession> {
        let (events, filter) = request.validate()?;
        self.ensure_bucket(bucket).await?;

        let (config_id, destination_id) = self.ids.next_listener();
        let listener = ListenerConfig::new(
            EventDescriptor::new(config_id, destination_id.clone(), events, filter),
            self.notifier.node_id(),
        );

        let (sender, receiver) = self.notifier.channel();
        self.notifier.add_listener(&destination_id, sender)?;

        if let Err(e) = self.add_listener_config(bucket, listener).await {
            self.notifier.remove_listener(&destination_id);
            return Err(e);
        }

        info!("Listener {} registered on {}", destination_id, bucket);
        Ok(ListenerSession::new(
            self.clone(),
            bucket.to_string(),
            destination_id,
            receiver,
            self.keep_alive,
        ))
    }

    /// Register a listener and stream into `sink` until the client leaves
    pub async fn start_listening<S>(
        self: &Arc<Self>,
        bucket: &str,
        request: &ListenRequest,
        sink: S,
    ) -> Result<StreamEnd>
    where
        S: ResponseSink + 'static,
    {
        let session = self.register_listener(bucket, request).await?;
        Ok(session.run(sink).await)
    }

    /// Unregister a listener's channel and drop its configuration everywhere
    pub(crate) async fn teardown_listener(&self, bucket: &str, destination_id: &str) {
        self.notifier.remove_listener(destination_id);
        match self.remove_listener_config(bucket, destination_id).await {
            Ok(_) => info!("Listener {} removed from {}", destination_id, bucket),
            Err(e) => warn!(
                "Failed to remove listener {} from {}: {}",
                destination_id, bucket, e
            ),
        }
    }

    // ------------------------------------------------------------------
    // Events and startup
    // ------------------------------------------------------------------

    /// Deliver an object event to matching destinations
    pub async fn notify_event(&self, event: ObjectEvent) -> DispatchSummary {
        self.notifier.dispatch(&event).await
    }

    /// Fill the registry caches from the durable store. Listeners bound to
    /// this node died with the previous process and are removed. A bucket
    /// whose stored configuration cannot be read is skipped.
    pub async fn load_from_store(&self) -> Result<()> {
        let buckets = self.store.storage().list_buckets().await?;
        let node_id = self.notifier.node_id().to_string();
        let mut skipped = 0;

        for bucket in &buckets {
            match self.store.load_notification_config(bucket).await {
                Ok(config) => self.notifier.set_notification_config(bucket, config),
                Err(e) => {
                    warn!("Skipping notification config of {}: {}", bucket, e);
                    skipped += 1;
                }
            }

            let listeners = match self.store.load_listener_configs(bucket).await {
                Ok(listeners) => listeners,
                Err(e) => {
                    warn!("Skipping listener config of {}: {}", bucket, e);
                    skipped += 1;
                    continue;
                }
            };
            self.notifier.set_listener_configs(bucket, listeners.clone());

            let stale = listeners.iter().filter(|l| l.target_node == node_id);
            for listener in stale {
                debug!("Dropping stale listener {} on {}", listener.destination_id(), bucket);
                if let Err(e) = self
                    .remove_listener_config(bucket, listener.destination_id())
                    .await
                {
                    warn!(
                        "Failed to drop stale listener {} on {}: {}",
                        listener.destination_id(),
                        bucket,
                        e
                    );
                }
            }
        }

        info!(
            "Loaded notification state for {} bucket(s), {} unreadable config(s) skipped",
            buckets.len(),
            skipped
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use ripple_cluster::{LocalBucketLocker, LockTable, LoopbackTransport};
    use ripple_core::types::{EventMessage, EventType, KeyFilter};
    use ripple_core::META_BUCKET;
    use ripple_storage::{MemoryStorage, StorageEngine};
    use tokio::sync::mpsc;

    use crate::events::EventNotifierConfig;

    const NODE: &str = "n1";

    /// Forwards frames to a channel and fails once `limit` frames were written
    struct CaptureSink {
        frames: mpsc::UnboundedSender<Bytes>,
        limit: usize,
        written: usize,
    }

    #[async_trait]
    impl ResponseSink for CaptureSink {
        async fn write_frame(&mut self, frame: Bytes) -> std::result::Result<(), SinkError> {
            if self.written >= self.limit {
                return Err(SinkError::Closed);
            }
            self.written += 1;
            self.frames.send(frame).map_err(|_| SinkError::Closed)
        }
    }

    fn capture(limit: usize) -> (CaptureSink, mpsc::UnboundedReceiver<Bytes>) {
        let (frames, rx) = mpsc::unbounded_channel();
        (
            CaptureSink {
                frames,
                limit,
                written: 0,
            },
            rx,
        )
    }

    async fn service_with(storage: Arc<dyn StorageEngine>) -> Arc<NotificationService> {
        storage.create_bucket("photos").await.unwrap();
        let notifier = Arc::new(EventNotifier::new(EventNotifierConfig {
            node_id: NODE.to_string(),
            ..Default::default()
        }));
        let handler = Arc::new(PeerHandler::new(notifier.clone(), Arc::new(LockTable::new())));
        let broadcaster = Arc::new(PeerBroadcaster::new(
            NODE,
            handler,
            Vec::new(),
            Arc::new(LoopbackTransport::new()),
            Duration::from_secs(1),
        ));
        Arc::new(NotificationService::new(
            ConfigStore::new(storage),
            notifier,
            broadcaster,
            Arc::new(LocalBucketLocker::new(Duration::from_secs(2))),
            Duration::from_millis(200),
        ))
    }

    async fn service() -> Arc<NotificationService> {
        service_with(Arc::new(MemoryStorage::new())).await
    }

    fn queue(arn: &str) -> NotificationConfiguration {
        NotificationConfiguration::new().add_queue(EventDescriptor::new(
            "1",
            arn,
            vec![EventType::ObjectCreatedAll],
            KeyFilter::new().with_suffix(".jpg"),
        ))
    }

    fn photo_request() -> ListenRequest {
        ListenRequest::from_query_pairs([
            ("prefix", "img/"),
            ("suffix", ".jpg"),
            ("events", "s3:ObjectCreated:*"),
        ])
    }

    fn put_event(key: &str) -> ObjectEvent {
        ObjectEvent::new(EventType::ObjectCreatedPut, "photos", key)
    }

    fn listener(id: &str, node: &str) -> ListenerConfig {
        ListenerConfig::new(
            EventDescriptor::new(
                "sns-1",
                format!("arn:ripple:sns:us-east-1:{}:listen", id),
                vec![EventType::ObjectCreatedAll],
                KeyFilter::new(),
            ),
            node,
        )
    }

    #[tokio::test]
    async fn test_notification_config_round_trip() {
        let svc = service().await;
        assert!(svc.get_notification_config("photos").await.unwrap().is_empty());

        let config = queue("arn:aws:sqs:us-east-1:1:q");
        svc.put_notification_config("photos", config.clone())
            .await
            .unwrap();

        assert_eq!(svc.get_notification_config("photos").await.unwrap(), config);
        assert_eq!(svc.notifier().notification_config("photos"), Some(config));
    }

    #[tokio::test]
    async fn test_put_notification_config_rejects_invalid() {
        let svc = service().await;

        let err = svc
            .put_notification_config("missing", queue("arn:aws:sqs:us-east-1:1:q"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchBucketNamed(_)));

        let err = svc
            .put_notification_config("photos", queue("not-an-arn"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArn(_)));
        assert!(svc.get_notification_config("photos").await.unwrap().is_empty());
        assert!(svc.notifier().notification_config("photos").is_none());
    }

    #[tokio::test]
    async fn test_delete_notification_config_clears_cache() {
        let svc = service().await;
        svc.put_notification_config("photos", queue("arn:aws:sqs:us-east-1:1:q"))
            .await
            .unwrap();
        svc.add_listener_config("photos", listener("a", "n2"))
            .await
            .unwrap();

        svc.delete_notification_config("photos").await.unwrap();
        assert!(svc.notifier().notification_config("photos").is_none());
        assert!(svc.notifier().listener_configs("photos").is_empty());

        // Nothing stored is fine
        svc.delete_notification_config("photos").await.unwrap();
    }

    #[tokio::test]
    async fn test_register_listener_validation() {
        let svc = service().await;

        let err = svc
            .register_listener("missing", &photo_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchBucketNamed(_)));

        let bad = ListenRequest::from_query_pairs([("events", "s3:Nope")]);
        let err = svc.register_listener("photos", &bad).await.unwrap_err();
        assert!(matches!(err, Error::InvalidEventName(_)));

        let none = ListenRequest::from_query_pairs([("prefix", "a")]);
        let err = svc.register_listener("photos", &none).await.unwrap_err();
        assert!(matches!(err, Error::MissingEvents));

        assert!(svc.notifier().listener_configs("photos").is_empty());
    }

    #[tokio::test]
    async fn test_listen_streams_matching_events_then_tears_down() {
        let svc = service().await;
        let session = svc.register_listener("photos", &photo_request()).await.unwrap();
        let destination_id = session.destination_id().to_string();
        assert!(destination_id.starts_with("arn:ripple:sns:"));
        assert_eq!(svc.notifier().listener_configs("photos").len(), 1);

        let (sink, mut frames) = capture(2);
        let run = tokio::spawn(session.run(sink));

        let summary = svc.notify_event(put_event("img/cat.jpg")).await;
        assert_eq!(summary.delivered, 1);
        assert_eq!(svc.notify_event(put_event("img/cat.png")).await.matched, 0);
        assert_eq!(svc.notify_event(put_event("doc/cat.jpg")).await.matched, 0);

        let first: EventMessage = serde_json::from_slice(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.records[0].s3.object.key, "img/cat.jpg");

        let second = frames.recv().await.unwrap();
        assert_eq!(&second[..], b"{\"Records\":[]}\r\n");

        assert_eq!(run.await.unwrap(), StreamEnd::ClientGone);
        assert!(!svc.notifier().has_listener(&destination_id));
        assert!(svc.notifier().listener_configs("photos").is_empty());
    }

    #[tokio::test]
    async fn test_start_listening_runs_to_completion() {
        let svc = service().await;
        let (sink, _frames) = capture(0);
        let end = svc
            .start_listening("photos", &photo_request(), sink)
            .await
            .unwrap();
        assert_eq!(end, StreamEnd::ClientGone);
        assert!(svc.notifier().listener_configs("photos").is_empty());
    }

    #[tokio::test]
    async fn test_dropped_session_is_torn_down() {
        let svc = service().await;
        let session = svc.register_listener("photos", &photo_request()).await.unwrap();
        let destination_id = session.destination_id().to_string();
        drop(session);

        for _ in 0..50 {
            if svc.notifier().listener_configs("photos").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(svc.notifier().listener_configs("photos").is_empty());
        assert!(!svc.notifier().has_listener(&destination_id));
    }

    #[tokio::test]
    async fn test_remove_unknown_listener_is_noop() {
        let svc = service().await;
        svc.add_listener_config("photos", listener("a", "n2"))
            .await
            .unwrap();

        assert!(!svc
            .remove_listener_config("photos", "arn:ripple:sns:us-east-1:zzz:listen")
            .await
            .unwrap());
        assert_eq!(svc.notifier().listener_configs("photos").len(), 1);

        let id = listener("a", "n2").destination_id().to_string();
        assert!(svc.remove_listener_config("photos", &id).await.unwrap());
        assert!(!svc.remove_listener_config("photos", &id).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_listener_adds_are_serialized() {
        let storage: Arc<dyn StorageEngine> = Arc::new(MemoryStorage::new().with_distributed(true));
        let svc = service_with(storage).await;

        let adds = (0..8).map(|i| {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.add_listener_config("photos", listener(&i.to_string(), "n2"))
                    .await
            })
        });
        for add in futures::future::join_all(adds).await {
            add.unwrap().unwrap();
        }

        assert_eq!(svc.store().load_listener_configs("photos").await.unwrap().len(), 8);
        assert_eq!(svc.notifier().listener_configs("photos").len(), 8);
    }

    #[tokio::test]
    async fn test_load_from_store_drops_stale_local_listeners() {
        let storage: Arc<dyn StorageEngine> = Arc::new(MemoryStorage::new().with_distributed(true));
        let svc = service_with(storage).await;
        let store = svc.store().clone();

        let config = queue("arn:aws:sqs:us-east-1:1:q");
        store.save_notification_config("photos", &config).await.unwrap();
        store
            .save_listener_configs("photos", &[listener("old", NODE), listener("live", "n2")])
            .await
            .unwrap();

        svc.load_from_store().await.unwrap();

        assert_eq!(svc.notifier().notification_config("photos"), Some(config));
        let expected = vec![listener("live", "n2")];
        assert_eq!(svc.notifier().listener_configs("photos"), expected);
        assert_eq!(store.load_listener_configs("photos").await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_load_from_store_skips_unreadable_bucket() {
        let storage: Arc<dyn StorageEngine> = Arc::new(MemoryStorage::new().with_distributed(true));
        let svc = service_with(storage.clone()).await;
        storage.create_bucket("alpha").await.unwrap();
        storage.create_bucket("zeta").await.unwrap();

        storage
            .put(
                META_BUCKET,
                "buckets/alpha/notification.xml",
                Bytes::from_static(b"<NotificationConfiguration><Queue"),
            )
            .await
            .unwrap();
        let config = queue("arn:aws:sqs:us-east-1:1:q");
        let store = svc.store().clone();
        store.save_notification_config("zeta", &config).await.unwrap();
        store
            .save_listener_configs("zeta", &[listener("live", "n2")])
            .await
            .unwrap();

        svc.load_from_store().await.unwrap();

        assert!(svc.notifier().notification_config("alpha").is_none());
        assert_eq!(svc.notifier().notification_config("zeta"), Some(config));
        assert_eq!(
            svc.notifier().listener_configs("zeta"),
            vec![listener("live", "n2")]
        );
    }

    #[tokio::test]
    async fn test_delete_bucket_removes_config_and_ends_streams() {
        let storage: Arc<dyn StorageEngine> = Arc::new(MemoryStorage::new().with_distributed(true));
        let svc = service_with(storage.clone()).await;
        svc.put_notification_config("photos", queue("arn:aws:sqs:us-east-1:1:q"))
            .await
            .unwrap();
        svc.add_listener_config("photos", listener("remote", "n2"))
            .await
            .unwrap();
        let session = svc.register_listener("photos", &photo_request()).await.unwrap();
        let (sink, _frames) = capture(usize::MAX);
        let run = tokio::spawn(session.run(sink));

        storage.put("photos", "k", Bytes::from_static(b"v")).await.unwrap();
        assert!(matches!(
            svc.delete_bucket("photos").await,
            Err(Error::BucketNotEmpty)
        ));
        assert_eq!(svc.notifier().listener_configs("photos").len(), 2);

        storage.delete("photos", "k").await.unwrap();
        svc.delete_bucket("photos").await.unwrap();
        assert_eq!(run.await.unwrap(), StreamEnd::ChannelClosed);

        storage.create_bucket("photos").await.unwrap();
        assert!(svc.store().load_notification_config("photos").await.unwrap().is_none());
        assert!(svc.store().load_listener_configs("photos").await.unwrap().is_empty());
        svc.load_from_store().await.unwrap();
        assert!(svc.notifier().listener_configs("photos").is_empty());
        assert!(svc.get_notification_config("photos").await.unwrap().is_empty());
    }
}
