//! Event Notifier
//!
//! Process-wide registry of delivery channels and cached per-bucket
//! configuration. Every node keeps the full listener and notification
//! configuration of every bucket, but a destination's channel only exists on
//! the node that holds its connection (or webhook worker). Events matching a
//! listener held elsewhere are forwarded to that node.

use async_trait::async_trait;
use futures::future::join_all;
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use ripple_core::types::{EventRecord, ListenerConfig, NotificationConfiguration, ObjectEvent};
use ripple_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tracing::{debug, warn};

use crate::metrics::names;

/// Sending half of a destination's delivery channel
pub type EventSender = mpsc::Sender<Vec<EventRecord>>;

/// Receiving half of a destination's delivery channel
pub type EventReceiver = mpsc::Receiver<Vec<EventRecord>>;

/// Batches queued per remote node before forwarding starts dropping
const FORWARD_QUEUE_DEPTH: usize = 1024;

type ForwardBatch = (String, Vec<EventRecord>);

/// Hands records to the node that holds a destination's channel
#[async_trait]
pub trait EventForwarder: Send + Sync {
    async fn forward(
        &self,
        node: &str,
        destination_id: &str,
        records: Vec<EventRecord>,
    ) -> Result<()>;
}

/// Event notifier configuration
#[derive(Debug, Clone)]
pub struct EventNotifierConfig {
    /// Region stamped on event records
    pub region: String,
    /// This node's id, compared against listener target nodes
    pub node_id: String,
    /// Capacity of each delivery channel
    pub channel_capacity: usize,
    /// How long an enqueue may wait on a full channel
    pub dispatch_timeout: Duration,
}

impl Default for EventNotifierConfig {
    fn default() -> Self {
        Self {
            region: ripple_core::DEFAULT_REGION.to_string(),
            node_id: "local".to_string(),
            channel_capacity: 64,
            dispatch_timeout: Duration::from_millis(100),
        }
    }
}

/// Outcome of dispatching one object event
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Descriptors matching the event
    pub matched: usize,
    /// Batches enqueued on local channels
    pub delivered: usize,
    /// Batches dropped on full or closed local channels
    pub dropped: usize,
    /// Batches handed to other nodes
    pub forwarded: usize,
}

enum Route {
    Local(EventSender),
    Remote(String),
}

/// Event notifier registry
pub struct EventNotifier {
    config: EventNotifierConfig,
    targets: RwLock<HashMap<String, EventSender>>,
    listeners: RwLock<HashMap<String, Vec<ListenerConfig>>>,
    notifications: RwLock<HashMap<String, NotificationConfiguration>>,
    forwarder: RwLock<Option<Arc<dyn EventForwarder>>>,
    /// One ordered queue per remote node, drained by a single worker
    forward_queues: Mutex<HashMap<String, mpsc::Sender<ForwardBatch>>>,
}

impl EventNotifier {
    pub fn new(config: EventNotifierConfig) -> Self {
        Self {
            config,
            targets: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            notifications: RwLock::new(HashMap::new()),
            forwarder: RwLock::new(None),
            forward_queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EventNotifierConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Install the forwarder used for listeners held by other nodes
    pub fn set_forwarder(&self, forwarder: Arc<dyn EventForwarder>) {
        *self.forwarder.write() = Some(forwarder);
        // Workers hold the previous forwarder
        self.forward_queues.lock().clear();
    }

    /// New bounded delivery channel sized from the configuration
    pub fn channel(&self) -> (EventSender, EventReceiver) {
        mpsc::channel(self.config.channel_capacity.max(1))
    }

    // ------------------------------------------------------------------
    // Destination channels
    // ------------------------------------------------------------------

    /// Register a delivery channel for a destination
    pub fn add_listener(&self, destination_id: &str, sender: EventSender) -> Result<()> {
        let mut targets = self.targets.write();
        if targets.contains_key(destination_id) {
            return Err(Error::DestinationConflict(destination_id.to_string()));
        }
        targets.insert(destination_id.to_string(), sender);
        gauge!(names::ACTIVE_LISTENERS).set(targets.len() as f64);
        debug!("Registered destination {}", destination_id);
        Ok(())
    }

    /// Unregister a destination's channel. Removing an unknown destination is
    /// a no-op.
    pub fn remove_listener(&self, destination_id: &str) -> bool {
        let mut targets = self.targets.write();
        let removed = targets.remove(destination_id).is_some();
        if removed {
            gauge!(names::ACTIVE_LISTENERS).set(targets.len() as f64);
            debug!("Unregistered destination {}", destination_id);
        }
        removed
    }

    pub fn has_listener(&self, destination_id: &str) -> bool {
        self.targets.read().contains_key(destination_id)
    }

    // ------------------------------------------------------------------
    // Cached configuration
    // ------------------------------------------------------------------

    pub fn listener_configs(&self, bucket: &str) -> Vec<ListenerConfig> {
        self.listeners
            .read()
            .get(bucket)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_listener_configs(&self, bucket: &str, listeners: Vec<ListenerConfig>) {
        let mut cache = self.listeners.write();
        if listeners.is_empty() {
            cache.remove(bucket);
        } else {
            cache.insert(bucket.to_string(), listeners);
        }
    }

    pub fn notification_config(&self, bucket: &str) -> Option<NotificationConfiguration> {
        self.notifications.read().get(bucket).cloned()
    }

    /// Replace the cached notification configuration; `None` or an empty
    /// configuration clears it
    pub fn set_notification_config(&self, bucket: &str, config: Option<NotificationConfiguration>) {
        let mut cache = self.notifications.write();
        match config {
            Some(config) if !config.is_empty() => {
                cache.insert(bucket.to_string(), config);
            }
            _ => {
                cache.remove(bucket);
            }
        }
    }

    /// Forget everything cached for a bucket and close the channels of its
    /// listeners held here, ending their sessions
    pub fn remove_bucket(&self, bucket: &str) {
        self.notifications.write().remove(bucket);
        let listeners = self.listeners.write().remove(bucket).unwrap_or_default();
        for listener in &listeners {
            self.remove_listener(listener.destination_id());
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Deliver an object event to every matching destination
    pub async fn dispatch(&self, event: &ObjectEvent) -> DispatchSummary {
        let routes = self.route(event);
        let mut summary = DispatchSummary {
            matched: routes.len(),
            ..Default::default()
        };

        if routes.is_empty() {
            debug!(
                "No matching destinations for {} on {}/{}",
                event.event_type, event.bucket, event.key
            );
            return summary;
        }

        let mut local = Vec::new();
        for (destination_id, record, route) in routes {
            match route {
                Route::Local(sender) => local.push((destination_id, sender, vec![record])),
                Route::Remote(node) => {
                    if self.queue_forward(node, destination_id, vec![record]) {
                        summary.forwarded += 1;
                    }
                }
            }
        }

        let sends = local
            .into_iter()
            .map(|(destination_id, sender, records)| async move {
                self.enqueue(&destination_id, &sender, records).await
            });
        for delivered in join_all(sends).await {
            if delivered {
                summary.delivered += 1;
            } else {
                summary.dropped += 1;
            }
        }

        debug!(
            "Dispatched {} on {}/{}: {:?}",
            event.event_type, event.bucket, event.key, summary
        );
        summary
    }

    /// Deliver records forwarded from another node to a local channel
    pub async fn deliver_local(&self, destination_id: &str, records: Vec<EventRecord>) -> bool {
        let sender = self.targets.read().get(destination_id).cloned();
        match sender {
            Some(sender) => self.enqueue(destination_id, &sender, records).await,
            None => {
                debug!("No local channel for forwarded destination {}", destination_id);
                false
            }
        }
    }

    /// Collect matching destinations and where to deliver them. Locks are
    /// released before any send.
    fn route(&self, event: &ObjectEvent) -> Vec<(String, EventRecord, Route)> {
        let targets = self.targets.read();
        let mut routes = Vec::new();
        let record = |config_id: &str| {
            EventRecord::new(event, config_id, &self.config.region, &self.config.node_id)
        };

        if let Some(config) = self.notifications.read().get(&event.bucket) {
            for descriptor in config.matching(&event.event_type, &event.key) {
                match targets.get(&descriptor.destination_id) {
                    Some(sender) => routes.push((
                        descriptor.destination_id.clone(),
                        record(&descriptor.id),
                        Route::Local(sender.clone()),
                    )),
                    None => debug!(
                        "Destination {} is not registered on this node",
                        descriptor.destination_id
                    ),
                }
            }
        }

        if let Some(listeners) = self.listeners.read().get(&event.bucket) {
            for listener in listeners
                .iter()
                .filter(|l| l.descriptor.matches(&event.event_type, &event.key))
            {
                let destination_id = listener.destination_id().to_string();
                let route = match targets.get(&destination_id) {
                    Some(sender) => Route::Local(sender.clone()),
                    None if listener.target_node != self.config.node_id => {
                        Route::Remote(listener.target_node.clone())
                    }
                    None => continue,
                };
                routes.push((destination_id, record(&listener.descriptor.id), route));
            }
        }

        routes
    }

    /// Enqueue with a bounded wait; full or closed channels drop the batch
    async fn enqueue(&self, destination_id: &str, sender: &EventSender, records: Vec<EventRecord>) -> bool {
        let count = records.len() as u64;
        match sender.send_timeout(records, self.config.dispatch_timeout).await {
            Ok(()) => {
                counter!(names::EVENTS_DISPATCHED_TOTAL).increment(count);
                true
            }
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    "Dropping {} event(s) for {}: consumer did not keep up",
                    count, destination_id
                );
                counter!(names::EVENTS_DROPPED_TOTAL, "reason" => "timeout").increment(count);
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!("Dropping {} event(s) for closed destination {}", count, destination_id);
                counter!(names::EVENTS_DROPPED_TOTAL, "reason" => "closed").increment(count);
                false
            }
        }
    }

    /// Queue records for a remote node. Batches for the same node are
    /// forwarded in dispatch order.
    fn queue_forward(&self, node: String, destination_id: String, records: Vec<EventRecord>) -> bool {
        let Some(forwarder) = self.forwarder.read().clone() else {
            debug!(
                "No forwarder installed, skipping {} held by {}",
                destination_id, node
            );
            return false;
        };

        let count = records.len() as u64;
        let mut queues = self.forward_queues.lock();
        let batch = (destination_id, records);
        let sent = match queues.get(&node) {
            Some(queue) => queue.try_send(batch),
            None => Err(TrySendError::Closed(batch)),
        };
        let sent = match sent {
            Err(TrySendError::Closed(batch)) => {
                let queue = self.spawn_forward_worker(&node, forwarder);
                let sent = queue.try_send(batch);
                queues.insert(node.clone(), queue);
                sent
            }
            other => other,
        };

        match sent {
            Ok(()) => true,
            Err(TrySendError::Full((destination_id, _)))
            | Err(TrySendError::Closed((destination_id, _))) => {
                warn!(
                    "Dropping {} event(s) for {}: forward queue to {} is unavailable",
                    count, destination_id, node
                );
                counter!(names::EVENTS_DROPPED_TOTAL, "reason" => "forward").increment(count);
                false
            }
        }
    }

    fn spawn_forward_worker(
        &self,
        node: &str,
        forwarder: Arc<dyn EventForwarder>,
    ) -> mpsc::Sender<ForwardBatch> {
        let (sender, mut receiver) = mpsc::channel::<ForwardBatch>(FORWARD_QUEUE_DEPTH);
        let node = node.to_string();
        debug!("Starting forward worker for {}", node);

        tokio::spawn(async move {
            while let Some((destination_id, records)) = receiver.recv().await {
                let count = records.len() as u64;
                match forwarder.forward(&node, &destination_id, records).await {
                    Ok(()) => counter!(names::EVENTS_FORWARDED_TOTAL).increment(count),
                    Err(e) => {
                        warn!("Failed to forward event for {} to {}: {}", destination_id, node, e);
                        counter!(names::EVENTS_DROPPED_TOTAL, "reason" => "forward")
                            .increment(count);
                    }
                }
            }
            debug!("Forward worker for {} stopped", node);
        });
        sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::types::{EventDescriptor, EventType, KeyFilter};

    fn notifier() -> EventNotifier {
        EventNotifier::new(EventNotifierConfig {
            node_id: "n1".into(),
            channel_capacity: 1,
            dispatch_timeout: Duration::from_millis(20),
            ..Default::default()
        })
    }

    fn listener(arn: &str, node: &str, filter: KeyFilter) -> ListenerConfig {
        ListenerConfig::new(
            EventDescriptor::new("sns-1", arn, vec![EventType::ObjectCreatedAll], filter),
            node,
        )
    }

    fn put(bucket: &str, key: &str) -> ObjectEvent {
        ObjectEvent::new(EventType::ObjectCreatedPut, bucket, key)
    }

    #[derive(Default)]
    struct RecordingForwarder(Mutex<Vec<(String, String, usize)>>);

    /// Records forwarded keys; the first call stalls before recording
    #[derive(Default)]
    struct StallingForwarder {
        calls: std::sync::atomic::AtomicUsize,
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventForwarder for StallingForwarder {
        async fn forward(
            &self,
            _node: &str,
            _destination_id: &str,
            records: Vec<EventRecord>,
        ) -> Result<()> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.keys
                .lock()
                .extend(records.into_iter().map(|r| r.s3.object.key));
            Ok(())
        }
    }

    #[async_trait]
    impl EventForwarder for RecordingForwarder {
        async fn forward(
            &self,
            node: &str,
            destination_id: &str,
            records: Vec<EventRecord>,
        ) -> Result<()> {
            self.0
                .lock()
                .push((node.to_string(), destination_id.to_string(), records.len()));
            Ok(())
        }
    }

    #[test]
    fn test_add_listener_conflict_and_idempotent_remove() {
        let notifier = notifier();
        let (tx, _rx) = notifier.channel();
        notifier.add_listener("arn:a", tx.clone()).unwrap();
        assert!(matches!(
            notifier.add_listener("arn:a", tx),
            Err(Error::DestinationConflict(_))
        ));

        assert!(notifier.remove_listener("arn:a"));
        assert!(!notifier.remove_listener("arn:a"));
        assert!(!notifier.has_listener("arn:a"));
    }

    #[tokio::test]
    async fn test_dispatch_to_matching_listener() {
        let notifier = notifier();
        let (tx, mut rx) = notifier.channel();
        notifier.add_listener("arn:l1", tx).unwrap();
        notifier.set_listener_configs(
            "photos",
            vec![listener("arn:l1", "n1", KeyFilter::new().with_suffix(".jpg"))],
        );

        let summary = notifier.dispatch(&put("photos", "a.jpg")).await;
        assert_eq!(summary.delivered, 1);
        let records = rx.recv().await.unwrap();
        assert_eq!(records[0].s3.object.key, "a.jpg");
        assert_eq!(records[0].s3.configuration_id, "sns-1");

        let summary = notifier.dispatch(&put("photos", "a.png")).await;
        assert_eq!(summary, DispatchSummary::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notification_config_destination() {
        let notifier = notifier();
        let (tx, mut rx) = notifier.channel();
        notifier.add_listener("arn:ripple:sqs:us-east-1:1:hook", tx).unwrap();
        notifier.set_notification_config(
            "docs",
            Some(NotificationConfiguration::new().add_queue(EventDescriptor::new(
                "cfg-1",
                "arn:ripple:sqs:us-east-1:1:hook",
                vec![EventType::ObjectRemovedAll],
                KeyFilter::new(),
            ))),
        );

        assert_eq!(notifier.dispatch(&put("docs", "x")).await.matched, 0);
        let removed = ObjectEvent::new(EventType::ObjectRemovedDelete, "docs", "x");
        assert_eq!(notifier.dispatch(&removed).await.delivered, 1);
        assert_eq!(rx.recv().await.unwrap()[0].s3.configuration_id, "cfg-1");

        notifier.set_notification_config("docs", None);
        assert!(notifier.notification_config("docs").is_none());
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking_others() {
        let notifier = notifier();
        let (slow_tx, _slow_rx) = notifier.channel();
        let (fast_tx, mut fast_rx) = notifier.channel();
        notifier.add_listener("arn:slow", slow_tx).unwrap();
        notifier.add_listener("arn:fast", fast_tx).unwrap();
        notifier.set_listener_configs(
            "photos",
            vec![
                listener("arn:slow", "n1", KeyFilter::new()),
                listener("arn:fast", "n1", KeyFilter::new()),
            ],
        );

        let first = notifier.dispatch(&put("photos", "1")).await;
        assert_eq!(first.delivered, 2);
        fast_rx.recv().await.unwrap();

        // Slow consumer never reads; its capacity-1 channel is full now
        let second = notifier.dispatch(&put("photos", "2")).await;
        assert_eq!(second.delivered, 1);
        assert_eq!(second.dropped, 1);
        assert_eq!(fast_rx.recv().await.unwrap()[0].s3.object.key, "2");
    }

    #[tokio::test]
    async fn test_remote_listener_is_forwarded() {
        let notifier = notifier();
        let forwarder = Arc::new(RecordingForwarder::default());
        notifier.set_forwarder(forwarder.clone());
        notifier.set_listener_configs(
            "photos",
            vec![
                listener("arn:remote", "n2", KeyFilter::new()),
                listener("arn:stale", "n1", KeyFilter::new()),
            ],
        );

        let summary = notifier.dispatch(&put("photos", "a")).await;
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.forwarded, 1);

        for _ in 0..50 {
            if !forwarder.0.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            forwarder.0.lock().as_slice(),
            &[("n2".to_string(), "arn:remote".to_string(), 1)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_forwarded_events_keep_dispatch_order() {
        let notifier = notifier();
        let forwarder = Arc::new(StallingForwarder::default());
        notifier.set_forwarder(forwarder.clone());
        notifier.set_listener_configs(
            "photos",
            vec![listener("arn:remote", "n2", KeyFilter::new())],
        );

        for key in ["e1", "e2", "e3"] {
            assert_eq!(notifier.dispatch(&put("photos", key)).await.forwarded, 1);
        }

        for _ in 0..100 {
            if forwarder.keys.lock().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(forwarder.keys.lock().as_slice(), &["e1", "e2", "e3"]);
    }

    #[tokio::test]
    async fn test_deliver_local() {
        let notifier = notifier();
        assert!(!notifier.deliver_local("arn:x", vec![]).await);

        let (tx, mut rx) = notifier.channel();
        notifier.add_listener("arn:x", tx).unwrap();
        let record = EventRecord::new(&put("photos", "k"), "sns-1", "us-east-1", "n2");
        assert!(notifier.deliver_local("arn:x", vec![record]).await);
        assert_eq!(rx.recv().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_maintenance() {
        let notifier = notifier();
        let (tx, mut rx) = notifier.channel();
        notifier.add_listener("arn:a", tx).unwrap();
        notifier.set_listener_configs("photos", vec![listener("arn:a", "n1", KeyFilter::new())]);
        assert_eq!(notifier.listener_configs("photos").len(), 1);

        notifier.remove_bucket("photos");
        assert!(notifier.listener_configs("photos").is_empty());
        assert!(notifier.notification_config("photos").is_none());
        assert!(!notifier.has_listener("arn:a"));
        assert!(rx.recv().await.is_none());
    }
}
