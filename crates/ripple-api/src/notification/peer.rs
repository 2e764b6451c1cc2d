//! Peer message handling and cross-node event forwarding

use async_trait::async_trait;
use ripple_cluster::{ClusterResult, LockTable, PeerBroadcaster, PeerMessageHandler};
use ripple_core::types::{EventRecord, PeerMessage, PeerReply};
use ripple_core::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::events::{EventForwarder, EventNotifier};

/// Applies peer messages to this node's registry and lock table
pub struct PeerHandler {
    notifier: Arc<EventNotifier>,
    locks: Arc<LockTable>,
}

impl PeerHandler {
    pub fn new(notifier: Arc<EventNotifier>, locks: Arc<LockTable>) -> Self {
        Self { notifier, locks }
    }
}

#[async_trait]
impl PeerMessageHandler for PeerHandler {
    async fn handle(&self, message: PeerMessage) -> ClusterResult<PeerReply> {
        debug!("Handling peer message {}", message.kind());
        let reply = match message {
            PeerMessage::UpdateBucketNotification { bucket, config: None } => {
                self.notifier.remove_bucket(&bucket);
                PeerReply::Ack
            }
            PeerMessage::UpdateBucketNotification { bucket, config } => {
                self.notifier.set_notification_config(&bucket, config);
                PeerReply::Ack
            }
            PeerMessage::UpdateBucketListener { bucket, listeners } => {
                self.notifier.set_listener_configs(&bucket, listeners);
                PeerReply::Ack
            }
            PeerMessage::DeliverEvent {
                destination_id,
                records,
            } => {
                self.notifier.deliver_local(&destination_id, records).await;
                PeerReply::Ack
            }
            PeerMessage::LockAcquire {
                resource,
                lease_id,
                owner,
                ttl_secs,
            } => PeerReply::LockGranted {
                granted: self.locks.try_lock(
                    &resource,
                    &lease_id,
                    &owner,
                    Duration::from_secs(ttl_secs),
                ),
            },
            PeerMessage::LockRelease { resource, lease_id } => {
                self.locks.unlock(&resource, &lease_id);
                PeerReply::Ack
            }
        };
        Ok(reply)
    }
}

/// Forwards records for remotely held listeners as `DeliverEvent` messages
pub struct PeerEventForwarder {
    broadcaster: Arc<PeerBroadcaster>,
}

impl PeerEventForwarder {
    pub fn new(broadcaster: Arc<PeerBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl EventForwarder for PeerEventForwarder {
    async fn forward(
        &self,
        node: &str,
        destination_id: &str,
        records: Vec<EventRecord>,
    ) -> Result<()> {
        self.broadcaster
            .send_to(
                node,
                PeerMessage::DeliverEvent {
                    destination_id: destination_id.to_string(),
                    records,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventNotifierConfig;
    use ripple_core::types::{
        EventDescriptor, EventType, KeyFilter, ListenerConfig, NotificationConfiguration,
        ObjectEvent,
    };

    fn handler() -> (Arc<EventNotifier>, PeerHandler) {
        let notifier = Arc::new(EventNotifier::new(EventNotifierConfig::default()));
        let handler = PeerHandler::new(notifier.clone(), Arc::new(LockTable::new()));
        (notifier, handler)
    }

    #[tokio::test]
    async fn test_updates_registry() {
        let (notifier, handler) = handler();
        let listener = ListenerConfig::new(
            EventDescriptor::new("sns-1", "arn:a", vec![EventType::ObjectCreatedAll], KeyFilter::new()),
            "n2",
        );
        handler
            .handle(PeerMessage::UpdateBucketListener {
                bucket: "photos".into(),
                listeners: vec![listener.clone()],
            })
            .await
            .unwrap();
        assert_eq!(notifier.listener_configs("photos"), vec![listener]);

        let config = NotificationConfiguration::new().add_topic(EventDescriptor::new(
            "1",
            "arn:ripple:sns:us-east-1:1:topic",
            vec![EventType::ObjectRemovedAll],
            KeyFilter::new(),
        ));
        handler
            .handle(PeerMessage::UpdateBucketNotification {
                bucket: "photos".into(),
                config: Some(config.clone()),
            })
            .await
            .unwrap();
        assert_eq!(notifier.notification_config("photos"), Some(config));

        handler
            .handle(PeerMessage::UpdateBucketNotification {
                bucket: "photos".into(),
                config: None,
            })
            .await
            .unwrap();
        assert!(notifier.notification_config("photos").is_none());
        assert!(notifier.listener_configs("photos").is_empty());
    }

    #[tokio::test]
    async fn test_lock_messages() {
        let (_, handler) = handler();
        let acquire = |lease: &str| PeerMessage::LockAcquire {
            resource: "photos".into(),
            lease_id: lease.into(),
            owner: "n2".into(),
            ttl_secs: 30,
        };
        assert_eq!(
            handler.handle(acquire("l1")).await.unwrap(),
            PeerReply::LockGranted { granted: true }
        );
        assert_eq!(
            handler.handle(acquire("l2")).await.unwrap(),
            PeerReply::LockGranted { granted: false }
        );
        handler
            .handle(PeerMessage::LockRelease {
                resource: "photos".into(),
                lease_id: "l1".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            handler.handle(acquire("l2")).await.unwrap(),
            PeerReply::LockGranted { granted: true }
        );
    }

    #[tokio::test]
    async fn test_deliver_event_reaches_local_channel() {
        let (notifier, handler) = handler();
        let (tx, mut rx) = notifier.channel();
        notifier.add_listener("arn:a", tx).unwrap();

        let event = ObjectEvent::new(EventType::ObjectCreatedPut, "photos", "a.jpg");
        handler
            .handle(PeerMessage::DeliverEvent {
                destination_id: "arn:a".into(),
                records: vec![EventRecord::new(&event, "sns-1", "us-east-1", "n2")],
            })
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap()[0].s3.object.key, "a.jpg");
    }
}
