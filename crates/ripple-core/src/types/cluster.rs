//! Peer-to-peer message types

use serde::{Deserialize, Serialize};

use super::event::EventRecord;
use super::notification::{ListenerConfig, NotificationConfiguration};

/// Node identifier (the address clients and peers reach the node on)
pub type NodeId = String;

/// A peer node in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerNode {
    /// Node identifier, matched against `ListenerConfig::target_node`
    pub id: NodeId,
    /// Base URL of the node's peer endpoint, e.g. `http://10.0.0.2:9000`
    pub endpoint: String,
}

impl PeerNode {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Message types for peer communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Replace the cached notification configuration of a bucket.
    /// `None` drops it (bucket deleted).
    UpdateBucketNotification {
        bucket: String,
        config: Option<NotificationConfiguration>,
    },
    /// Replace the cached listener sequence of a bucket
    UpdateBucketListener {
        bucket: String,
        listeners: Vec<ListenerConfig>,
    },
    /// Deliver records to a destination held by the receiving node
    DeliverEvent {
        destination_id: String,
        records: Vec<EventRecord>,
    },
    /// Ask for a grant on a bucket lock
    LockAcquire {
        resource: String,
        lease_id: String,
        owner: NodeId,
        ttl_secs: u64,
    },
    /// Return a grant on a bucket lock
    LockRelease { resource: String, lease_id: String },
}

impl PeerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::UpdateBucketNotification { .. } => "update_bucket_notification",
            PeerMessage::UpdateBucketListener { .. } => "update_bucket_listener",
            PeerMessage::DeliverEvent { .. } => "deliver_event",
            PeerMessage::LockAcquire { .. } => "lock_acquire",
            PeerMessage::LockRelease { .. } => "lock_release",
        }
    }
}

/// Reply to a peer message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerReply {
    Ack,
    LockGranted { granted: bool },
}
