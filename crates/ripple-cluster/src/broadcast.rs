//! Best-effort propagation of configuration changes to every node
//!
//! A broadcast is applied to the local node first, then sent to all peers
//! concurrently. Each peer send is bounded by its own timeout and fails
//! independently; failures are logged and counted but never returned to the
//! caller.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use tracing::{debug, warn};

use ripple_core::types::{NodeId, PeerMessage, PeerNode, PeerReply};

use crate::error::{ClusterError, ClusterResult};
use crate::transport::{PeerMessageHandler, PeerTransport};

pub const PEER_BROADCAST_FAILURES_TOTAL: &str = "ripple_peer_broadcast_failures_total";

/// Outcome of a broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Nodes that applied the message (the local node included)
    pub acked: Vec<NodeId>,
    /// Nodes that failed or timed out, with the reason
    pub failed: Vec<(NodeId, String)>,
}

impl BroadcastReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends peer messages to the local handler and to every configured peer
pub struct PeerBroadcaster {
    node_id: NodeId,
    local: Arc<dyn PeerMessageHandler>,
    peers: Vec<PeerNode>,
    transport: Arc<dyn PeerTransport>,
    peer_timeout: Duration,
}

impl PeerBroadcaster {
    pub fn new(
        node_id: impl Into<NodeId>,
        local: Arc<dyn PeerMessageHandler>,
        peers: Vec<PeerNode>,
        transport: Arc<dyn PeerTransport>,
        peer_timeout: Duration,
    ) -> Self {
        let node_id = node_id.into();
        // Never send to ourselves over the wire
        let peers = peers.into_iter().filter(|p| p.id != node_id).collect();
        Self {
            node_id,
            local,
            peers,
            transport,
            peer_timeout,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn peers(&self) -> &[PeerNode] {
        &self.peers
    }

    /// Apply `message` everywhere; peer failures are reported, not returned
    pub async fn broadcast(&self, message: PeerMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        match self.local.handle(message.clone()).await {
            Ok(_) => report.acked.push(self.node_id.clone()),
            Err(e) => {
                warn!("Local apply of {} failed: {}", message.kind(), e);
                report.failed.push((self.node_id.clone(), e.to_string()));
            }
        }

        let sends = self.peers.iter().map(|peer| {
            let message = &message;
            async move { (peer, self.send_to_peer(peer, message).await) }
        });

        for (peer, result) in join_all(sends).await {
            match result {
                Ok(_) => report.acked.push(peer.id.clone()),
                Err(e) => {
                    warn!("Failed to propagate {} to {}: {}", message.kind(), peer.id, e);
                    counter!(PEER_BROADCAST_FAILURES_TOTAL, "peer" => peer.id.clone())
                        .increment(1);
                    report.failed.push((peer.id.clone(), e.to_string()));
                }
            }
        }

        debug!(
            "Broadcast {} acked by {}/{} node(s)",
            message.kind(),
            report.acked.len(),
            self.peers.len() + 1
        );
        report
    }

    /// Send a message to a single node, which may be this one
    pub async fn send_to(&self, node_id: &str, message: PeerMessage) -> ClusterResult<PeerReply> {
        if node_id == self.node_id {
            return self.local.handle(message).await;
        }
        let peer = self
            .peers
            .iter()
            .find(|p| p.id == node_id)
            .ok_or_else(|| ClusterError::NodeUnreachable(format!("unknown node {}", node_id)))?;
        self.send_to_peer(peer, &message).await
    }

    async fn send_to_peer(&self, peer: &PeerNode, message: &PeerMessage) -> ClusterResult<PeerReply> {
        tokio::time::timeout(self.peer_timeout, self.transport.send(peer, message))
            .await
            .map_err(|_| ClusterError::Timeout(peer.id.clone()))?
    }
}
