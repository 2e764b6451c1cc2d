//! Transport layer for node-to-node messages
//!
//! Peers exchange JSON-encoded [`PeerMessage`]s over HTTP. Each node exposes
//! `POST /cluster/message` and answers with a [`PeerReply`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, warn};

use ripple_core::types::{NodeId, PeerMessage, PeerNode, PeerReply};

use crate::error::{ClusterError, ClusterResult};

/// Delivers a message to one peer and returns its reply
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, peer: &PeerNode, message: &PeerMessage) -> ClusterResult<PeerReply>;
}

/// Applies messages received from peers (and from the local node)
#[async_trait]
pub trait PeerMessageHandler: Send + Sync {
    async fn handle(&self, message: PeerMessage) -> ClusterResult<PeerReply>;
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Maximum retry attempts
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub retry_base_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// HTTP transport for peer messages
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Create a new transport with the given configuration
    pub fn new(config: TransportConfig) -> ClusterResult<Self> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClusterError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn message_url(peer: &PeerNode) -> String {
        format!("{}/cluster/message", peer.endpoint.trim_end_matches('/'))
    }

    /// Send a message with retry logic
    async fn send_with_retry(&self, url: &str, message: &PeerMessage) -> ClusterResult<PeerReply> {
        let mut last_error = None;
        let mut delay = self.config.retry_base_delay;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!("Retry attempt {} for {}", attempt, url);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            match self.send_once(url, message).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    warn!("Request to {} failed (attempt {}): {}", url, attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClusterError::Transport("Unknown error".to_string())))
    }

    /// Send a single request without retry
    async fn send_once(&self, url: &str, message: &PeerMessage) -> ClusterResult<PeerReply> {
        let response = self
            .client
            .post(url)
            .json(message)
            .send()
            .await
            .map_err(|e| ClusterError::NodeUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::Transport(format!(
                "Request failed with status {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn send(&self, peer: &PeerNode, message: &PeerMessage) -> ClusterResult<PeerReply> {
        let url = Self::message_url(peer);
        debug!("Sending {} to {}", message.kind(), peer.id);
        self.send_with_retry(&url, message).await
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .finish()
    }
}

/// In-process transport that hands messages straight to registered handlers.
///
/// Messages still go through a JSON round-trip so that everything sent
/// over it is also valid on the HTTP wire. Nodes can be marked down to
/// simulate partitions.
#[derive(Default)]
pub struct LoopbackTransport {
    handlers: RwLock<HashMap<NodeId, Arc<dyn PeerMessageHandler>>>,
    down: RwLock<HashSet<NodeId>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: impl Into<NodeId>, handler: Arc<dyn PeerMessageHandler>) {
        self.handlers.write().insert(node.into(), handler);
    }

    /// Make a node unreachable (or reachable again)
    pub fn set_down(&self, node: &str, down: bool) {
        let mut set = self.down.write();
        if down {
            set.insert(node.to_string());
        } else {
            set.remove(node);
        }
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn send(&self, peer: &PeerNode, message: &PeerMessage) -> ClusterResult<PeerReply> {
        if self.down.read().contains(&peer.id) {
            return Err(ClusterError::NodeUnreachable(peer.id.clone()));
        }
        let handler = self
            .handlers
            .read()
            .get(&peer.id)
            .cloned()
            .ok_or_else(|| ClusterError::NodeUnreachable(peer.id.clone()))?;

        let wire = serde_json::to_vec(message)?;
        let decoded: PeerMessage = serde_json::from_slice(&wire)?;
        handler.handle(decoded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl PeerMessageHandler for Counting {
        async fn handle(&self, _message: PeerMessage) -> ClusterResult<PeerReply> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(PeerReply::Ack)
        }
    }

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn test_message_url() {
        let peer = PeerNode::new("n2", "http://10.0.0.2:9000/");
        assert_eq!(
            HttpTransport::message_url(&peer),
            "http://10.0.0.2:9000/cluster/message"
        );
    }

    #[tokio::test]
    async fn test_loopback_routes_and_fails() {
        let transport = LoopbackTransport::new();
        let handler = Arc::new(Counting(AtomicUsize::new(0)));
        transport.register("n2", handler.clone());

        let peer = PeerNode::new("n2", "loopback://n2");
        let msg = PeerMessage::LockRelease {
            resource: "photos".into(),
            lease_id: "l1".into(),
        };
        assert_eq!(transport.send(&peer, &msg).await.unwrap(), PeerReply::Ack);

        transport.set_down("n2", true);
        assert!(matches!(
            transport.send(&peer, &msg).await,
            Err(ClusterError::NodeUnreachable(_))
        ));
        assert!(transport
            .send(&PeerNode::new("n9", "loopback://n9"), &msg)
            .await
            .is_err());
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
    }
}
