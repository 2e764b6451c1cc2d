//! Configuration for Ripple

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::PeerNode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RippleConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cluster: ClusterConfigSection,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RippleConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::InternalError(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::InternalError(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RIPPLE_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }
        if let Ok(port) = std::env::var("RIPPLE_PORT") {
            if let Ok(p) = port.parse() {
                config.server.port = p;
            }
        }
        if let Ok(region) = std::env::var("RIPPLE_REGION") {
            config.server.region = region;
        }
        if let Ok(dir) = std::env::var("RIPPLE_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("RIPPLE_LOG_LEVEL") {
            config.logging.level = level;
        }

        // Cluster from environment: RIPPLE_PEERS="id=http://host:port,..."
        if let Ok(id) = std::env::var("RIPPLE_NODE_ID") {
            config.cluster.node_id = Some(id);
        }
        if let Ok(addr) = std::env::var("RIPPLE_ADVERTISE_ADDRESS") {
            config.cluster.advertise_address = Some(addr);
        }
        if let Ok(peers) = std::env::var("RIPPLE_PEERS") {
            config.cluster.peers = parse_peer_list(&peers);
            config.cluster.enabled = !config.cluster.peers.is_empty();
        }

        if let Ok(secs) = std::env::var("RIPPLE_KEEP_ALIVE_SECS") {
            if let Ok(s) = secs.parse() {
                config.notify.keep_alive_secs = s;
            }
        }

        config
    }

    /// Address this node is known by to clients and peers
    pub fn node_address(&self) -> String {
        self.cluster
            .node_id
            .clone()
            .or_else(|| self.cluster.advertise_address.clone())
            .unwrap_or_else(|| {
                let host = match self.server.bind_address.as_str() {
                    "0.0.0.0" | "::" => default_node_name(),
                    addr => addr.to_string(),
                };
                format!("{}:{}", host, self.server.port)
            })
    }

    /// Whether configuration must be persisted for other nodes to recover
    pub fn is_multi_node(&self) -> bool {
        self.cluster.enabled && !self.cluster.peers.is_empty()
    }
}

/// Parse `id=endpoint` pairs separated by commas. A bare endpoint uses its
/// host:port as the id.
pub fn parse_peer_list(list: &str) -> Vec<PeerNode> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((id, endpoint)) => PeerNode::new(id.trim(), endpoint.trim()),
            None => {
                let id = entry
                    .trim_start_matches("http://")
                    .trim_start_matches("https://")
                    .trim_end_matches('/');
                PeerNode::new(id, entry)
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub region: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9000,
            region: crate::DEFAULT_REGION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Cluster Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfigSection {
    /// Enable cluster mode
    pub enabled: bool,
    /// This node's id (defaults to the advertise address)
    pub node_id: Option<String>,
    /// This node's advertised address (host:port)
    pub advertise_address: Option<String>,
    /// The other nodes of the cluster
    pub peers: Vec<PeerNode>,
    /// Per-peer timeout for broadcasts, in milliseconds
    pub peer_timeout_ms: u64,
    /// Give up acquiring a bucket lock after this many milliseconds
    pub lock_acquire_timeout_ms: u64,
    /// Lifetime of a lock grant held by a peer
    pub lock_ttl_secs: u64,
}

impl Default for ClusterConfigSection {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: None,
            advertise_address: None,
            peers: Vec::new(),
            peer_timeout_ms: 2_000,
            lock_acquire_timeout_ms: 10_000,
            lock_ttl_secs: 30,
        }
    }
}

impl ClusterConfigSection {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

/// Event delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Idle interval after which a streaming listener gets an empty frame
    pub keep_alive_secs: u64,
    /// Capacity of each destination's delivery channel
    pub channel_capacity: usize,
    /// How long dispatch waits on a full channel before dropping
    pub dispatch_timeout_ms: u64,
    /// Webhook destinations registered at startup
    pub webhooks: Vec<WebhookTargetConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 5,
            channel_capacity: 64,
            dispatch_timeout_ms: 100,
            webhooks: Vec::new(),
        }
    }
}

impl NotifyConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

/// A webhook destination, addressed in notification configurations by `arn`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTargetConfig {
    pub arn: String,
    pub endpoint: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_webhook_retries")]
    pub max_retries: u32,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_webhook_retries() -> u32 {
    3
}

fn default_webhook_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Fallback node name when no id or advertise address is configured
pub fn default_node_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "ripple-node".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RippleConfig::default();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.notify.keep_alive(), Duration::from_secs(5));
        assert!(!config.is_multi_node());
        assert!(config.node_address().ends_with(":9000"));
        assert!(!config.node_address().starts_with("0.0.0.0"));
    }

    #[test]
    fn test_partial_toml() {
        let config = RippleConfig::from_toml(
            r#"
[server]
port = 9100

[cluster]
enabled = true
advertise_address = "10.0.0.1:9100"
peers = [{ id = "10.0.0.2:9100", endpoint = "http://10.0.0.2:9100" }]

[[notify.webhooks]]
arn = "arn:ripple:sqs:us-east-1:1:webhook"
endpoint = "http://hooks.local/events"
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert!(config.is_multi_node());
        assert_eq!(config.node_address(), "10.0.0.1:9100");
        assert_eq!(config.cluster.peer_timeout_ms, 2_000);
        assert_eq!(config.notify.webhooks.len(), 1);
        assert_eq!(config.notify.webhooks[0].max_retries, 3);
    }

    #[test]
    fn test_parse_peer_list() {
        let peers = parse_peer_list("a=http://10.0.0.2:9000, http://10.0.0.3:9000/ ,");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0], PeerNode::new("a", "http://10.0.0.2:9000"));
        assert_eq!(peers[1].id, "10.0.0.3:9000");
    }
}
