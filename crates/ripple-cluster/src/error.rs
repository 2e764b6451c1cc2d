//! Cluster error types

use thiserror::Error;

/// Result type for cluster operations
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Cluster-related errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Peer {0} did not answer in time")]
    Timeout(String),

    #[error("Timed out acquiring lock on {resource}")]
    LockTimeout { resource: String },

    #[error("Quorum not reached: needed {needed}, got {got}")]
    QuorumNotReached { needed: usize, got: usize },

    #[error("Unexpected reply from {peer}: {reply}")]
    UnexpectedReply { peer: String, reply: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Handler error: {0}")]
    Handler(#[from] ripple_core::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ClusterError> for ripple_core::Error {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::LockTimeout { resource } => ripple_core::Error::LockTimeout(resource),
            ClusterError::Handler(inner) => inner,
            other => ripple_core::Error::ClusterError(other.to_string()),
        }
    }
}
