//! Ripple Cluster - peer propagation and bucket locking
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Ripple Cluster                       │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌──────────────────┐          ┌──────────────────────┐  │
//! │  │ PeerBroadcaster  │          │ QuorumBucketLocker   │  │
//! │  │                  │          │                      │  │
//! │  │ - Local apply    │          │ - Local mutex        │  │
//! │  │ - Peer fan-out   │          │ - Majority grants    │  │
//! │  │ - Per-peer       │          │ - TTL'd LockTable    │  │
//! │  │   timeouts       │          │                      │  │
//! │  └────────┬─────────┘          └──────────┬───────────┘  │
//! │           └───────────────┬───────────────┘              │
//! │                  ┌────────┴────────┐                     │
//! │                  │  PeerTransport  │                     │
//! │                  │ (HTTP/loopback) │                     │
//! │                  └─────────────────┘                     │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod broadcast;
mod error;
mod lock;
mod transport;

pub use broadcast::{BroadcastReport, PeerBroadcaster, PEER_BROADCAST_FAILURES_TOTAL};
pub use error::{ClusterError, ClusterResult};
pub use lock::{BucketLease, BucketLocker, LocalBucketLocker, LockTable, QuorumBucketLocker};
pub use transport::{
    HttpTransport, LoopbackTransport, PeerMessageHandler, PeerTransport, TransportConfig,
};

// Re-export types from core
pub use ripple_core::types::{NodeId, PeerMessage, PeerNode, PeerReply};
