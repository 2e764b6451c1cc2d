//! Bucket locks
//!
//! Mutating configuration workflows hold a bucket lock through persist and
//! broadcast. On a single node the lock is a per-bucket async mutex. In a
//! cluster the local mutex is taken first, then a majority of nodes must
//! grant the lease through their [`LockTable`]. Grants expire after a TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use ripple_core::types::{NodeId, PeerMessage, PeerNode, PeerReply};

use crate::error::{ClusterError, ClusterResult};
use crate::transport::PeerTransport;

/// Proof of holding a bucket lock. Dropping it releases the local mutex;
/// remote grants then lapse with their TTL.
#[derive(Debug)]
pub struct BucketLease {
    bucket: String,
    lease_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl BucketLease {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }
}

/// Mutual exclusion per bucket
#[async_trait]
pub trait BucketLocker: Send + Sync {
    async fn acquire(&self, bucket: &str) -> ClusterResult<BucketLease>;

    async fn release(&self, lease: BucketLease) -> ClusterResult<()>;
}

// ============================================================================
// Local locks
// ============================================================================

/// Per-bucket async mutex; buckets never block each other
pub struct LocalBucketLocker {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    acquire_timeout: Duration,
}

impl LocalBucketLocker {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    fn bucket_mutex(&self, bucket: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn lock_until(&self, bucket: &str, deadline: Instant) -> ClusterResult<BucketLease> {
        let mutex = self.bucket_mutex(bucket);
        let wait = deadline.saturating_duration_since(Instant::now());
        let guard = tokio::time::timeout(wait, mutex.lock_owned())
            .await
            .map_err(|_| ClusterError::LockTimeout {
                resource: bucket.to_string(),
            })?;

        Ok(BucketLease {
            bucket: bucket.to_string(),
            lease_id: Uuid::new_v4().to_string(),
            _guard: guard,
        })
    }

    fn unlock(&self, lease: BucketLease) {
        let bucket = lease.bucket.clone();
        drop(lease);

        // Forget mutexes nobody is waiting on
        let mut locks = self.locks.lock();
        if locks
            .get(&bucket)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            locks.remove(&bucket);
        }
    }
}

#[async_trait]
impl BucketLocker for LocalBucketLocker {
    async fn acquire(&self, bucket: &str) -> ClusterResult<BucketLease> {
        self.lock_until(bucket, Instant::now() + self.acquire_timeout)
            .await
    }

    async fn release(&self, lease: BucketLease) -> ClusterResult<()> {
        self.unlock(lease);
        Ok(())
    }
}

// ============================================================================
// Lock table
// ============================================================================

#[derive(Debug, Clone)]
struct LockEntry {
    lease_id: String,
    owner: NodeId,
    expires_at: Instant,
}

/// Grants held by this node on behalf of lock owners across the cluster
#[derive(Debug, Default)]
pub struct LockTable {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `resource` to `lease_id` unless a live grant for another lease
    /// exists. Re-requesting an owned lease refreshes its TTL.
    pub fn try_lock(&self, resource: &str, lease_id: &str, owner: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(resource) {
            if entry.lease_id != lease_id && entry.expires_at > now {
                debug!(
                    "Lock on {} held by {} (lease {}), refusing {}",
                    resource, entry.owner, entry.lease_id, owner
                );
                return false;
            }
        }

        entries.insert(
            resource.to_string(),
            LockEntry {
                lease_id: lease_id.to_string(),
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        true
    }

    /// Drop the grant if it belongs to `lease_id`
    pub fn unlock(&self, resource: &str, lease_id: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(resource) {
            Some(entry) if entry.lease_id == lease_id => {
                entries.remove(resource);
                true
            }
            _ => false,
        }
    }

    /// Owner of the live grant on `resource`, if any
    pub fn holder(&self, resource: &str) -> Option<NodeId> {
        self.entries
            .lock()
            .get(resource)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.owner.clone())
    }
}

// ============================================================================
// Quorum locks
// ============================================================================

/// Cluster-wide bucket lock backed by majority grants
pub struct QuorumBucketLocker {
    node_id: NodeId,
    peers: Vec<PeerNode>,
    transport: Arc<dyn PeerTransport>,
    table: Arc<LockTable>,
    local: LocalBucketLocker,
    acquire_timeout: Duration,
    peer_timeout: Duration,
    ttl: Duration,
}

impl QuorumBucketLocker {
    pub fn new(
        node_id: impl Into<NodeId>,
        peers: Vec<PeerNode>,
        transport: Arc<dyn PeerTransport>,
        table: Arc<LockTable>,
    ) -> Self {
        let node_id = node_id.into();
        let peers = peers.into_iter().filter(|p| p.id != node_id).collect();
        let acquire_timeout = Duration::from_secs(10);
        Self {
            node_id,
            peers,
            transport,
            table,
            local: LocalBucketLocker::new(acquire_timeout),
            acquire_timeout,
            peer_timeout: Duration::from_secs(2),
            ttl: Duration::from_secs(30),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self.local = LocalBucketLocker::new(timeout);
        self
    }

    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Grants needed out of all nodes, this one included
    pub fn quorum(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    async fn request_grants(&self, bucket: &str, lease_id: &str) -> usize {
        let mut granted = usize::from(self.table.try_lock(
            bucket,
            lease_id,
            &self.node_id,
            self.ttl,
        ));

        let message = PeerMessage::LockAcquire {
            resource: bucket.to_string(),
            lease_id: lease_id.to_string(),
            owner: self.node_id.clone(),
            ttl_secs: self.ttl.as_secs().max(1),
        };
        let requests = self.peers.iter().map(|peer| self.send(peer, &message));

        for (peer, result) in self.peers.iter().zip(join_all(requests).await) {
            match result {
                Ok(PeerReply::LockGranted { granted: true }) => granted += 1,
                Ok(PeerReply::LockGranted { granted: false }) => {
                    debug!("{} refused lock on {}", peer.id, bucket)
                }
                Ok(other) => warn!("Unexpected lock reply from {}: {:?}", peer.id, other),
                Err(e) => debug!("Lock request to {} failed: {}", peer.id, e),
            }
        }
        granted
    }

    /// Return grants on every node; unknown leases are ignored by the table
    async fn release_grants(&self, bucket: &str, lease_id: &str) {
        self.table.unlock(bucket, lease_id);

        let message = PeerMessage::LockRelease {
            resource: bucket.to_string(),
            lease_id: lease_id.to_string(),
        };
        let requests = self.peers.iter().map(|peer| self.send(peer, &message));
        for (peer, result) in self.peers.iter().zip(join_all(requests).await) {
            if let Err(e) = result {
                warn!("Failed to release lock on {} at {}: {}", bucket, peer.id, e);
            }
        }
    }

    async fn send(&self, peer: &PeerNode, message: &PeerMessage) -> ClusterResult<PeerReply> {
        tokio::time::timeout(self.peer_timeout, self.transport.send(peer, message))
            .await
            .map_err(|_| ClusterError::Timeout(peer.id.clone()))?
    }
}

#[async_trait]
impl BucketLocker for QuorumBucketLocker {
    async fn acquire(&self, bucket: &str) -> ClusterResult<BucketLease> {
        let deadline = Instant::now() + self.acquire_timeout;
        let lease = self.local.lock_until(bucket, deadline).await?;
        let needed = self.quorum();
        let mut backoff = Duration::from_millis(20);

        loop {
            let granted = self.request_grants(bucket, &lease.lease_id).await;
            if granted >= needed {
                debug!(
                    "Acquired lock on {} ({}/{} grants)",
                    bucket,
                    granted,
                    self.peers.len() + 1
                );
                return Ok(lease);
            }

            self.release_grants(bucket, &lease.lease_id).await;

            let jitter = Duration::from_millis(rand::rng().random_range(0..=backoff.as_millis() as u64));
            let pause = backoff + jitter;
            if Instant::now() + pause >= deadline {
                warn!(
                    "Giving up lock on {}: {} of {} grants needed",
                    bucket, granted, needed
                );
                self.local.unlock(lease);
                return Err(ClusterError::LockTimeout {
                    resource: bucket.to_string(),
                });
            }
            tokio::time::sleep(pause).await;
            backoff = (backoff * 2).min(Duration::from_millis(500));
        }
    }

    async fn release(&self, lease: BucketLease) -> ClusterResult<()> {
        self.release_grants(&lease.bucket, &lease.lease_id).await;
        self.local.unlock(lease);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackTransport, PeerMessageHandler};

    /// Answers lock messages from its own table
    struct TableHandler(Arc<LockTable>);

    #[async_trait]
    impl PeerMessageHandler for TableHandler {
        async fn handle(&self, message: PeerMessage) -> ClusterResult<PeerReply> {
            Ok(match message {
                PeerMessage::LockAcquire {
                    resource,
                    lease_id,
                    owner,
                    ttl_secs,
                } => PeerReply::LockGranted {
                    granted: self.0.try_lock(
                        &resource,
                        &lease_id,
                        &owner,
                        Duration::from_secs(ttl_secs),
                    ),
                },
                PeerMessage::LockRelease { resource, lease_id } => {
                    self.0.unlock(&resource, &lease_id);
                    PeerReply::Ack
                }
                _ => PeerReply::Ack,
            })
        }
    }

    fn cluster(ids: &[&str]) -> (Arc<LoopbackTransport>, Vec<PeerNode>, HashMap<String, Arc<LockTable>>) {
        let transport = Arc::new(LoopbackTransport::new());
        let mut tables = HashMap::new();
        let peers = ids
            .iter()
            .map(|id| {
                let table = Arc::new(LockTable::new());
                transport.register(*id, Arc::new(TableHandler(table.clone())));
                tables.insert(id.to_string(), table);
                PeerNode::new(*id, format!("loopback://{}", id))
            })
            .collect();
        (transport, peers, tables)
    }

    fn locker(
        id: &str,
        transport: &Arc<LoopbackTransport>,
        peers: &[PeerNode],
        tables: &HashMap<String, Arc<LockTable>>,
        timeout: Duration,
    ) -> QuorumBucketLocker {
        QuorumBucketLocker::new(id, peers.to_vec(), transport.clone(), tables[id].clone())
            .with_acquire_timeout(timeout)
            .with_peer_timeout(Duration::from_millis(100))
    }

    #[test]
    fn test_lock_table_ttl() {
        let table = LockTable::new();
        assert!(table.try_lock("photos", "a", "n1", Duration::from_secs(30)));
        assert!(!table.try_lock("photos", "b", "n2", Duration::from_secs(30)));
        assert!(table.try_lock("photos", "a", "n1", Duration::from_secs(30)));
        assert_eq!(table.holder("photos").as_deref(), Some("n1"));

        assert!(!table.unlock("photos", "b"));
        assert!(table.unlock("photos", "a"));
        assert!(table.try_lock("photos", "b", "n2", Duration::ZERO));
        // Zero TTL lapses immediately
        assert!(table.try_lock("photos", "c", "n3", Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_local_locker_serializes_same_bucket() {
        let locker = LocalBucketLocker::new(Duration::from_millis(50));
        let lease = locker.acquire("photos").await.unwrap();

        assert!(matches!(
            locker.acquire("photos").await,
            Err(ClusterError::LockTimeout { .. })
        ));
        let other = locker.acquire("docs").await.unwrap();

        locker.release(lease).await.unwrap();
        locker.release(other).await.unwrap();
        let again = locker.acquire("photos").await.unwrap();
        assert_eq!(again.bucket(), "photos");
    }

    #[tokio::test]
    async fn test_quorum_lock_excludes_other_nodes() {
        let (transport, peers, tables) = cluster(&["n1", "n2", "n3"]);
        let a = locker("n1", &transport, &peers, &tables, Duration::from_secs(1));
        let b = locker("n2", &transport, &peers, &tables, Duration::from_millis(150));
        assert_eq!(a.quorum(), 2);

        let lease = a.acquire("photos").await.unwrap();
        assert!(matches!(
            b.acquire("photos").await,
            Err(ClusterError::LockTimeout { .. })
        ));
        // The failed attempt must not leave partial grants behind
        assert_eq!(tables["n2"].holder("photos").as_deref(), Some("n1"));

        a.release(lease).await.unwrap();
        let lease = b.acquire("photos").await.unwrap();
        assert_eq!(tables["n3"].holder("photos").as_deref(), Some("n2"));
        b.release(lease).await.unwrap();
        assert!(tables["n1"].holder("photos").is_none());
    }

    #[tokio::test]
    async fn test_quorum_lock_survives_minority_failure() {
        let (transport, peers, tables) = cluster(&["n1", "n2", "n3"]);
        transport.set_down("n3", true);
        let a = locker("n1", &transport, &peers, &tables, Duration::from_millis(500));

        let lease = a.acquire("photos").await.unwrap();
        a.release(lease).await.unwrap();

        transport.set_down("n2", true);
        assert!(matches!(
            a.acquire("photos").await,
            Err(ClusterError::LockTimeout { .. })
        ));
    }
}
