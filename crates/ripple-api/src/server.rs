//! Ripple server implementation

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use ripple_cluster::{
    BucketLocker, HttpTransport, LocalBucketLocker, LockTable, PeerBroadcaster, PeerTransport,
    QuorumBucketLocker, TransportConfig,
};
use ripple_core::{config::RippleConfig, Error, Result};
use ripple_storage::{ConfigStore, LocalStorage, StorageEngine};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{info, warn};

use crate::events::{EventNotifier, EventNotifierConfig, WebhookTarget};
use crate::metrics::{metrics_handler, metrics_middleware, MetricsRecorder};
use crate::notification::{NotificationService, PeerEventForwarder, PeerHandler};
use crate::routes;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RippleConfig>,
    pub storage: Arc<dyn StorageEngine>,
    pub notifications: Arc<NotificationService>,
    pub peer_handler: Arc<PeerHandler>,
    pub metrics: Arc<MetricsRecorder>,
}

impl AppState {
    /// Wire the registry, peer handler, broadcaster, lock service and
    /// notification service of one node
    pub fn build(
        config: RippleConfig,
        storage: Arc<dyn StorageEngine>,
        transport: Arc<dyn PeerTransport>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let node_id = config.node_address();
        let notifier = Arc::new(EventNotifier::new(EventNotifierConfig {
            region: config.server.region.clone(),
            node_id: node_id.clone(),
            channel_capacity: config.notify.channel_capacity,
            dispatch_timeout: config.notify.dispatch_timeout(),
        }));

        let lock_table = Arc::new(LockTable::new());
        let peer_handler = Arc::new(PeerHandler::new(notifier.clone(), lock_table.clone()));
        let peers = if config.cluster.enabled {
            config.cluster.peers.clone()
        } else {
            Vec::new()
        };

        let broadcaster = Arc::new(PeerBroadcaster::new(
            node_id.clone(),
            peer_handler.clone(),
            peers.clone(),
            transport.clone(),
            config.cluster.peer_timeout(),
        ));
        notifier.set_forwarder(Arc::new(PeerEventForwarder::new(broadcaster.clone())));

        let locker: Arc<dyn BucketLocker> = if peers.is_empty() {
            Arc::new(LocalBucketLocker::new(config.cluster.lock_acquire_timeout()))
        } else {
            Arc::new(
                QuorumBucketLocker::new(node_id, peers, transport, lock_table)
                    .with_acquire_timeout(config.cluster.lock_acquire_timeout())
                    .with_peer_timeout(config.cluster.peer_timeout())
                    .with_ttl(config.cluster.lock_ttl()),
            )
        };

        let notifications = Arc::new(NotificationService::new(
            ConfigStore::new(storage.clone()),
            notifier,
            broadcaster,
            locker,
            config.notify.keep_alive(),
        ));

        Self {
            config: Arc::new(config),
            storage,
            notifications,
            peer_handler,
            metrics,
        }
    }

    /// Start a delivery worker for every configured webhook
    pub fn spawn_webhooks(&self) -> Result<()> {
        for webhook in &self.config.notify.webhooks {
            WebhookTarget::from_config(webhook)?.spawn(self.notifications.notifier())?;
        }
        Ok(())
    }
}

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    Router::new()
        // Metrics endpoint
        .route("/metrics", get(metrics_handler))
        // Peer RPC
        .route("/cluster/message", post(routes::cluster_message))
        // Bucket operations
        .route(
            "/{bucket}",
            get(routes::bucket_get_handler)
                .put(routes::bucket_put_handler)
                .delete(routes::bucket_delete_handler),
        )
        // Object operations
        .route(
            "/{bucket}/{*key}",
            get(routes::get_object)
                .head(routes::head_object)
                .put(routes::put_object)
                .delete(routes::delete_object),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().include_headers(false)))
        .with_state(state)
}

/// Ripple Server
pub struct RippleServer {
    config: RippleConfig,
}

impl RippleServer {
    pub fn new(config: RippleConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let metrics = Arc::new(MetricsRecorder::install()?);
        info!("Prometheus metrics initialized");

        let storage = LocalStorage::new(&self.config.storage.data_dir)
            .with_distributed(self.config.is_multi_node());
        storage.init().await?;

        let transport = HttpTransport::new(TransportConfig {
            timeout: self.config.cluster.peer_timeout(),
            ..Default::default()
        })?;

        let addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        let state = AppState::build(
            self.config,
            Arc::new(storage),
            Arc::new(transport),
            metrics,
        );
        state.spawn_webhooks()?;

        if let Err(e) = state.notifications.load_from_store().await {
            warn!("Failed to load notification state: {}", e);
        }

        let node = state.config.node_address();
        let peers = state.config.cluster.peers.len();
        let app = router(state);

        let listener = TcpListener::bind(&addr).await?;
        info!("Ripple node {} listening on http://{}", node, addr);
        if peers > 0 {
            info!("Cluster mode with {} peer(s)", peers);
        }
        info!("Prometheus metrics at http://{}/metrics", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::InternalError(format!("Server error: {}", e)))
    }
}
