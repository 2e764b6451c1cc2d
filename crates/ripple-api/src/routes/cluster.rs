//! Peer RPC endpoint

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ripple_cluster::PeerMessageHandler;
use ripple_core::types::PeerMessage;
use tracing::warn;

use crate::server::AppState;

/// POST /cluster/message - apply a message from a peer
pub async fn cluster_message(
    State(state): State<AppState>,
    Json(message): Json<PeerMessage>,
) -> Response {
    let kind = message.kind();
    match state.peer_handler.handle(message).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => {
            warn!("Peer message {} failed: {}", kind, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
