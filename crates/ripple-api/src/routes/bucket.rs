//! Bucket handlers: creation, deletion, notification configuration and
//! event listening

use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use ripple_core::{
    types::{ListenRequest, NotificationConfiguration},
    utils::{generate_request_id, validate_bucket_name},
    Error,
};
use tracing::{debug, error};

use super::{
    empty_response, error_response, has_query_key, query_pairs, xml_response, REQUEST_ID_HEADER,
};
use crate::notification::ChannelSink;
use crate::server::AppState;

/// GET /{bucket} - GetBucketNotification (`?notification`) or
/// ListenBucketNotification (`?events=...`)
pub async fn bucket_get_handler(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let request_id = generate_request_id();
    let pairs = query_pairs(query.as_deref());
    let resource = format!("/{}", bucket);

    if has_query_key(&pairs, "notification") {
        debug!("GetBucketNotification bucket={} request_id={}", bucket, request_id);
        return match get_notification_xml(&state, &bucket).await {
            Ok(xml) => xml_response(StatusCode::OK, xml, &request_id),
            Err(e) => error_response(e, &resource, &request_id),
        };
    }

    if has_query_key(&pairs, "events") {
        debug!("ListenBucketNotification bucket={} request_id={}", bucket, request_id);
        let request = ListenRequest::from_query_pairs(pairs);
        return listen(state, bucket, request, &request_id).await;
    }

    error_response(
        Error::NotImplemented("ListObjects".to_string()),
        &resource,
        &request_id,
    )
}

async fn get_notification_xml(state: &AppState, bucket: &str) -> ripple_core::Result<String> {
    state
        .notifications
        .get_notification_config(bucket)
        .await?
        .to_xml()
}

async fn listen(state: AppState, bucket: String, request: ListenRequest, request_id: &str) -> Response {
    let resource = format!("/{}", bucket);
    let session = match state
        .notifications
        .register_listener(&bucket, &request)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            debug!("Rejected listen request on {}: {}", bucket, e);
            return error_response(e, &resource, request_id);
        }
    };

    let (sink, body) = ChannelSink::pair();
    tokio::spawn(session.run(sink));

    (
        StatusCode::OK,
        [
            ("content-type", "application/json".to_string()),
            ("cache-control", "no-cache".to_string()),
            (REQUEST_ID_HEADER, request_id.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// PUT /{bucket} - CreateBucket or PutBucketNotification (`?notification`)
pub async fn bucket_put_handler(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let request_id = generate_request_id();
    let pairs = query_pairs(query.as_deref());
    let resource = format!("/{}", bucket);

    let result = if has_query_key(&pairs, "notification") {
        debug!("PutBucketNotification bucket={} request_id={}", bucket, request_id);
        put_notification(&state, &bucket, &body).await
    } else {
        debug!("CreateBucket bucket={} request_id={}", bucket, request_id);
        create_bucket(&state, &bucket).await
    };

    match result {
        Ok(()) => empty_response(StatusCode::OK, &request_id),
        Err(e) => {
            if e.http_status() >= 500 {
                error!("PUT {} failed: {}", resource, e);
            }
            error_response(e, &resource, &request_id)
        }
    }
}

async fn put_notification(state: &AppState, bucket: &str, body: &[u8]) -> ripple_core::Result<()> {
    let xml = std::str::from_utf8(body)
        .map_err(|e| Error::MalformedXML(format!("Body is not UTF-8: {}", e)))?;
    let config = NotificationConfiguration::from_xml(xml)?;
    state
        .notifications
        .put_notification_config(bucket, config)
        .await
}

async fn create_bucket(state: &AppState, bucket: &str) -> ripple_core::Result<()> {
    validate_bucket_name(bucket)?;
    state.storage.create_bucket(bucket).await
}

/// DELETE /{bucket} - DeleteBucket; drops the bucket's notification and
/// listener config
pub async fn bucket_delete_handler(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Response {
    let request_id = generate_request_id();
    let resource = format!("/{}", bucket);
    debug!("DeleteBucket bucket={} request_id={}", bucket, request_id);

    match state.notifications.delete_bucket(&bucket).await {
        Ok(()) => empty_response(StatusCode::NO_CONTENT, &request_id),
        Err(e) => error_response(e, &resource, &request_id),
    }
}
