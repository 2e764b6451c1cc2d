//! Object handlers. Every successful write, delete or read produces an
//! object event.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use ripple_core::{
    types::{EventType, ObjectEvent},
    utils::{generate_request_id, validate_bucket_name},
    Error,
};
use ripple_storage::md5_hex;
use tracing::debug;

use super::{empty_response, error_response, source_ip, REQUEST_ID_HEADER};
use crate::server::AppState;

const PRINCIPAL_HEADER: &str = "x-ripple-principal";

fn object_event(
    event_type: EventType,
    bucket: &str,
    key: &str,
    request_id: &str,
    headers: &HeaderMap,
) -> ObjectEvent {
    let principal = headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    ObjectEvent::new(event_type, bucket, key).with_request(request_id, principal, source_ip(headers))
}

/// Reject reserved names (the meta bucket included) before touching storage
async fn ensure_bucket(state: &AppState, bucket: &str) -> ripple_core::Result<()> {
    validate_bucket_name(bucket)?;
    if state.storage.bucket_exists(bucket).await? {
        Ok(())
    } else {
        Err(Error::NoSuchBucketNamed(bucket.to_string()))
    }
}

/// PUT /{bucket}/{key} - PutObject
pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = generate_request_id();
    let resource = format!("/{}/{}", bucket, key);
    debug!("PutObject bucket={} key={} request_id={}", bucket, key, request_id);

    if let Err(e) = ensure_bucket(&state, &bucket).await {
        return error_response(e, &resource, &request_id);
    }
    let size = body.len() as i64;
    let etag = match state.storage.put(&bucket, &key, body).await {
        Ok(etag) => etag,
        Err(e) => return error_response(e, &resource, &request_id),
    };

    let event = object_event(EventType::ObjectCreatedPut, &bucket, &key, &request_id, &headers)
        .with_object(size, etag.clone());
    state.notifications.notify_event(event).await;

    (
        StatusCode::OK,
        [
            ("etag", format!("\"{}\"", etag)),
            (REQUEST_ID_HEADER, request_id),
        ],
    )
        .into_response()
}

/// GET /{bucket}/{key} - GetObject
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let request_id = generate_request_id();
    let resource = format!("/{}/{}", bucket, key);
    debug!("GetObject bucket={} key={} request_id={}", bucket, key, request_id);

    if let Err(e) = ensure_bucket(&state, &bucket).await {
        return error_response(e, &resource, &request_id);
    }
    let data = match state.storage.get(&bucket, &key).await {
        Ok(data) => data,
        Err(e) => return error_response(e, &resource, &request_id),
    };

    let etag = md5_hex(&data);
    let event = object_event(EventType::ObjectAccessedGet, &bucket, &key, &request_id, &headers)
        .with_object(data.len() as i64, etag.clone());
    state.notifications.notify_event(event).await;

    (
        StatusCode::OK,
        [
            ("content-type", "application/octet-stream".to_string()),
            ("etag", format!("\"{}\"", etag)),
            (REQUEST_ID_HEADER, request_id),
        ],
        data,
    )
        .into_response()
}

/// HEAD /{bucket}/{key} - HeadObject
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let request_id = generate_request_id();
    let resource = format!("/{}/{}", bucket, key);

    if let Err(e) = ensure_bucket(&state, &bucket).await {
        return error_response(e, &resource, &request_id);
    }
    match state.storage.exists(&bucket, &key).await {
        Ok(true) => {}
        Ok(false) => return error_response(Error::NoSuchKey, &resource, &request_id),
        Err(e) => return error_response(e, &resource, &request_id),
    }

    let event = object_event(EventType::ObjectAccessedHead, &bucket, &key, &request_id, &headers);
    state.notifications.notify_event(event).await;

    empty_response(StatusCode::OK, &request_id)
}

/// DELETE /{bucket}/{key} - DeleteObject. Deleting a missing key succeeds
/// without an event.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let request_id = generate_request_id();
    let resource = format!("/{}/{}", bucket, key);
    debug!("DeleteObject bucket={} key={} request_id={}", bucket, key, request_id);

    if let Err(e) = ensure_bucket(&state, &bucket).await {
        return error_response(e, &resource, &request_id);
    }
    match state.storage.delete(&bucket, &key).await {
        Ok(()) => {
            let event =
                object_event(EventType::ObjectRemovedDelete, &bucket, &key, &request_id, &headers);
            state.notifications.notify_event(event).await;
        }
        Err(Error::NoSuchKey) => {}
        Err(e) => return error_response(e, &resource, &request_id),
    }

    empty_response(StatusCode::NO_CONTENT, &request_id)
}
