//! HTTP route handlers

mod bucket;
mod cluster;
mod object;

pub use bucket::{bucket_delete_handler, bucket_get_handler, bucket_put_handler};
pub use cluster::cluster_message;
pub use object::{delete_object, get_object, head_object, put_object};

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use ripple_core::error::S3Error;
use ripple_core::Error;

pub(crate) const REQUEST_ID_HEADER: &str = "x-amz-request-id";

fn error_response(err: Error, resource: &str, request_id: &str) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = S3Error::from(err)
        .with_resource(resource)
        .with_request_id(request_id)
        .to_xml();

    (
        status,
        [
            ("content-type", "application/xml".to_string()),
            (REQUEST_ID_HEADER, request_id.to_string()),
        ],
        body,
    )
        .into_response()
}

fn xml_response(status: StatusCode, body: String, request_id: &str) -> Response {
    (
        status,
        [
            ("content-type", "application/xml".to_string()),
            (REQUEST_ID_HEADER, request_id.to_string()),
        ],
        body,
    )
        .into_response()
}

fn empty_response(status: StatusCode, request_id: &str) -> Response {
    (status, [(REQUEST_ID_HEADER, request_id.to_string())]).into_response()
}

/// Decoded query pairs, in order, with repeated keys kept
fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

fn has_query_key(pairs: &[(String, String)], key: &str) -> bool {
    pairs.iter().any(|(k, _)| k == key)
}

/// Client address as reported by a fronting proxy
fn source_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs_keep_repeats() {
        let pairs = query_pairs(Some("events=s3%3AObjectCreated%3A%2A&prefix=a&events=x&notification"));
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0], ("events".into(), "s3:ObjectCreated:*".into()));
        assert!(has_query_key(&pairs, "notification"));
        assert!(query_pairs(None).is_empty());
    }

    #[test]
    fn test_source_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(source_ip(&headers), "");
        headers.insert("x-forwarded-for", "10.1.1.1, 10.0.0.1".parse().unwrap());
        assert_eq!(source_ip(&headers), "10.1.1.1");
    }
}
