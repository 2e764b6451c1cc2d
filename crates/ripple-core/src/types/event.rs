//! Event types and the S3 event record format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

// ============================================================================
// Event Types
// ============================================================================

/// S3 event types a destination can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "s3:ObjectCreated:*")]
    ObjectCreatedAll,
    #[serde(rename = "s3:ObjectCreated:Put")]
    ObjectCreatedPut,
    #[serde(rename = "s3:ObjectCreated:Post")]
    ObjectCreatedPost,
    #[serde(rename = "s3:ObjectCreated:Copy")]
    ObjectCreatedCopy,
    #[serde(rename = "s3:ObjectCreated:CompleteMultipartUpload")]
    ObjectCreatedCompleteMultipartUpload,

    #[serde(rename = "s3:ObjectRemoved:*")]
    ObjectRemovedAll,
    #[serde(rename = "s3:ObjectRemoved:Delete")]
    ObjectRemovedDelete,

    #[serde(rename = "s3:ObjectAccessed:*")]
    ObjectAccessedAll,
    #[serde(rename = "s3:ObjectAccessed:Get")]
    ObjectAccessedGet,
    #[serde(rename = "s3:ObjectAccessed:Head")]
    ObjectAccessedHead,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::ObjectCreatedAll,
        EventType::ObjectCreatedPut,
        EventType::ObjectCreatedPost,
        EventType::ObjectCreatedCopy,
        EventType::ObjectCreatedCompleteMultipartUpload,
        EventType::ObjectRemovedAll,
        EventType::ObjectRemovedDelete,
        EventType::ObjectAccessedAll,
        EventType::ObjectAccessedGet,
        EventType::ObjectAccessedHead,
    ];

    /// Check if this (subscribed) event type covers `other` (produced).
    /// Wildcards cover every concrete type of their family.
    pub fn matches(&self, other: &EventType) -> bool {
        if self == other {
            return true;
        }

        match self {
            EventType::ObjectCreatedAll => matches!(
                other,
                EventType::ObjectCreatedPut
                    | EventType::ObjectCreatedPost
                    | EventType::ObjectCreatedCopy
                    | EventType::ObjectCreatedCompleteMultipartUpload
            ),
            EventType::ObjectRemovedAll => matches!(other, EventType::ObjectRemovedDelete),
            EventType::ObjectAccessedAll => matches!(
                other,
                EventType::ObjectAccessedGet | EventType::ObjectAccessedHead
            ),
            _ => false,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(
            self,
            EventType::ObjectCreatedAll | EventType::ObjectRemovedAll | EventType::ObjectAccessedAll
        )
    }

    /// Get event name for XML and JSON
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ObjectCreatedAll => "s3:ObjectCreated:*",
            EventType::ObjectCreatedPut => "s3:ObjectCreated:Put",
            EventType::ObjectCreatedPost => "s3:ObjectCreated:Post",
            EventType::ObjectCreatedCopy => "s3:ObjectCreated:Copy",
            EventType::ObjectCreatedCompleteMultipartUpload => {
                "s3:ObjectCreated:CompleteMultipartUpload"
            }
            EventType::ObjectRemovedAll => "s3:ObjectRemoved:*",
            EventType::ObjectRemovedDelete => "s3:ObjectRemoved:Delete",
            EventType::ObjectAccessedAll => "s3:ObjectAccessed:*",
            EventType::ObjectAccessedGet => "s3:ObjectAccessed:Get",
            EventType::ObjectAccessedHead => "s3:ObjectAccessed:Head",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|e| e.as_str() == s)
            .copied()
            .ok_or_else(|| Error::InvalidEventName(s.to_string()))
    }
}

/// Validate a single event name
pub fn validate_event(name: &str) -> crate::Result<EventType> {
    name.parse()
}

// ============================================================================
// Object Events
// ============================================================================

/// An object-level event produced by the write/delete path
#[derive(Debug, Clone)]
pub struct ObjectEvent {
    pub event_type: EventType,
    pub bucket: String,
    pub key: String,
    pub size: i64,
    pub etag: String,
    pub version_id: Option<String>,
    pub request_id: String,
    pub principal_id: String,
    pub source_ip: String,
}

impl ObjectEvent {
    pub fn new(event_type: EventType, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            event_type,
            bucket: bucket.into(),
            key: key.into(),
            size: 0,
            etag: String::new(),
            version_id: None,
            request_id: String::new(),
            principal_id: String::new(),
            source_ip: String::new(),
        }
    }

    pub fn with_object(mut self, size: i64, etag: impl Into<String>) -> Self {
        self.size = size;
        self.etag = etag.into();
        self
    }

    pub fn with_request(
        mut self,
        request_id: impl Into<String>,
        principal_id: impl Into<String>,
        source_ip: impl Into<String>,
    ) -> Self {
        self.request_id = request_id.into();
        self.principal_id = principal_id.into();
        self.source_ip = source_ip.into();
        self
    }
}

// ============================================================================
// Event Record (S3 Event Message Format)
// ============================================================================

/// S3 Event record (AWS-compatible format)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub event_version: String,
    pub event_source: String,
    pub aws_region: String,
    pub event_time: DateTime<Utc>,
    pub event_name: String,
    pub user_identity: UserIdentity,
    pub request_parameters: RequestParameters,
    pub response_elements: ResponseElements,
    pub s3: S3Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub principal_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    pub source_ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseElements {
    #[serde(rename = "x-amz-request-id")]
    pub x_amz_request_id: String,
    #[serde(rename = "x-ripple-origin-endpoint")]
    pub origin_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Info {
    pub s3_schema_version: String,
    pub configuration_id: String,
    pub bucket: S3BucketInfo,
    pub object: S3ObjectInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketInfo {
    pub name: String,
    pub owner_identity: UserIdentity,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3ObjectInfo {
    pub key: String,
    pub size: i64,
    pub e_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    pub sequencer: String,
}

impl EventRecord {
    /// Build the record delivered to one destination
    pub fn new(event: &ObjectEvent, config_id: &str, region: &str, origin: &str) -> Self {
        let now = Utc::now();
        Self {
            event_version: "2.0".to_string(),
            event_source: "ripple:s3".to_string(),
            aws_region: region.to_string(),
            event_time: now,
            event_name: event.event_type.to_string(),
            user_identity: UserIdentity {
                principal_id: event.principal_id.clone(),
            },
            request_parameters: RequestParameters {
                source_ip_address: event.source_ip.clone(),
            },
            response_elements: ResponseElements {
                x_amz_request_id: event.request_id.clone(),
                origin_endpoint: origin.to_string(),
            },
            s3: S3Info {
                s3_schema_version: "1.0".to_string(),
                configuration_id: config_id.to_string(),
                bucket: S3BucketInfo {
                    name: event.bucket.clone(),
                    owner_identity: UserIdentity {
                        principal_id: event.principal_id.clone(),
                    },
                    arn: format!("arn:aws:s3:::{}", event.bucket),
                },
                object: S3ObjectInfo {
                    key: event.key.clone(),
                    size: event.size,
                    e_tag: event.etag.clone(),
                    version_id: event.version_id.clone(),
                    sequencer: format!("{:016X}", now.timestamp_nanos_opt().unwrap_or(0)),
                },
            },
        }
    }
}

/// Event message envelope, one per streamed frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

impl EventMessage {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Self { records }
    }

    /// Empty message written as a keep-alive
    pub fn heartbeat() -> Self {
        Self::default()
    }

    pub fn is_heartbeat(&self) -> bool {
        self.records.is_empty()
    }
}
