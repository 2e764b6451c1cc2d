//! Error types for Ripple

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Bucket Errors
    #[error("The specified bucket does not exist")]
    NoSuchBucket,

    #[error("The specified bucket does not exist: {0}")]
    NoSuchBucketNamed(String),

    #[error("The bucket you tried to delete is not empty")]
    BucketNotEmpty,

    #[error("The requested bucket name is not available")]
    BucketAlreadyExists,

    #[error("Invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("The specified key does not exist")]
    NoSuchKey,

    // Validation Errors
    #[error("Filter rule name must be either prefix or suffix: {0}")]
    InvalidFilterName(String),

    #[error("Invalid filter value: {0}")]
    InvalidFilterValue(String),

    #[error("The event name is not recognized: {0}")]
    InvalidEventName(String),

    #[error("At least one event must be specified")]
    MissingEvents,

    #[error("Destination is configured more than once: {0}")]
    DuplicateDestination(String),

    #[error("Invalid destination ARN: {0}")]
    InvalidArn(String),

    #[error("Malformed XML: {0}")]
    MalformedXML(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Registry Errors
    #[error("A listener is already registered for destination {0}")]
    DestinationConflict(String),

    // Storage Errors
    #[error("Storage backend error: {0}")]
    StorageError(String),

    // Cluster Errors
    #[error("Timed out acquiring lock on bucket {0}")]
    LockTimeout(String),

    #[error("Cluster error: {0}")]
    ClusterError(String),

    // Internal Errors
    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::NoSuchBucket | Error::NoSuchBucketNamed(_) => "NoSuchBucket",
            Error::BucketNotEmpty => "BucketNotEmpty",
            Error::BucketAlreadyExists => "BucketAlreadyExists",
            Error::InvalidBucketName(_) => "InvalidBucketName",
            Error::NoSuchKey => "NoSuchKey",
            Error::InvalidFilterName(_) => "InvalidFilterName",
            Error::InvalidFilterValue(_) => "InvalidFilterValue",
            Error::InvalidEventName(_) => "InvalidEventName",
            Error::MissingEvents => "InvalidArgument",
            Error::DuplicateDestination(_) => "OverlappingConfigs",
            Error::InvalidArn(_) => "InvalidArgument",
            Error::MalformedXML(_) => "MalformedXML",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::DestinationConflict(_) => "OperationAborted",
            Error::StorageError(_) => "InternalError",
            Error::LockTimeout(_) => "SlowDown",
            Error::ClusterError(_) => "InternalError",
            Error::InternalError(_) => "InternalError",
            Error::NotImplemented(_) => "NotImplemented",
            Error::Io(_) => "InternalError",
            Error::Other(_) => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidFilterName(_)
            | Error::InvalidFilterValue(_)
            | Error::InvalidEventName(_)
            | Error::MissingEvents
            | Error::DuplicateDestination(_)
            | Error::InvalidArn(_)
            | Error::MalformedXML(_)
            | Error::InvalidArgument(_)
            | Error::InvalidBucketName(_) => 400,

            Error::NoSuchBucket | Error::NoSuchBucketNamed(_) | Error::NoSuchKey => 404,

            Error::DestinationConflict(_) | Error::BucketNotEmpty | Error::BucketAlreadyExists => {
                409
            }

            Error::NotImplemented(_) => 501,

            Error::LockTimeout(_) => 503,

            _ => 500,
        }
    }

    /// Whether this error was caused by the request contents rather than the
    /// server state.
    pub fn is_validation(&self) -> bool {
        self.http_status() == 400
    }
}

/// S3 Error Response
#[derive(Debug, Clone)]
pub struct S3Error {
    pub code: String,
    pub message: String,
    pub resource: Option<String>,
    pub request_id: String,
}

impl From<Error> for S3Error {
    fn from(err: Error) -> Self {
        S3Error {
            code: err.code().to_string(),
            message: err.to_string(),
            resource: None,
            request_id: String::new(),
        }
    }
}

impl S3Error {
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn to_xml(&self) -> String {
        let resource = self.resource.as_deref().unwrap_or("");
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
<Code>{}</Code>
<Message>{}</Message>
<Resource>{}</Resource>
<RequestId>{}</RequestId>
</Error>"#,
            crate::utils::xml_escape(&self.code),
            crate::utils::xml_escape(&self.message),
            crate::utils::xml_escape(resource),
            crate::utils::xml_escape(&self.request_id)
        )
    }
}
