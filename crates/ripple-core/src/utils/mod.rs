//! Utility functions

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

/// Generate a unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string().replace("-", "").to_uppercase()
}

/// XML escape string
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Check a bucket name against S3 naming rules: 3 to 63 characters of
/// lowercase letters, digits, dots and hyphens, starting and ending with a
/// letter or digit.
pub fn validate_bucket_name(name: &str) -> crate::Result<()> {
    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-');
    let edges_ok = name
        .bytes()
        .next()
        .zip(name.bytes().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    if (3..=63).contains(&name.len()) && valid_chars && edges_ok && !name.contains("..") {
        Ok(())
    } else {
        Err(crate::Error::InvalidBucketName(name.to_string()))
    }
}

/// Generates destination ARNs for streaming listeners.
///
/// Each id combines the wall clock (nanoseconds), a process-wide sequence
/// number and a random suffix, so two registrations in the same nanosecond on
/// the same node still get distinct ids.
#[derive(Debug)]
pub struct DestinationIdGenerator {
    region: String,
    node: String,
    sequence: AtomicU64,
}

impl DestinationIdGenerator {
    pub fn new(region: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            node: node.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Next listener configuration id and destination id. The destination
    /// id has the shape `arn:ripple:sns:<region>:<unique>:listen-<node>`.
    pub fn next_listener(&self) -> (String, String) {
        let unique = self.next_unique();
        let arn = format!(
            "arn:ripple:sns:{}:{}:listen-{}",
            self.region, unique, self.node
        );
        (format!("sns-{}", unique), arn)
    }

    fn next_unique(&self) -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let salt: u32 = rand::rng().random();
        format!("{}{:04}{:08x}", nanos, seq % 10_000, salt)
    }
}
