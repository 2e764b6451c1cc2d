//! Ripple Core Library
//!
//! Core types, configuration and error taxonomy shared by the Ripple
//! bucket notification crates.

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::RippleConfig;
pub use error::{Error, Result};

/// Ripple version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default region used in destination ARNs and event records
pub const DEFAULT_REGION: &str = "us-east-1";

/// Internal bucket holding configuration objects
pub const META_BUCKET: &str = ".ripple.sys";

/// Prefix under the meta bucket for per-bucket configuration
pub const BUCKET_CONFIG_PREFIX: &str = "buckets";

/// Object name of a bucket's notification configuration
pub const BUCKET_NOTIFICATION_CONFIG: &str = "notification.xml";

/// Object name of a bucket's listener configuration
pub const BUCKET_LISTENER_CONFIG: &str = "listener.json";

/// Maximum length of a filter rule value
pub const MAX_FILTER_VALUE_LENGTH: usize = 1024;
