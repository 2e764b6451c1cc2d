//! Bucket event notification service and HTTP API for Ripple

pub mod events;
pub mod metrics;
pub mod notification;
pub mod routes;
pub mod server;

pub use notification::NotificationService;
pub use server::{router, AppState, RippleServer};
pub use metrics::MetricsRecorder;
