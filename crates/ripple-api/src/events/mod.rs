//! Event notification module
//!
//! Handles delivery of object events to:
//! - Streaming listeners connected to any node
//! - Webhook targets (HTTP POST)

mod notifier;
mod webhook;

pub use notifier::{
    DispatchSummary, EventForwarder, EventNotifier, EventNotifierConfig, EventReceiver,
    EventSender,
};
pub use webhook::WebhookTarget;
