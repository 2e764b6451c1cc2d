//! Ripple Storage Layer
//!
//! Object storage engines and the durable store for bucket notification and
//! listener configuration.

pub mod config_store;
pub mod engine;

pub use config_store::ConfigStore;
pub use engine::{md5_hex, LocalStorage, MemoryStorage, StorageEngine};
