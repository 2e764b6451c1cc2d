//! Core types for Ripple

mod cluster;
mod event;
mod filter;
mod notification;

pub use cluster::*;
pub use event::*;
pub use filter::*;
pub use notification::*;
