//! Event system for the DSM monitor
//!
//! This crate provides the typed events parsed from node output and the
//! bus that carries them from the output drains to a single consumer.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
