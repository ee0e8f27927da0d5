//! Real-time channel to the application server.

pub mod client;
pub mod logger;
pub mod wire;

pub use client::{ConnectionState, RealtimeClient};
pub use logger::ChannelLogger;
