//! Inbound transports for the bridge.
//!
//! HTTP via axum is the only one; it drives a shared `BridgeService`.

pub mod http;

pub use http::{ServerConfig, serve};
