//! REST surface over the MCP session.

pub mod routes;
pub mod server;

pub use routes::{ApiError, routes};
pub use server::{ServerConfig, serve};
