//! mcp-bridge: HTTP front end for a line-delimited JSON-RPC MCP server.
//!
//! The MCP server runs as a single long-lived child process. Every HTTP
//! request becomes exactly one request line on its stdin and one response
//! line from its stdout, serialized through [`SessionManager`].

pub mod bridge;
pub mod config;
mod health;
pub mod service;
pub mod session;
pub mod transport;
mod version;

pub use bridge::protocol::{Tool, ToolCall};
pub use bridge::transport::{CommandSpawner, LineTransport, SpawnError, Spawner, TransportError};
pub use config::BridgeConfig;
pub use health::{Health, HealthResponse, SERVICE_NAME};
pub use service::BridgeService;
pub use session::{CallError, SessionConfig, SessionManager, SessionState, SessionStatus};
pub use version::{BRIDGE_VERSION, VersionInfo};
