//! Version information reported on the health endpoint.

/// mcp-bridge version from Cargo.toml
pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub mcp_bridge: &'static str,
    /// Command line used to launch the MCP server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_command: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            mcp_bridge: BRIDGE_VERSION,
            server_command: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server_command(mut self, command: impl Into<String>) -> Self {
        self.server_command = Some(command.into());
        self
    }
}
