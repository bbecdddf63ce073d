//! Environment-driven configuration.
//!
//! Read once at startup. Unparsable values are startup errors naming the
//! offending variable.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::bridge::transport::CommandSpawner;
use crate::session::SessionConfig;
use crate::transport::ServerConfig;

pub const ENV_PORT: &str = "PORT";
pub const ENV_HOST: &str = "HOST";
pub const ENV_PYTHON: &str = "MCP_BRIDGE_PYTHON";
pub const ENV_MODULE: &str = "MCP_BRIDGE_MODULE";
pub const ENV_CALL_TIMEOUT_SECS: &str = "MCP_BRIDGE_CALL_TIMEOUT_SECS";
pub const ENV_MAX_LINE_BYTES: &str = "MCP_BRIDGE_MAX_LINE_BYTES";
pub const ENV_AWAIT_EXPLICIT_SHUTDOWN: &str = "MCP_BRIDGE_AWAIT_EXPLICIT_SHUTDOWN";

pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_MODULE: &str = "mcp_server_reddit";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub python: String,
    pub module: String,
    pub max_line_bytes: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            python: DEFAULT_PYTHON.to_string(),
            module: DEFAULT_MODULE.to_string(),
            max_line_bytes: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(port) = parse::<u16>(ENV_PORT, get(ENV_PORT))? {
            config.server.port = port;
        }
        if let Some(host) = get(ENV_HOST) {
            config.server.host = host;
        }
        if let Some(flag) = get(ENV_AWAIT_EXPLICIT_SHUTDOWN) {
            config.server.await_explicit_shutdown = parse_flag(ENV_AWAIT_EXPLICIT_SHUTDOWN, &flag)?;
        }
        if let Some(python) = get(ENV_PYTHON) {
            config.python = python;
        }
        if let Some(module) = get(ENV_MODULE) {
            config.module = module;
        }

        let timeout = parse::<u64>(ENV_CALL_TIMEOUT_SECS, get(ENV_CALL_TIMEOUT_SECS))?;
        config.session.call_timeout = timeout.filter(|s| *s > 0).map(Duration::from_secs);
        config.max_line_bytes = parse::<usize>(ENV_MAX_LINE_BYTES, get(ENV_MAX_LINE_BYTES))?;

        Ok(config)
    }

    pub fn spawner(&self) -> CommandSpawner {
        CommandSpawner::python_module(self.python.clone(), self.module.clone())
            .with_max_line_bytes(self.max_line_bytes)
    }
}

fn parse<T>(key: &str, value: Option<String>) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| {
            v.parse::<T>()
                .with_context(|| format!("invalid value for {key}: {v:?}"))
        })
        .transpose()
}

fn parse_flag(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("invalid value for {key}: {value:?} (expected true/false)"),
    }
}
