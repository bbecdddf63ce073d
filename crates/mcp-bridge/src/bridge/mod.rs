//! Stdio bridge to the MCP server subprocess.
//!
//! # Architecture
//!
//! - **codec**: newline framing for AsyncRead/AsyncWrite
//! - **protocol**: JSON-RPC request/response wire types
//! - **transport**: line transport over child stdio, plus the spawner

pub mod codec;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
