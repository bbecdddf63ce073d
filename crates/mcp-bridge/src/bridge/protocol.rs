//! JSON-RPC 2.0 wire types for the MCP server's stdio channel.
//!
//! Outbound: one request object per line. Inbound: one JSON value per line,
//! passed through to callers without interpretation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation id sent with every request.
///
/// Only valid while the session gate keeps a single call in flight. Pipelining
/// requests would need real ids and a response demultiplexer.
pub const REQUEST_ID: u64 = 1;

/// Longest prefix of an unparsable line kept in error messages.
const ERROR_EXCERPT_CHARS: usize = 200;

pub type Params = serde_json::Map<String, Value>;

/// Method names understood by the MCP server.
pub mod methods {
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty response line")]
    EmptyResponse,
    #[error("response is not valid JSON ({source}): {excerpt}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
        excerpt: String,
    },
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A JSON-RPC request as written to the child.
///
/// `params` is omitted entirely when empty: some peers reject `"params": {}`
/// for methods that take no arguments.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Params>,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(method: &'a str, params: Option<&'a Params>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: REQUEST_ID,
            method,
            params: params.filter(|p| !p.is_empty()),
        }
    }

    /// Serialize to a single line of JSON (no trailing newline).
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Parse one response line into a JSON value.
pub fn parse_response(line: &str) -> Result<Value, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyResponse);
    }
    serde_json::from_str(trimmed).map_err(|source| ProtocolError::InvalidJson {
        source,
        excerpt: trimmed.chars().take(ERROR_EXCERPT_CHARS).collect(),
    })
}

/// Tools exposed by `mcp_server_reddit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    GetFrontpagePosts,
    GetSubredditInfo,
    GetSubredditHotPosts,
    GetPostContent,
    GetPostComments,
    SearchSubreddits,
    FindUnpopularSubreddits,
}

impl Tool {
    pub const ALL: [Tool; 7] = [
        Tool::GetFrontpagePosts,
        Tool::GetSubredditInfo,
        Tool::GetSubredditHotPosts,
        Tool::GetPostContent,
        Tool::GetPostComments,
        Tool::SearchSubreddits,
        Tool::FindUnpopularSubreddits,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::GetFrontpagePosts => "get_frontpage_posts",
            Tool::GetSubredditInfo => "get_subreddit_info",
            Tool::GetSubredditHotPosts => "get_subreddit_hot_posts",
            Tool::GetPostContent => "get_post_content",
            Tool::GetPostComments => "get_post_comments",
            Tool::SearchSubreddits => "search_subreddits",
            Tool::FindUnpopularSubreddits => "find_unpopular_subreddits",
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Params,
}

impl ToolCall {
    pub fn new(tool: Tool) -> Self {
        Self::named(tool.name())
    }

    /// Call a tool by raw name, for tools this crate does not enumerate.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Params::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.to_string(), value.into());
        self
    }

    /// Set an argument only when a value is present.
    pub fn opt_arg<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.arg(key, v),
            None => self,
        }
    }

    pub fn with_arguments(mut self, arguments: Params) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn into_params(self) -> Params {
        let mut params = Params::new();
        params.insert("name".to_string(), Value::String(self.name));
        params.insert("arguments".to_string(), Value::Object(self.arguments));
        params
    }
}
