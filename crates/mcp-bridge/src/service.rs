//! BridgeService: transport-agnostic entry point for MCP calls.
//!
//! This service owns:
//! - The SessionManager (child process + call gate)
//! - Version info for health reporting
//! - Shutdown coordination (bidirectional)
//!
//! Transports construct one service and share it as `Arc<BridgeService>`.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::watch;

use crate::bridge::protocol::{Params, ToolCall, methods};
use crate::health::HealthResponse;
use crate::session::SessionManager;
use crate::version::VersionInfo;

pub struct BridgeService {
    session: SessionManager,
    version: VersionInfo,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BridgeService {
    pub fn new(session: SessionManager) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            session,
            version: VersionInfo::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse::new(self.session.status(), self.version.clone())
    }

    /// Issue a call on a detached task and wait for it.
    ///
    /// The call's lifetime is NOT tied to the HTTP connection: if the client
    /// goes away, the write/read pair still completes and the session stays
    /// usable for the next caller.
    pub async fn dispatch(self: &Arc<Self>, method: &'static str, params: Option<Params>) -> Value {
        let service = Arc::clone(self);
        let task = tokio::spawn(async move { service.session.call(method, params).await });
        match task.await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(method, error = %e, "MCP call task lost");
                json!({ "error": format!("MCP call task failed: {}", e) })
            }
        }
    }

    pub async fn list_tools(self: &Arc<Self>) -> Value {
        self.dispatch(methods::TOOLS_LIST, None).await
    }

    pub async fn call_tool(self: &Arc<Self>, call: ToolCall) -> Value {
        tracing::debug!(tool = %call.name, "Calling tool");
        self.dispatch(methods::TOOLS_CALL, Some(call.into_params()))
            .await
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Ask the server loop to stop (used by the /shutdown route).
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the MCP server child. Waits for an in-flight call to finish.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}
