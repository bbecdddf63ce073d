//! SessionManager: one MCP server child, one call at a time.
//!
//! Owns the child's lifecycle and the single gate every call passes through.
//!
//! Flow per call:
//! 1. Acquire the gate (no timeout)
//! 2. Respawn the child if it is missing or has exited
//! 3. Write one request line, read one response line
//! 4. Parse the line and hand the JSON value back verbatim
//!
//! Any failure becomes `{"error": "..."}`. A transport failure or timeout
//! retires the child; the next call spawns a fresh one.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::bridge::protocol::{JsonRpcRequest, Params, ProtocolError, parse_response};
use crate::bridge::transport::{LineTransport, SpawnError, Spawner, TransportError};

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Upper bound on one write/read round trip. `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("failed to start MCP server: {0}")]
    StartupFailed(#[source] SpawnError),
    #[error("communication with MCP server failed: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid response from MCP server: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("MCP server did not respond within {0:?}")]
    TimedOut(Duration),
}

impl CallError {
    /// Whether the child can no longer be trusted to pair responses correctly.
    fn retires_session(&self) -> bool {
        matches!(self, CallError::Transport(_) | CallError::TimedOut(_))
    }

    /// The uniform error value handed to HTTP callers.
    pub fn into_value(self) -> Value {
        json!({ "error": self.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Unstarted,
    Running,
    Dead,
}

/// Point-in-time view of the session, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// When the current child was spawned (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub spawn_count: u64,
    pub calls_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Unstarted,
            pid: None,
            started_at: None,
            spawn_count: 0,
            calls_total: 0,
            last_error: None,
        }
    }
}

/// The child as seen from behind the gate.
enum Session {
    Unstarted,
    Running(Box<dyn LineTransport>),
    Dead,
}

pub struct SessionManager {
    spawner: Arc<dyn Spawner>,
    config: SessionConfig,
    gate: Mutex<Session>,
    /// Mirror of the gated state, readable without waiting on an in-flight call.
    status: StdMutex<SessionStatus>,
}

impl SessionManager {
    pub fn new(spawner: Arc<dyn Spawner>, config: SessionConfig) -> Self {
        Self {
            spawner,
            config,
            gate: Mutex::new(Session::Unstarted),
            status: StdMutex::new(SessionStatus::default()),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update_status(&self, f: impl FnOnce(&mut SessionStatus)) {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut status);
    }

    /// Issue one JSON-RPC call. Never fails: errors come back as `{"error": ...}`.
    ///
    /// The returned value is the child's response line as parsed JSON,
    /// including JSON-RPC error objects, which are not interpreted here.
    pub async fn call(&self, method: &str, params: Option<Params>) -> Value {
        match self.try_call(method, params).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(method, error = %e, "MCP call failed");
                e.into_value()
            }
        }
    }

    pub async fn try_call(&self, method: &str, params: Option<Params>) -> Result<Value, CallError> {
        let line = JsonRpcRequest::new(method, params.as_ref()).to_line()?;

        let mut session = self.gate.lock().await;
        self.update_status(|s| s.calls_total += 1);

        let mut transport = match self.checkout(&mut session).await {
            Ok(transport) => transport,
            Err(e) => {
                self.update_status(|s| s.last_error = Some(e.to_string()));
                return Err(e);
            }
        };

        let in_flight = InFlight::new(self, method);
        tracing::debug!(method, "Sending MCP request");
        let outcome = match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, round_trip(transport.as_mut(), &line))
                .await
                .unwrap_or(Err(CallError::TimedOut(limit))),
            None => round_trip(transport.as_mut(), &line).await,
        };

        match outcome {
            Ok(response) => {
                *session = Session::Running(transport);
                in_flight.complete();
                parse_response(&response).map_err(|e| {
                    self.update_status(|s| s.last_error = Some(e.to_string()));
                    CallError::from(e)
                })
            }
            Err(e) => {
                if e.retires_session() {
                    tracing::warn!(method, error = %e, "Retiring MCP server session");
                    transport.terminate().await;
                    *session = Session::Dead;
                    self.update_status(|s| {
                        s.state = SessionState::Dead;
                        s.pid = None;
                        s.last_error = Some(e.to_string());
                    });
                } else {
                    *session = Session::Running(transport);
                }
                in_flight.complete();
                Err(e)
            }
        }
    }

    /// Start the child now instead of on the first call.
    pub async fn warm_up(&self) -> Result<(), CallError> {
        let mut session = self.gate.lock().await;
        match self.checkout(&mut session).await {
            Ok(transport) => {
                *session = Session::Running(transport);
                Ok(())
            }
            Err(e) => {
                self.update_status(|s| s.last_error = Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Terminate the child, waiting for any in-flight call to finish first.
    pub async fn shutdown(&self) {
        let mut session = self.gate.lock().await;
        if let Session::Running(mut transport) = std::mem::replace(&mut *session, Session::Dead) {
            tracing::info!(pid = ?transport.pid(), "Stopping MCP server");
            transport.terminate().await;
        }
        self.update_status(|s| {
            if s.state == SessionState::Running {
                s.state = SessionState::Dead;
            }
            s.pid = None;
        });
    }

    /// Take the live transport out of the gate, spawning one if needed.
    ///
    /// Leaves `Session::Dead` behind; the caller puts the transport back once
    /// the round trip succeeds. If the call future is dropped mid-flight the
    /// transport is dropped with it (killing the child), so a half-finished
    /// exchange can never leak into the next call.
    async fn checkout(&self, session: &mut Session) -> Result<Box<dyn LineTransport>, CallError> {
        match std::mem::replace(session, Session::Dead) {
            Session::Running(mut transport) => {
                if transport.is_alive() {
                    return Ok(transport);
                }
                tracing::warn!(pid = ?transport.pid(), "MCP server exited, respawning");
                transport.terminate().await;
            }
            Session::Unstarted | Session::Dead => {}
        }
        self.start()
    }

    fn start(&self) -> Result<Box<dyn LineTransport>, CallError> {
        tracing::info!(command = %self.spawner.describe(), "Starting MCP server");
        match self.spawner.start() {
            Ok(transport) => {
                let pid = transport.pid();
                self.update_status(|s| {
                    s.state = SessionState::Running;
                    s.pid = pid;
                    s.started_at = Some(chrono::Utc::now().to_rfc3339());
                    s.spawn_count += 1;
                });
                tracing::info!(?pid, "MCP server started");
                Ok(transport)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start MCP server");
                self.update_status(|s| {
                    s.state = SessionState::Dead;
                    s.pid = None;
                });
                Err(CallError::StartupFailed(e))
            }
        }
    }
}

/// Marks the session dead if a call is dropped between checkout and put-back.
///
/// The checked-out transport is dropped along with the cancelled call future,
/// which kills the child, so the status mirror has to follow.
struct InFlight<'a> {
    manager: &'a SessionManager,
    method: &'a str,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn new(manager: &'a SessionManager, method: &'a str) -> Self {
        Self {
            manager,
            method,
            done: false,
        }
    }

    fn complete(mut self) {
        self.done = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        tracing::warn!(method = self.method, "MCP call cancelled mid-flight, dropping session");
        self.manager.update_status(|s| {
            s.state = SessionState::Dead;
            s.pid = None;
            s.last_error = Some(format!("{} call was cancelled before completing", self.method));
        });
    }
}

async fn round_trip(transport: &mut dyn LineTransport, line: &str) -> Result<String, CallError> {
    transport.write_line(line).await?;
    transport
        .read_line()
        .await?
        .ok_or(CallError::Transport(TransportError::EndOfStream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::test_support::{Event, FakeSpawner, Reply, echo_response};

    fn manager(spawner: &Arc<FakeSpawner>) -> SessionManager {
        SessionManager::new(spawner.clone(), SessionConfig::default())
    }

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[tokio::test]
    async fn first_call_spawns_once_then_reuses() {
        let spawner = FakeSpawner::echo();
        let session = manager(&spawner);
        assert_eq!(session.status().state, SessionState::Unstarted);

        session.call("tools/list", None).await;
        session.call("tools/list", None).await;

        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(
            spawner.events(),
            vec![
                Event::Spawn(1),
                Event::Write(1, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#.to_string()),
                Event::Read(1),
                Event::Write(1, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#.to_string()),
                Event::Read(1),
            ]
        );
        let status = session.status();
        assert_eq!(status.state, SessionState::Running);
        assert_eq!(status.spawn_count, 1);
        assert_eq!(status.calls_total, 2);
        assert!(status.started_at.is_some());
    }

    #[tokio::test]
    async fn get_subreddit_info_round_trip_passes_envelope_through() {
        let spawner = FakeSpawner::new(|_| {
            Reply::Line(r#"{"jsonrpc":"2.0","id":1,"result":{"name":"python"}}"#.to_string())
        });
        let session = manager(&spawner);

        let response = session
            .call(
                "tools/call",
                Some(params(json!({
                    "name": "get_subreddit_info",
                    "arguments": {"subreddit_name": "python"}
                }))),
            )
            .await;

        assert_eq!(response["result"]["name"], "python");
        assert!(response.get("error").is_none());

        let sent: Value = serde_json::from_str(&spawner.writes()[0]).unwrap();
        assert_eq!(sent["params"]["arguments"]["subreddit_name"], "python");
    }

    #[tokio::test]
    async fn empty_params_are_omitted_on_the_wire() {
        let spawner = FakeSpawner::echo();
        let session = manager(&spawner);

        session.call("tools/list", Some(Params::new())).await;
        session
            .call("tools/call", Some(params(json!({"name": "x"}))))
            .await;

        let writes = spawner.writes();
        let first: Value = serde_json::from_str(&writes[0]).unwrap();
        let second: Value = serde_json::from_str(&writes[1]).unwrap();
        assert!(first.get("params").is_none());
        assert_eq!(second["params"], json!({"name": "x"}));
    }

    #[tokio::test]
    async fn spawn_failure_returns_error_without_writing() {
        let spawner = FakeSpawner::echo();
        spawner.fail_next_spawns(1);
        let session = manager(&spawner);

        let response = session.call("tools/list", None).await;

        let message = response["error"].as_str().unwrap();
        assert!(message.contains("failed to start MCP server"), "{message}");
        assert_eq!(spawner.events(), vec![Event::SpawnFailed]);
        assert_eq!(session.status().state, SessionState::Dead);

        // Next call retries the spawn and succeeds.
        let response = session.call("tools/list", None).await;
        assert!(response.get("error").is_none());
        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(session.status().state, SessionState::Running);
    }

    #[tokio::test]
    async fn end_of_stream_is_an_error_and_next_call_respawns() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let spawner = FakeSpawner::new(move |line| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Reply::Eof
            } else {
                Reply::Line(echo_response(line))
            }
        });
        let session = manager(&spawner);

        let response = session.call("tools/list", None).await;
        let message = response["error"].as_str().unwrap();
        assert!(message.contains("closed its output stream"), "{message}");
        assert_eq!(session.status().state, SessionState::Dead);

        let response = session.call("tools/list", None).await;
        assert_eq!(response["result"], Value::Null);
        assert!(response.get("error").is_none());
        assert_eq!(spawner.spawn_count(), 2);
        assert!(spawner.events().contains(&Event::Terminate(1)));
    }

    #[tokio::test]
    async fn dead_child_is_terminated_and_replaced_before_writing() {
        let spawner = FakeSpawner::echo();
        let session = manager(&spawner);

        session.call("tools/list", None).await;
        spawner.kill_child(1);
        session.call("tools/list", None).await;

        let events = spawner.events();
        let terminate = events.iter().position(|e| *e == Event::Terminate(1)).unwrap();
        let respawn = events.iter().position(|e| *e == Event::Spawn(2)).unwrap();
        assert!(terminate < respawn);
        assert!(matches!(events.last(), Some(Event::Read(2))));
    }

    #[tokio::test]
    async fn invalid_json_is_an_error_but_keeps_the_session() {
        let spawner = FakeSpawner::new(|_| Reply::Line("not json".to_string()));
        let session = manager(&spawner);

        let response = session.call("tools/list", None).await;
        assert!(
            response["error"]
                .as_str()
                .unwrap()
                .contains("invalid response")
        );

        session.call("tools/list", None).await;
        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(session.status().state, SessionState::Running);
        assert!(session.status().last_error.is_some());
    }

    #[tokio::test]
    async fn empty_line_is_an_error() {
        let spawner = FakeSpawner::new(|_| Reply::Line(String::new()));
        let session = manager(&spawner);

        let err = session.try_call("tools/list", None).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Protocol(ProtocolError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn write_failure_retires_the_session() {
        let spawner = FakeSpawner::echo();
        let session = manager(&spawner);
        session.warm_up().await.unwrap();

        spawner.fail_writes(true);
        let err = session.try_call("tools/list", None).await.unwrap_err();
        assert!(matches!(err, CallError::Transport(TransportError::Write(_))));
        assert_eq!(session.status().state, SessionState::Dead);

        spawner.fail_writes(false);
        let response = session.call("tools/list", None).await;
        assert!(response.get("error").is_none());
        assert_eq!(spawner.spawn_count(), 2);
    }

    #[tokio::test]
    async fn read_failure_retires_the_session() {
        let spawner = FakeSpawner::new(|_| Reply::ReadError);
        let session = manager(&spawner);

        let err = session.try_call("tools/list", None).await.unwrap_err();
        assert!(matches!(err, CallError::Transport(TransportError::Read(_))));
        assert_eq!(session.status().state, SessionState::Dead);
    }

    #[tokio::test]
    async fn timeout_retires_the_session() {
        let spawner = FakeSpawner::new(|_| Reply::Hang);
        let session = SessionManager::new(
            spawner.clone(),
            SessionConfig::default().with_call_timeout(Some(Duration::from_millis(20))),
        );

        let response = session.call("tools/list", None).await;
        assert!(response["error"].as_str().unwrap().contains("did not respond"));
        assert_eq!(session.status().state, SessionState::Dead);
        assert!(spawner.events().contains(&Event::Terminate(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_are_serialized_and_paired() {
        let spawner = FakeSpawner::echo();
        let session = Arc::new(manager(&spawner));

        let mut handles = Vec::new();
        for i in 0..16 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                let response = session
                    .call("tools/call", Some(params(json!({"n": i}))))
                    .await;
                (i, response)
            }));
        }

        for handle in handles {
            let (i, response) = handle.await.unwrap();
            assert_eq!(response["result"]["n"], i, "response paired with wrong request");
        }

        let io: Vec<Event> = spawner
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Write(..) | Event::Read(..)))
            .collect();
        assert_eq!(io.len(), 32);
        for pair in io.chunks(2) {
            assert!(matches!(pair[0], Event::Write(..)), "{pair:?}");
            assert!(matches!(pair[1], Event::Read(..)), "{pair:?}");
        }
        assert_eq!(spawner.spawn_count(), 1);
    }

    #[tokio::test]
    async fn status_is_readable_while_a_call_is_in_flight() {
        let spawner = FakeSpawner::new(|_| Reply::Hang);
        let session = Arc::new(manager(&spawner));

        let in_flight = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.call("tools/list", None).await })
        };
        spawner.wait_for(&Event::Read(1)).await;

        let status = session.status();
        assert_eq!(status.state, SessionState::Running);
        assert_eq!(status.calls_total, 1);

        in_flight.abort();
    }

    #[tokio::test]
    async fn cancelled_call_marks_session_dead_and_next_call_respawns() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let spawner = FakeSpawner::new({
            let calls = Arc::clone(&calls);
            move |line| {
                if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    Reply::Hang
                } else {
                    Reply::Line(echo_response(line))
                }
            }
        });
        let session = Arc::new(manager(&spawner));

        let in_flight = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.call("tools/list", None).await })
        };
        spawner.wait_for(&Event::Read(1)).await;
        in_flight.abort();
        assert!(in_flight.await.unwrap_err().is_cancelled());

        let status = session.status();
        assert_eq!(status.state, SessionState::Dead);
        assert!(status.pid.is_none());
        assert!(status.last_error.unwrap().contains("cancelled"));

        let response = session.call("tools/list", None).await;
        assert!(response.get("error").is_none(), "{response}");
        assert_eq!(spawner.spawn_count(), 2);
        assert_eq!(session.status().state, SessionState::Running);
    }

    #[tokio::test]
    async fn warm_up_reports_spawn_failure() {
        let spawner = FakeSpawner::echo();
        spawner.fail_next_spawns(1);
        let session = manager(&spawner);

        assert!(matches!(
            session.warm_up().await,
            Err(CallError::StartupFailed(_))
        ));
        session.warm_up().await.unwrap();
        assert_eq!(spawner.spawn_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_terminates_running_child() {
        let spawner = FakeSpawner::echo();
        let session = manager(&spawner);
        session.warm_up().await.unwrap();

        session.shutdown().await;

        assert_eq!(spawner.events().last(), Some(&Event::Terminate(1)));
        let status = session.status();
        assert_eq!(status.state, SessionState::Dead);
        assert!(status.pid.is_none());
    }

    #[test]
    fn call_error_value_shape() {
        let value = CallError::TimedOut(Duration::from_secs(3)).into_value();
        assert_eq!(value, json!({"error": "MCP server did not respond within 3s"}));
    }

    #[test]
    fn session_status_serializes_minimal() {
        insta::assert_json_snapshot!(SessionStatus::default(), @r#"
        {
          "state": "unstarted",
          "spawn_count": 0,
          "calls_total": 0
        }
        "#);
    }
}
