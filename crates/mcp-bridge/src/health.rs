//! Health status types for the bridge.

use serde::{Deserialize, Serialize};

use crate::session::{SessionState, SessionStatus};
use crate::version::VersionInfo;

/// Name reported in the `service` field of health responses.
pub const SERVICE_NAME: &str = "MCP Reddit HTTP Wrapper";

/// Overall bridge health.
///
/// The child is started lazily, so an unstarted session is still `ok`.
/// `degraded` means the last attempt to run it failed; the next call will
/// try to respawn it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    #[default]
    Ok,
    Degraded,
}

impl From<SessionState> for Health {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Unstarted | SessionState::Running => Health::Ok,
            SessionState::Dead => Health::Degraded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: Health,
    pub service: &'static str,
    pub version: VersionInfo,
    pub session: SessionStatus,
}

impl HealthResponse {
    pub fn new(session: SessionStatus, version: VersionInfo) -> Self {
        Self {
            status: session.state.into(),
            service: SERVICE_NAME,
            version,
            session,
        }
    }
}
