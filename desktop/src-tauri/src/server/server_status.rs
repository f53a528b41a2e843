use crate::server::ServerState;

use serde::Serialize;

/// Backend status for the UI and diagnostics export.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub state: String,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub frontend_url: Option<String>,
    pub error: Option<String>,
    pub recovery_hint: Option<String>,
    pub is_running: bool,
}

/// Converts internal server state to frontend-facing status.
///
/// Shared by the `get_server_status` command, state change events and
/// diagnostics export.
pub fn build_server_status(state: &ServerState, frontend_url: Option<String>) -> ServerStatus {
    let (state_str, port, pid, error, recovery_hint) = match state {
        ServerState::Stopped => ("stopped".into(), None, None, None, None),
        ServerState::Starting { attempt: 0 } => ("starting".into(), None, None, None, None),
        ServerState::Starting { attempt } => (
            format!("starting (restart {attempt})"),
            None,
            None,
            None,
            None,
        ),
        ServerState::Running { port, pid } => {
            ("running".into(), Some(*port), Some(*pid), None, None)
        }
        ServerState::Restarting { attempt, delay_ms } => (
            format!("restarting (attempt {attempt} in {delay_ms}ms)"),
            None,
            None,
            None,
            None,
        ),
        ServerState::ShuttingDown => ("shutting_down".into(), None, None, None, None),
        ServerState::Failed { error, hint } => (
            "failed".into(),
            None,
            None,
            Some(error.clone()),
            Some(hint.clone()),
        ),
    };

    ServerStatus {
        is_running: state.is_running(),
        frontend_url: frontend_url.filter(|_| state.is_running()),
        state: state_str,
        port,
        pid,
        error,
        recovery_hint,
    }
}
