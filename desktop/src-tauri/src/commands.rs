//! Tauri IPC commands for frontend communication.

use crate::Bootstrap;
use crate::logging::recent_log_lines;
use crate::server::{ServerError, ServerStatus, SupervisorHandle, build_server_status};

use tauri::State;
use tracing::error;

const DIAGNOSTIC_STDERR_LINES: usize = 200;

fn user_error(e: ServerError) -> String {
    error!("{e}");
    format!("{e}\n\nHint: {}", e.recovery_hint())
}

/// Get current backend status.
#[tauri::command]
pub async fn get_server_status(handle: State<'_, SupervisorHandle>) -> Result<ServerStatus, String> {
    Ok(build_server_status(
        &handle.state(),
        Some(handle.frontend_url().to_string()),
    ))
}

/// Manually restart the backend. Resets the crash counter.
#[tauri::command]
pub async fn restart_server(handle: State<'_, SupervisorHandle>) -> Result<(), String> {
    handle.restart().await.map_err(user_error)
}

/// Export diagnostic information as a zip file.
#[tauri::command]
pub async fn export_diagnostics(
    handle: State<'_, SupervisorHandle>,
    boot: State<'_, Bootstrap>,
) -> Result<String, String> {
    let status = build_server_status(&handle.state(), Some(handle.frontend_url().to_string()));
    let stderr_tail = handle.stderr_tail(DIAGNOSTIC_STDERR_LINES);

    boot.export_diagnostics(&status, &stderr_tail)
        .map(|path| path.to_string_lossy().into())
        .map_err(user_error)
}

/// Get recent log lines.
#[tauri::command]
pub async fn get_recent_logs(
    boot: State<'_, Bootstrap>,
    lines: Option<usize>,
) -> Result<Vec<String>, String> {
    recent_log_lines(&boot.data_dir, &boot.config.logging, lines.unwrap_or(100))
        .map_err(|e| e.to_string())
}

/// Stop the backend and exit.
#[tauri::command]
pub async fn quit_app(
    app: tauri::AppHandle,
    handle: State<'_, SupervisorHandle>,
) -> Result<(), String> {
    handle.shutdown().await.map_err(user_error)?;
    app.exit(0);
    Ok(())
}
