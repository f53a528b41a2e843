mod diagnostics;
mod environment;
mod lock;
mod readiness;
mod stderr_buffer;

use crate::server::{DiagnosticPage, ServerConfig, SupervisorHandle};
use crate::shell::UiShell;

use std::env;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// RAII guard for environment variables - automatically restores on drop
pub(crate) struct EnvGuard {
    key: &'static str,
    original: Option<String>,
}

impl EnvGuard {
    pub(crate) fn set(key: &'static str, value: &str) -> Self {
        unsafe {
            let original = env::var(key).ok();
            env::set_var(key, value);
            Self { key, original }
        }
    }

    pub(crate) fn remove(key: &'static str) -> Self {
        unsafe {
            let original = env::var(key).ok();
            env::remove_var(key);
            Self { key, original }
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        unsafe {
            match &self.original {
                Some(val) => env::set_var(self.key, val),
                None => env::remove_var(self.key),
            }
        }
    }
}

/// A port nothing is listening on right now.
pub(crate) fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Config tuned for fast tests against a loopback backend.
pub(crate) fn fast_config(port: u16) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = port;
    config.readiness.interval_ms = 20;
    config.readiness.max_attempts = 25;
    config.readiness.request_timeout_ms = 200;
    config.resilience.restart_delay_ms = 50;
    config.resilience.shutdown_grace_ms = 1000;
    config
}

/// Write an executable `/bin/sh` script.
#[cfg(unix)]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ShellCall {
    Navigate(String),
    Reveal,
    ShowError(DiagnosticPage),
}

/// Shell that records calls and reports every navigation as loaded.
#[derive(Clone, Default)]
pub(crate) struct RecordingShell {
    calls: Arc<Mutex<Vec<ShellCall>>>,
}

impl RecordingShell {
    pub(crate) fn calls(&self) -> Vec<ShellCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn reveal_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == ShellCall::Reveal)
            .count()
    }

    pub(crate) fn errors(&self) -> Vec<DiagnosticPage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ShellCall::ShowError(page) => Some(page),
                _ => None,
            })
            .collect()
    }
}

impl UiShell for RecordingShell {
    fn navigate(&self, url: &str, events: SupervisorHandle) {
        self.calls
            .lock()
            .unwrap()
            .push(ShellCall::Navigate(url.to_string()));
        events.page_loaded(url);
    }

    fn reveal(&self) {
        self.calls.lock().unwrap().push(ShellCall::Reveal);
    }

    fn show_error(&self, page: &DiagnosticPage) {
        self.calls
            .lock()
            .unwrap()
            .push(ShellCall::ShowError(page.clone()));
    }
}
