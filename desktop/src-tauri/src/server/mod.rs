mod config;
mod environment;
mod error;
mod launch;
mod loader;
mod lock;
mod process;
mod readiness;
mod restart_policy;
mod server_state;
mod server_status;
mod stderr_buffer;
mod supervisor;

pub use config::{
    BackendSettings, CONFIG_FILENAME, CONFIG_VERSION, ENV_BACKEND_PATH, ENV_LOG_LEVEL, ENV_PORT,
    EnvironmentSettings, FrontendSettings, LoggingSettings, ReadinessSettings,
    ResilienceSettings, ServerConfig, ServerSettings,
};
pub use environment::{backend_environment, is_private_host, validate_public_url};
pub use error::{Result as ServerResult, ServerError};
pub use launch::{LaunchSpec, find_backend_binary};
pub use loader::{
    DiagnosticPage, FrontendLoader, LoaderEffect, LoaderEvent, LoaderState, PLACEHOLDER_URL,
};
pub use lock::{LockFile, LockInfo, is_process_running};
pub use process::{BackendProcess, ExitInfo, ProcessExit, ProcessState, preflight};
pub use readiness::{
    HttpProbe, Probe, ProbeResult, ReadinessOutcome, ReadinessState, poll_until_ready,
};
pub use restart_policy::{
    Decision, GiveUpReason, RestartCounter, RestartPolicy, detect_missing_dependency,
    detect_port_conflict,
};
pub use server_state::ServerState;
pub use server_status::{ServerStatus, build_server_status};
pub use stderr_buffer::StderrBuffer;
pub use supervisor::{LaunchResolver, Supervisor, SupervisorCommand, SupervisorHandle};
