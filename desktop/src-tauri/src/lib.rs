#![allow(dead_code)]

mod cli;
#[cfg(feature = "desktop")]
mod commands;
#[cfg(feature = "desktop")]
mod desktop;
mod diagnostics;
mod logging;
mod server;
mod shell;

pub use cli::Cli;
#[cfg(feature = "desktop")]
pub use desktop::run;
pub use server::{ServerError, ServerResult};

use diagnostics::DiagnosticsInput;
use logging::setup_logging;
use server::{
    LaunchResolver, LaunchSpec, ServerConfig, ServerState, ServerStatus, Supervisor,
    build_server_status,
};
use shell::HeadlessShell;

#[cfg(test)]
mod tests;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use error_location::ErrorLocation;
use tokio::sync::oneshot;
use tracing::{error, info};

const APP_DIR_NAME: &str = "plexio";

/// Data directory and config, shared by both shells.
pub(crate) struct Bootstrap {
    pub data_dir: PathBuf,
    pub config: ServerConfig,
}

impl Bootstrap {
    pub fn prepare(cli: &Cli) -> ServerResult<Self> {
        let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
        std::fs::create_dir_all(&data_dir).map_err(|e| ServerError::DataDirCreation {
            path: data_dir.clone(),
            source: e,
            location: ErrorLocation::from(Location::caller()),
        })?;

        let mut config = match &cli.config {
            Some(path) => ServerConfig::load_from(path)?,
            None => ServerConfig::load_or_create(&data_dir)?,
        };
        if cli.open_browser {
            config.frontend.open_browser = true;
        }

        Ok(Self { data_dir, config })
    }

    /// Resolver that looks for the backend next to this executable and in `resources_dir`.
    pub fn launch_resolver(&self, resources_dir: Option<PathBuf>) -> LaunchResolver {
        let config = self.config.clone();
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        Arc::new(move || {
            LaunchSpec::from_config(&config, exe_dir.as_deref(), resources_dir.as_deref())
        })
    }

    pub fn export_diagnostics(
        &self,
        status: &ServerStatus,
        stderr_tail: &str,
    ) -> ServerResult<PathBuf> {
        diagnostics::export_diagnostics(&DiagnosticsInput {
            data_dir: &self.data_dir,
            logging: &self.config.logging,
            status,
            stderr_tail,
        })
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

/// Run the supervisor without a window until a signal arrives or the
/// backend fails for good.
pub async fn run_headless(cli: Cli) -> ServerResult<()> {
    let boot = Bootstrap::prepare(&cli)?;
    if let Err(e) = setup_logging(&boot.data_dir, &boot.config.logging) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting Plexio desktop v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {}", boot.data_dir.display());

    if cli.export_diagnostics {
        let status = build_server_status(&ServerState::Stopped, None);
        let path = boot.export_diagnostics(&status, "")?;
        info!("Diagnostics written to {}", path.display());
        return Ok(());
    }

    let shell = HeadlessShell::new(boot.data_dir.clone(), boot.config.frontend.open_browser);
    let (supervisor, handle) = Supervisor::new(
        boot.config.clone(),
        boot.data_dir.clone(),
        boot.launch_resolver(None),
        shell,
    );
    let mut task = tokio::spawn(supervisor.run());
    let mut signal = shutdown_signal();

    let failure = tokio::select! {
        Ok(()) = &mut signal => None,
        state = handle.wait_for(ServerState::is_failed) => Some(state),
        _ = &mut task => {
            return Err(ServerError::SupervisorGone {
                location: ErrorLocation::from(Location::caller()),
            });
        }
    };

    if let Err(e) = handle.shutdown().await {
        error!("Failed to stop backend: {e}");
    }
    let _ = task.await;

    match failure {
        Some(ServerState::Failed { error, .. }) => Err(ServerError::BackendFailed {
            message: error,
            location: ErrorLocation::from(Location::caller()),
        }),
        _ => {
            info!("Plexio desktop stopped");
            Ok(())
        }
    }
}

/// Resolves once SIGINT/SIGTERM (Ctrl+C on Windows) is received.
fn shutdown_signal() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();

    #[cfg(unix)]
    spawn_signal_listener(move |sig| {
        info!("Received signal {sig}, shutting down...");
        let _ = tx.send(());
    });

    #[cfg(not(unix))]
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            let _ = tx.send(());
        }
    });

    rx
}

/// Call `on_signal` from a dedicated thread on the first SIGINT or SIGTERM.
#[cfg(unix)]
pub(crate) fn spawn_signal_listener<F>(on_signal: F)
where
    F: FnOnce(i32) + Send + 'static,
{
    std::thread::spawn(move || {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = match Signals::new([SIGINT, SIGTERM]) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to register signal handlers: {e}");
                return;
            }
        };

        if let Some(sig) = signals.forever().next() {
            on_signal(sig);
        }
    });
}
