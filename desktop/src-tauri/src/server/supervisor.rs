//! Backend supervisor: one event loop owning the process, readiness, restarts
//! and the frontend loader.
//!
//! Every event carries the lifecycle id of the process it belongs to, so
//! late events from a previous process (a slow probe, a delayed exit) are
//! dropped instead of acting on the current one.

use crate::server::{
    BackendProcess, Decision, DiagnosticPage, FrontendLoader, GiveUpReason, HttpProbe, LaunchSpec,
    LoaderEffect, LoaderEvent, LockFile, ProcessExit, ReadinessOutcome, ReadinessState,
    RestartCounter, RestartPolicy, ServerConfig, ServerError, ServerResult, ServerState,
    StderrBuffer, detect_port_conflict, poll_until_ready,
};
use crate::shell::UiShell;

use std::panic::Location;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use error_location::ErrorLocation;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Stderr lines attached to a failure diagnostic.
const DIAGNOSTIC_STDERR_LINES: usize = 40;
/// Stderr lines logged with each crash.
const CRASH_LOG_STDERR_LINES: usize = 5;

/// Resolves what to spawn. Called for every lifecycle, so a reinstalled
/// backend is picked up on the next restart.
pub type LaunchResolver = Arc<dyn Fn() -> ServerResult<LaunchSpec> + Send + Sync>;

/// Requests into the supervisor loop.
#[derive(Debug)]
pub enum SupervisorCommand {
    /// The shell finished loading a page
    PageLoaded { url: String },
    /// The shell failed to load a page
    LoadFailed { url: String, error: String },
    /// User-requested restart; resets the crash counter
    Restart {
        ack: oneshot::Sender<ServerResult<()>>,
    },
    /// Terminate the backend and stop supervising
    Shutdown {
        ack: oneshot::Sender<ServerResult<()>>,
    },
}

/// Cloneable handle for talking to a running [`Supervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    state_rx: watch::Receiver<ServerState>,
    stderr: Arc<Mutex<Option<StderrBuffer>>>,
    spawns: Arc<AtomicU32>,
    frontend_url: String,
}

impl SupervisorHandle {
    pub fn state(&self) -> ServerState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state_rx.clone()
    }

    pub fn frontend_url(&self) -> &str {
        &self.frontend_url
    }

    /// Number of backend processes spawned so far.
    pub fn spawn_count(&self) -> u32 {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Last lines of stderr from the most recent backend process.
    pub fn stderr_tail(&self, lines: usize) -> String {
        self.stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|buffer| buffer.tail(lines))
            .unwrap_or_default()
    }

    pub fn page_loaded(&self, url: impl Into<String>) {
        let _ = self
            .commands
            .send(SupervisorCommand::PageLoaded { url: url.into() });
    }

    pub fn load_failed(&self, url: impl Into<String>, error: impl Into<String>) {
        let _ = self.commands.send(SupervisorCommand::LoadFailed {
            url: url.into(),
            error: error.into(),
        });
    }

    pub async fn restart(&self) -> ServerResult<()> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(SupervisorCommand::Restart { ack })
            .map_err(|_| supervisor_gone())?;
        rx.await.map_err(|_| supervisor_gone())?
    }

    /// Stop the backend. Safe to call more than once.
    pub async fn shutdown(&self) -> ServerResult<()> {
        let (ack, rx) = oneshot::channel();
        if self
            .commands
            .send(SupervisorCommand::Shutdown { ack })
            .is_err()
        {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> ServerState
    where
        F: FnMut(&ServerState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        match rx.wait_for(predicate).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }
}

#[track_caller]
fn supervisor_gone() -> ServerError {
    ServerError::SupervisorGone {
        location: ErrorLocation::from(Location::caller()),
    }
}

/// Everything the loop mutates. Owned by the loop alone.
struct SupervisorState {
    process: Option<BackendProcess>,
    lock: Option<LockFile>,
    counter: RestartCounter,
    readiness: ReadinessState,
    loader: FrontendLoader,
    probe_task: Option<JoinHandle<()>>,
    restart_at: Option<Instant>,
    shutdown_requested: bool,
}

enum Flow {
    Continue,
    Stop,
}

pub struct Supervisor<S: UiShell> {
    config: ServerConfig,
    data_dir: PathBuf,
    resolver: LaunchResolver,
    policy: RestartPolicy,
    shell: S,
    state: SupervisorState,
    state_tx: watch::Sender<ServerState>,
    handle: SupervisorHandle,
    commands_rx: mpsc::UnboundedReceiver<SupervisorCommand>,
    exit_tx: mpsc::Sender<ProcessExit>,
    exit_rx: mpsc::Receiver<ProcessExit>,
    ready_tx: mpsc::Sender<(Uuid, ReadinessOutcome)>,
    ready_rx: mpsc::Receiver<(Uuid, ReadinessOutcome)>,
}

impl<S: UiShell> Supervisor<S> {
    pub fn new(
        config: ServerConfig,
        data_dir: PathBuf,
        resolver: LaunchResolver,
        shell: S,
    ) -> (Self, SupervisorHandle) {
        let (state_tx, state_rx) = watch::channel(ServerState::Stopped);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = mpsc::channel(4);
        let (ready_tx, ready_rx) = mpsc::channel(4);

        let loader = FrontendLoader::new(config.frontend_origin());
        let handle = SupervisorHandle {
            commands,
            state_rx,
            stderr: Arc::new(Mutex::new(None)),
            spawns: Arc::new(AtomicU32::new(0)),
            frontend_url: loader.frontend_url(),
        };

        let policy = RestartPolicy::new(
            config.resilience.max_restarts,
            Duration::from_millis(config.resilience.restart_delay_ms),
        );

        let supervisor = Self {
            config,
            data_dir,
            resolver,
            policy,
            shell,
            state: SupervisorState {
                process: None,
                lock: None,
                counter: RestartCounter::default(),
                readiness: ReadinessState::NotChecked,
                loader,
                probe_task: None,
                restart_at: None,
                shutdown_requested: false,
            },
            state_tx,
            handle: handle.clone(),
            commands_rx,
            exit_tx,
            exit_rx,
            ready_tx,
            ready_rx,
        };

        (supervisor, handle)
    }

    /// Run until a shutdown command has been handled.
    pub async fn run(mut self) {
        let grace = self.shutdown_grace();
        match LockFile::reap_stale(&self.data_dir, grace).await {
            Ok(_) => self.spawn_lifecycle(),
            Err(e) => self.fail(e, None),
        }

        loop {
            let restart_at = self.state.restart_at;
            let restart_timer = async move {
                match restart_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                Some(command) = self.commands_rx.recv() => {
                    if let Flow::Stop = self.on_command(command).await {
                        break;
                    }
                }
                Some(exit) = self.exit_rx.recv() => self.on_process_exit(exit),
                Some((lifecycle, outcome)) = self.ready_rx.recv() => {
                    self.on_readiness(lifecycle, outcome);
                }
                _ = restart_timer => {
                    self.state.restart_at = None;
                    self.spawn_lifecycle();
                }
            }
        }

        info!("Supervisor stopped");
    }

    fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.config.resilience.shutdown_grace_ms)
    }

    fn publish(&self, state: ServerState) {
        debug!("Server state: {state:?}");
        let _ = self.state_tx.send(state);
    }

    fn current_lifecycle(&self) -> Option<Uuid> {
        self.state.process.as_ref().map(BackendProcess::lifecycle)
    }

    /// Start one backend lifecycle: spawn, record the lock, begin probing.
    fn spawn_lifecycle(&mut self) {
        if self.state.shutdown_requested || self.state.process.is_some() {
            return;
        }

        let attempt = self.state.counter.get();
        self.publish(ServerState::Starting { attempt });
        self.state.readiness = ReadinessState::NotChecked;
        self.state.loader.begin_lifecycle();

        let started = (self.resolver)().and_then(|launch| {
            BackendProcess::start(
                &launch,
                self.config.resilience.stderr_buffer_bytes,
                self.exit_tx.clone(),
            )
        });

        let process = match started {
            Ok(process) => process,
            Err(e) => {
                // Nothing was spawned, so there is nothing to restart
                self.fail(e, None);
                return;
            }
        };

        self.handle.spawns.fetch_add(1, Ordering::SeqCst);
        *self
            .handle
            .stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(process.stderr().clone());

        match LockFile::acquire(&self.data_dir, process.pid(), self.config.server.port) {
            Ok(lock) => self.state.lock = Some(lock),
            Err(e) => warn!("Backend running without a lock file: {e}"),
        }

        let lifecycle = process.lifecycle();
        self.state.process = Some(process);
        self.apply_loader(LoaderEvent::BackendStarting);
        self.start_probe(lifecycle);
    }

    fn start_probe(&mut self, lifecycle: Uuid) {
        let interval = Duration::from_millis(self.config.readiness.interval_ms);
        let max_attempts = self.config.readiness.max_attempts;
        let probe = match HttpProbe::new(&self.config.server.local_origin(), &self.config.readiness)
        {
            Ok(probe) => probe,
            Err(e) => {
                self.fail(e, None);
                return;
            }
        };

        let ready_tx = self.ready_tx.clone();

        debug!(%lifecycle, "Probing {}", probe.url());
        self.state.readiness = ReadinessState::Polling(0);
        self.state.probe_task = Some(tokio::spawn(async move {
            let outcome = poll_until_ready(&probe, interval, max_attempts).await;
            let _ = ready_tx.send((lifecycle, outcome)).await;
        }));
    }

    fn stop_probe(&mut self) {
        if let Some(task) = self.state.probe_task.take() {
            task.abort();
        }
    }

    fn on_readiness(&mut self, lifecycle: Uuid, outcome: ReadinessOutcome) {
        if self.current_lifecycle() != Some(lifecycle) {
            debug!(%lifecycle, "Dropping readiness result from a previous backend");
            return;
        }
        if self.state.readiness.is_terminal() {
            debug!(%lifecycle, "Readiness already resolved");
            return;
        }
        self.state.probe_task = None;

        match outcome {
            ReadinessOutcome::Ready { .. } => {
                self.state.readiness = ReadinessState::Ready;
                self.state.counter.reset();
                let pid = self.state.process.as_mut().map(|process| {
                    process.mark_running();
                    process.pid()
                });
                if let Some(pid) = pid {
                    self.publish(ServerState::Running {
                        port: self.config.server.port,
                        pid,
                    });
                }
            }
            ReadinessOutcome::TimedOut { attempts } => {
                self.state.readiness = ReadinessState::GivenUp;
                warn!(%lifecycle, "Backend never answered after {attempts} probes");
            }
        }

        self.apply_loader(LoaderEvent::ReadinessResolved(outcome));
    }

    fn on_process_exit(&mut self, event: ProcessExit) {
        if self.current_lifecycle() != Some(event.lifecycle) {
            debug!(lifecycle = %event.lifecycle, "Dropping exit of a previous backend");
            return;
        }
        let Some(mut process) = self.state.process.take() else {
            return;
        };

        process.mark_exited(event.exit);
        self.stop_probe();
        self.release_lock();
        self.state.loader.begin_lifecycle();

        if self.state.shutdown_requested {
            return;
        }

        let stderr = process.stderr().snapshot();
        match self
            .policy
            .on_exit(&event.exit, &mut self.state.counter, &stderr)
        {
            Decision::Ignore => {
                info!("Backend exited cleanly");
                self.publish(ServerState::Stopped);
            }
            Decision::RestartAfterDelay(delay) => {
                let attempt = self.state.counter.get();
                let crash = ServerError::ProcessCrashed {
                    code: event.exit.code,
                    signal: event.exit.signal,
                    stderr: process.stderr().tail(CRASH_LOG_STDERR_LINES),
                    location: ErrorLocation::from(Location::caller()),
                };
                warn!(
                    "{crash}; restart {attempt}/{} in {delay:?}",
                    self.policy.ceiling()
                );
                self.publish(ServerState::Restarting {
                    attempt,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                });
                self.state.restart_at = Some(Instant::now() + delay);
            }
            Decision::GiveUp(reason) => {
                let error = match reason {
                    GiveUpReason::RestartsExhausted { .. } if detect_port_conflict(&stderr) => {
                        ServerError::PortInUse {
                            port: self.config.server.port,
                            location: ErrorLocation::from(Location::caller()),
                        }
                    }
                    reason => reason.into_error(),
                };
                let detail = process.stderr().tail(DIAGNOSTIC_STDERR_LINES);
                self.fail(error, Some(detail));
            }
        }
    }

    async fn on_command(&mut self, command: SupervisorCommand) -> Flow {
        match command {
            SupervisorCommand::PageLoaded { url } => {
                self.apply_loader(LoaderEvent::PageLoaded { url });
            }
            SupervisorCommand::LoadFailed { url, error } => {
                warn!("Failed to load {url}: {error}");
                self.apply_loader(LoaderEvent::LoadFailed { url, error });
            }
            SupervisorCommand::Restart { ack } => {
                let result = self.manual_restart().await;
                let _ = ack.send(result);
            }
            SupervisorCommand::Shutdown { ack } => {
                let result = self.shutdown().await;
                let _ = ack.send(result);
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn manual_restart(&mut self) -> ServerResult<()> {
        if self.state.shutdown_requested {
            return Err(supervisor_gone());
        }

        info!("Restart requested");
        self.state.restart_at = None;
        self.stop_backend().await?;
        self.state.counter.reset();
        self.spawn_lifecycle();
        Ok(())
    }

    async fn shutdown(&mut self) -> ServerResult<()> {
        info!("Shutting down backend");
        self.state.shutdown_requested = true;
        self.state.restart_at = None;
        self.publish(ServerState::ShuttingDown);

        let result = self.stop_backend().await;
        self.publish(ServerState::Stopped);
        result
    }

    /// Terminate the current process and wait until it is confirmed gone.
    async fn stop_backend(&mut self) -> ServerResult<()> {
        self.stop_probe();
        let result = match self.state.process.take() {
            Some(mut process) => process.terminate(self.shutdown_grace()).await.map(|exit| {
                info!(
                    "Backend PID {} stopped (code {:?}, signal {:?})",
                    process.pid(),
                    exit.code,
                    exit.signal
                );
            }),
            None => Ok(()),
        };
        self.release_lock();
        result
    }

    fn release_lock(&mut self) {
        if let Some(mut lock) = self.state.lock.take() {
            lock.release();
        }
    }

    /// Terminal failure: publish it and put a diagnostic in front of the user.
    fn fail(&mut self, error: ServerError, detail: Option<String>) {
        error!("Backend failed: {error}");
        self.publish(ServerState::Failed {
            error: error.to_string(),
            hint: error.recovery_hint().to_string(),
        });
        self.apply_loader(LoaderEvent::BackendFailed(DiagnosticPage::from_error(
            &error, detail,
        )));
    }

    fn apply_loader(&mut self, event: LoaderEvent) {
        for effect in self.state.loader.handle(event) {
            match effect {
                LoaderEffect::Navigate(url) => {
                    info!("Loading {url}");
                    self.shell.navigate(&url, self.handle.clone());
                }
                LoaderEffect::RevealWindow => self.shell.reveal(),
                LoaderEffect::ShowError(page) => self.shell.show_error(&page),
            }
        }
    }
}
