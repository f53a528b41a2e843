//! Backend child process: spawn, output draining, exit watching, termination.

use crate::server::{LaunchSpec, ServerError, ServerResult, StderrBuffer};

use std::panic::Location;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_location::ErrorLocation;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest output line kept; the rest of an over-long line is discarded.
const MAX_LINE_BYTES: usize = 8 * 1024;
/// How long to wait for the OS to reap a force-killed child.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);
/// How long after exit to keep reading stderr that is still buffered in the pipe.
const STDERR_FLUSH_WAIT: Duration = Duration::from_millis(500);

/// How a backend process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// Exit notification delivered to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub lifecycle: Uuid,
    pub exit: ExitInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Exited(ExitInfo),
    Killed,
}

/// Handle to the one live backend process.
///
/// The child itself is owned by the exit watcher task. Dropping the handle
/// without calling [`BackendProcess::terminate`] still kills the child.
pub struct BackendProcess {
    lifecycle: Uuid,
    pid: u32,
    started_at: DateTime<Utc>,
    state: ProcessState,
    stderr: StderrBuffer,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl BackendProcess {
    /// Spawn the backend described by `launch`.
    ///
    /// The executable is checked before spawning so a bad install surfaces as
    /// `BinaryNotFound`/`NotExecutable` rather than an opaque OS error.
    pub fn start(
        launch: &LaunchSpec,
        stderr_capacity: usize,
        exit_tx: mpsc::Sender<ProcessExit>,
    ) -> ServerResult<Self> {
        preflight(&launch.command)?;

        let lifecycle = Uuid::new_v4();
        let mut cmd = tokio::process::Command::new(&launch.command);
        cmd.args(&launch.args)
            .envs(&launch.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &launch.working_dir {
            cmd.current_dir(dir);
        }

        // Own process group, so the PyInstaller bootloader and its worker are signalled together
        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        #[cfg(windows)]
        {
            use windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        let mut child = cmd.spawn().map_err(|source| ServerError::ProcessSpawn {
            path: launch.command.clone(),
            source,
            location: ErrorLocation::from(Location::caller()),
        })?;

        let Some(pid) = child.id() else {
            return Err(ServerError::ProcessSpawn {
                path: launch.command.clone(),
                source: std::io::Error::other("spawned backend has no PID"),
                location: ErrorLocation::from(Location::caller()),
            });
        };
        info!(
            %lifecycle,
            "Spawned backend {} with PID {pid}",
            launch.command.display()
        );

        let stderr = StderrBuffer::new(stderr_capacity);

        if let Some(out) = child.stdout.take() {
            tokio::spawn(drain_lines(out, move |line| {
                info!(target: "backend", %lifecycle, "{line}");
            }));
        }

        let stderr_drain = child.stderr.take().map(|err| {
            let buffer = stderr.clone();
            tokio::spawn(drain_lines(err, move |line| {
                info!(target: "backend", %lifecycle, stream = "stderr", "{line}");
                buffer.push_line(line);
            }))
        });

        let (exit_watch_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // Explicit kill request, or the handle was dropped
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        debug!(%lifecycle, "start_kill failed: {e}");
                    }
                    child.wait().await
                }
            };

            let exit = match status {
                Ok(status) => ExitInfo::from_status(status),
                Err(e) => {
                    warn!(%lifecycle, "Failed to wait for backend: {e}");
                    ExitInfo {
                        code: None,
                        signal: None,
                    }
                }
            };

            // Exit classification reads the buffer, so let the last lines land first
            if let Some(drain) = stderr_drain
                && tokio::time::timeout(STDERR_FLUSH_WAIT, drain).await.is_err()
            {
                debug!(%lifecycle, "stderr still open after exit");
            }

            info!(%lifecycle, "Backend exited: code={:?} signal={:?}", exit.code, exit.signal);
            let _ = exit_watch_tx.send(Some(exit));
            let _ = exit_tx.send(ProcessExit { lifecycle, exit }).await;
        });

        Ok(Self {
            lifecycle,
            pid,
            started_at: Utc::now(),
            state: ProcessState::Starting,
            stderr,
            exit_rx,
            kill_tx: Some(kill_tx),
        })
    }

    pub fn lifecycle(&self) -> Uuid {
        self.lifecycle
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn stderr(&self) -> &StderrBuffer {
        &self.stderr
    }

    pub fn mark_running(&mut self) {
        if self.state == ProcessState::Starting {
            self.state = ProcessState::Running;
        }
    }

    pub fn mark_exited(&mut self, exit: ExitInfo) {
        if self.state != ProcessState::Killed {
            self.state = ProcessState::Exited(exit);
        }
    }

    /// Exit info if the watcher has already confirmed exit.
    pub fn try_exit(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Wait until the exit watcher confirms the process is gone.
    pub async fn wait_exit(&mut self) -> Option<ExitInfo> {
        match self.exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        }
    }

    /// Ask the backend to stop, force-killing it after `grace`.
    pub async fn terminate(&mut self, grace: Duration) -> ServerResult<ExitInfo> {
        if let Some(exit) = self.try_exit() {
            self.mark_exited(exit);
            return Ok(exit);
        }

        info!(lifecycle = %self.lifecycle, "Terminating backend PID {} (grace {grace:?})", self.pid);
        self.request_graceful_stop();

        if let Ok(Some(exit)) = tokio::time::timeout(grace, self.wait_exit()).await {
            self.state = ProcessState::Killed;
            return Ok(exit);
        }

        warn!(lifecycle = %self.lifecycle, "Backend ignored termination, force killing PID {}", self.pid);
        self.force_kill();

        match tokio::time::timeout(FORCE_KILL_WAIT, self.wait_exit()).await {
            Ok(Some(exit)) => {
                self.state = ProcessState::Killed;
                Ok(exit)
            }
            _ => Err(ServerError::ShutdownTimeout {
                grace_ms: u64::try_from((grace + FORCE_KILL_WAIT).as_millis()).unwrap_or(u64::MAX),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }

    fn request_graceful_stop(&self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;
            signal_group(self.pid, Signal::SIGTERM);
        }

        #[cfg(windows)]
        {
            use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};

            info!("Sending CTRL_BREAK to pid {}", self.pid);
            unsafe {
                GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, self.pid);
            }
        }
    }

    fn force_kill(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;
            signal_group(self.pid, Signal::SIGKILL);
        }

        #[cfg(windows)]
        {
            std::process::Command::new("taskkill")
                .args(["/T", "/F", "/PID", &self.pid.to_string()])
                .output()
                .ok();
        }

        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}

impl std::fmt::Debug for BackendProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendProcess")
            .field("lifecycle", &self.lifecycle)
            .field("pid", &self.pid)
            .field("started_at", &self.started_at)
            .field("state", &self.state)
            .finish()
    }
}

/// Check the executable exists and is runnable before handing it to the OS.
pub fn preflight(path: &Path) -> ServerResult<()> {
    let metadata = std::fs::metadata(path).map_err(|_| ServerError::BinaryNotFound {
        path: path.to_path_buf(),
        location: ErrorLocation::from(Location::caller()),
    })?;

    if !metadata.is_file() {
        return Err(ServerError::NotExecutable {
            path: path.to_path_buf(),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ServerError::NotExecutable {
                path: path.to_path_buf(),
                location: ErrorLocation::from(Location::caller()),
            });
        }
    }

    Ok(())
}

/// Send `signal` to the process group led by `pid`.
#[cfg(unix)]
pub(crate) fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    debug!("Sending {signal} to process group {pid}");
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        debug!("killpg({pid}, {signal}) failed: {e}");
    }
}

/// Drain a child stream line by line without ever blocking the child.
async fn drain_lines<R, F>(stream: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let mut overflowed = false;

    loop {
        match lines.next().await {
            Some(Ok(line)) => on_line(line.trim_end_matches('\r')),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                debug!(target: "backend", "Discarded output line longer than {MAX_LINE_BYTES} bytes");
                overflowed = true;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                debug!(target: "backend", "Output stream closed: {e}");
                break;
            }
            // A decode error ends the stream once; the codec keeps discarding
            // the rest of the long line when polled again
            None if overflowed => overflowed = false,
            None => break,
        }
    }
}
