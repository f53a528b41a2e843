//! Lock file recording the live backend, used to reap orphans after a shell crash.

use crate::server::{ServerError, ServerResult};

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

use error_location::ErrorLocation;
use tracing::{info, warn};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

const LOCK_FILENAME: &str = "backend.lock";
const LOCK_FILE_MODE: u32 = 0o600; // Owner read/write only
const ORPHAN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock file naming the shell and the backend it currently runs.
///
/// Contains JSON with both PIDs, the port and the start time. A lock whose
/// shell is dead but whose backend is alive marks an orphaned backend
/// still holding the port.
pub struct LockFile {
    path: PathBuf,
    file: Option<File>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LockInfo {
    pub shell_pid: u32,
    pub backend_pid: u32,
    pub port: u16,
    pub started_at: String,
}

impl LockFile {
    /// Clear a lock left behind by a previous shell.
    ///
    /// Errors with `AlreadyRunning` if that shell is still alive. An orphaned
    /// backend from a dead shell is terminated within `grace`, then killed.
    pub async fn reap_stale(data_dir: &Path, grace: Duration) -> ServerResult<Option<LockInfo>> {
        let path = data_dir.join(LOCK_FILENAME);
        if !path.exists() {
            return Ok(None);
        }

        let existing = match Self::read_lock_info(&path) {
            Ok(info) => info,
            Err(e) => {
                warn!("Removing unreadable lock file {}: {e}", path.display());
                std::fs::remove_file(&path).ok();
                return Ok(None);
            }
        };

        if existing.shell_pid != std::process::id() && is_process_running(existing.shell_pid) {
            return Err(ServerError::AlreadyRunning {
                path,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if is_process_running(existing.backend_pid) {
            warn!(
                "Reaping orphaned backend PID {} on port {}",
                existing.backend_pid, existing.port
            );
            terminate_orphan(existing.backend_pid, grace).await;
        } else {
            info!(
                "Removing stale lock file (PID {} not running)",
                existing.backend_pid
            );
        }

        std::fs::remove_file(&path).ok();
        Ok(Some(existing))
    }

    /// Record the freshly spawned backend.
    pub fn acquire(data_dir: &Path, backend_pid: u32, port: u16) -> ServerResult<Self> {
        let path = data_dir.join(LOCK_FILENAME);

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(LOCK_FILE_MODE);

        let file = options
            .open(&path)
            .map_err(|e| ServerError::LockAcquisition {
                path: path.clone(),
                source: e,
                location: ErrorLocation::from(Location::caller()),
            })?;

        let mut lock = Self {
            path,
            file: Some(file),
        };

        lock.write_info(backend_pid, port)?;

        Ok(lock)
    }

    fn write_info(&mut self, backend_pid: u32, port: u16) -> ServerResult<()> {
        let info = LockInfo {
            shell_pid: std::process::id(),
            backend_pid,
            port,
            started_at: chrono::Utc::now().to_rfc3339(),
        };

        let content = serde_json::to_string_pretty(&info)
            .map_err(|e| ServerError::from(std::io::Error::other(e)))?;

        if let Some(ref mut file) = self.file {
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        Ok(())
    }

    pub fn read_lock_info(path: &Path) -> Result<LockInfo, std::io::Error> {
        let mut file = File::open(path)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock file.
    ///
    /// Called automatically on drop, but can be called
    /// explicitly for graceful shutdown.
    pub fn release(&mut self) {
        if self.file.take().is_some() {
            std::fs::remove_file(&self.path).ok();
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL a process we no longer own.
async fn terminate_orphan(pid: u32, grace: Duration) {
    #[cfg(unix)]
    {
        use crate::server::process::signal_group;
        use nix::sys::signal::Signal;

        signal_group(pid, Signal::SIGTERM);

        let start = tokio::time::Instant::now();
        while start.elapsed() < grace {
            if !is_process_running(pid) {
                info!("Orphaned backend {pid} exited");
                return;
            }
            tokio::time::sleep(ORPHAN_POLL_INTERVAL).await;
        }

        warn!("Orphaned backend {pid} ignored SIGTERM, killing");
        signal_group(pid, Signal::SIGKILL);
    }

    #[cfg(windows)]
    {
        let _ = grace;
        std::process::Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .output()
            .ok();
    }
}

/// Check if a process with given PID is running.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // kill(pid, 0) returns 0 if process exists, -1 otherwise
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Check if a process with given PID is running (Windows).
#[cfg(windows)]
pub fn is_process_running(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }

        let mut exit_code: u32 = 0;
        let result = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle);

        result != 0 && exit_code == STILL_ACTIVE as u32
    }
}
