use crate::server::{LockFile, LockInfo, ServerError, is_process_running};

use std::time::Duration;

use googletest::assert_that;
use googletest::prelude::{eq, none, some};
use tempfile::TempDir;

const GRACE: Duration = Duration::from_millis(500);
const LOCK_FILENAME: &str = "backend.lock";

fn write_lock(dir: &TempDir, info: &LockInfo) {
    std::fs::write(
        dir.path().join(LOCK_FILENAME),
        serde_json::to_string(info).unwrap(),
    )
    .unwrap();
}

/// A PID that has already exited.
fn dead_pid() -> u32 {
    let mut child = std::process::Command::new(std::env::current_exe().unwrap())
        .arg("--help")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

// =========================================================================
// Acquire / Release
// =========================================================================

#[test]
fn given_data_dir_when_lock_acquired_then_info_recorded() {
    // Given
    let temp = TempDir::new().unwrap();

    // When
    let lock = LockFile::acquire(temp.path(), 4242, 8000).unwrap();

    // Then
    let info = LockFile::read_lock_info(lock.path()).unwrap();
    assert_that!(info.shell_pid, eq(std::process::id()));
    assert_that!(info.backend_pid, eq(4242));
    assert_that!(info.port, eq(8000));
    assert!(!info.started_at.is_empty());
}

#[test]
fn given_acquired_lock_when_released_then_file_removed() {
    let temp = TempDir::new().unwrap();
    let mut lock = LockFile::acquire(temp.path(), 4242, 8000).unwrap();
    let path = lock.path().to_path_buf();

    lock.release();

    assert!(!path.exists());
}

#[test]
fn given_acquired_lock_when_dropped_then_file_removed() {
    let temp = TempDir::new().unwrap();
    let path = {
        let lock = LockFile::acquire(temp.path(), 4242, 8000).unwrap();
        lock.path().to_path_buf()
    };

    assert!(!path.exists());
}

#[cfg(unix)]
#[test]
fn given_new_lock_when_acquired_then_owner_only_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let lock = LockFile::acquire(temp.path(), 1, 8000).unwrap();

    let mode = std::fs::metadata(lock.path()).unwrap().permissions().mode();
    assert_that!(mode & 0o777, eq(0o600));
}

// =========================================================================
// Stale Lock Reaping
// =========================================================================

#[tokio::test]
async fn given_no_lock_when_reaped_then_nothing_found() {
    let temp = TempDir::new().unwrap();

    let reaped = LockFile::reap_stale(temp.path(), GRACE).await.unwrap();

    assert_that!(reaped, none());
}

#[tokio::test]
async fn given_lock_with_dead_processes_when_reaped_then_removed() {
    // Given
    let temp = TempDir::new().unwrap();
    let info = LockInfo {
        shell_pid: dead_pid(),
        backend_pid: dead_pid(),
        port: 8000,
        started_at: "2026-01-01T00:00:00Z".into(),
    };
    write_lock(&temp, &info);

    // When
    let reaped = LockFile::reap_stale(temp.path(), GRACE).await.unwrap();

    // Then
    assert_that!(reaped, some(eq(&info)));
    assert!(!temp.path().join(LOCK_FILENAME).exists());
}

#[tokio::test]
async fn given_unreadable_lock_when_reaped_then_removed() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(LOCK_FILENAME), "{ not json").unwrap();

    let reaped = LockFile::reap_stale(temp.path(), GRACE).await.unwrap();

    assert_that!(reaped, none());
    assert!(!temp.path().join(LOCK_FILENAME).exists());
}

#[cfg(unix)]
#[tokio::test]
async fn given_lock_from_live_shell_when_reaped_then_already_running() {
    // Given: pid 1 is always alive and never this test process
    let temp = TempDir::new().unwrap();
    write_lock(
        &temp,
        &LockInfo {
            shell_pid: 1,
            backend_pid: dead_pid(),
            port: 8000,
            started_at: "2026-01-01T00:00:00Z".into(),
        },
    );

    // When
    let result = LockFile::reap_stale(temp.path(), GRACE).await;

    // Then
    assert!(matches!(result, Err(ServerError::AlreadyRunning { .. })));
    assert!(temp.path().join(LOCK_FILENAME).exists());
}

#[cfg(unix)]
#[tokio::test]
async fn given_orphaned_backend_when_reaped_then_terminated() {
    // Given: a backend in its own group, left behind by a dead shell
    use std::os::unix::process::CommandExt;

    let temp = TempDir::new().unwrap();
    let mut orphan = std::process::Command::new("sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .unwrap();
    let orphan_pid = orphan.id();
    write_lock(
        &temp,
        &LockInfo {
            shell_pid: dead_pid(),
            backend_pid: orphan_pid,
            port: 8000,
            started_at: "2026-01-01T00:00:00Z".into(),
        },
    );

    // When
    let reaped = LockFile::reap_stale(temp.path(), GRACE).await.unwrap();

    // Then
    let status = orphan.wait().unwrap();
    assert!(!status.success());
    assert_that!(reaped.map(|info| info.backend_pid), some(eq(orphan_pid)));
    assert!(!temp.path().join(LOCK_FILENAME).exists());
}

#[test]
fn given_own_pid_when_checked_then_running() {
    assert!(is_process_running(std::process::id()));
    assert!(!is_process_running(0));
}
