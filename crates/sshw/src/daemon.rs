//! Master daemon bootstrap for the sshw client.
//!
//! Provides pid file helpers and starts the master in the background when
//! no live one answers on the control socket.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};

/// How long the client waits for a freshly spawned master.
pub const START_TIMEOUT: Duration = Duration::from_secs(1);

/// Interval between liveness checks while waiting.
pub const START_POLL_INTERVAL: Duration = Duration::from_millis(30);

/// How a session will be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Through the master daemon.
    Multiplexed,
    /// In-process, with a connection of its own.
    Direct,
}

/// Reads the pid recorded by a running master.
pub fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn write_pid(path: &Path, pid: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pid.to_string())
}

/// Checks if a process with the given PID exists.
pub fn is_process_running(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Starts `<current exe> server start -d` detached from this terminal.
///
/// The master daemonizes itself and records its own pid.
pub fn spawn_daemon() -> Result<()> {
    let exe = std::env::current_exe().map_err(|e| CliError::Spawn(e.to_string()))?;
    debug!(path = %exe.display(), "Starting master");

    Command::new(&exe)
        .args(["server", "start", "-d"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| CliError::Spawn(format!("{}: {e}", exe.display())))?;
    Ok(())
}

/// Polls the control socket until it answers or `timeout` passes.
pub async fn wait_until_running(socket: &Path, timeout: Duration, interval: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if sshw_protocol::is_running(socket).await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Makes sure a master answers on `socket`, starting one with `spawn` if
/// needed. Returns [`Mode::Direct`] when none becomes live in time; a
/// failed spawn is logged, not fatal.
pub async fn ensure_daemon<S>(socket: &Path, spawn: S) -> Mode
where
    S: FnOnce() -> Result<()>,
{
    if sshw_protocol::is_running(socket).await {
        debug!("Master already running");
        return Mode::Multiplexed;
    }

    info!(socket = %socket.display(), "Master not running, starting it");
    if let Err(e) = spawn() {
        warn!(error = %e, "Could not start master");
        return Mode::Direct;
    }

    if wait_until_running(socket, START_TIMEOUT, START_POLL_INTERVAL).await {
        info!("Master started");
        Mode::Multiplexed
    } else {
        warn!(timeout = ?START_TIMEOUT, "Master did not come up");
        Mode::Direct
    }
}
