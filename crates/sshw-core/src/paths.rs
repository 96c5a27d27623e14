//! Well-known file locations.
//!
//! Everything lives under `~/.config/sshw` unless `SSHW_DIR` points
//! elsewhere. `SSHW_SOCKET` overrides only the control socket.

use std::path::PathBuf;

const APP_DIR: &str = "sshw";
const SOCKET_FILE: &str = "sshw.socket";
const PID_FILE: &str = "sshw.pid";
const LOG_FILE: &str = "sshw.log";
const CLIENT_LOG_FILE: &str = "sshw-client.log";
const SERVER_CONFIG_FILE: &str = "server.toml";

/// State directory holding the socket, pid and log files.
pub fn sshw_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("SSHW_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
}

/// Control socket of the master daemon.
pub fn socket_path() -> PathBuf {
    std::env::var_os("SSHW_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|| sshw_dir().join(SOCKET_FILE))
}

pub fn pid_path() -> PathBuf {
    sshw_dir().join(PID_FILE)
}

/// Daemon log, also the daemon's stdout/stderr when backgrounded.
pub fn log_path() -> PathBuf {
    sshw_dir().join(LOG_FILE)
}

pub fn client_log_path() -> PathBuf {
    sshw_dir().join(CLIENT_LOG_FILE)
}

pub fn server_config_path() -> PathBuf {
    sshw_dir().join(SERVER_CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert!(pid_path().ends_with(PID_FILE));
        assert!(log_path().ends_with(LOG_FILE));
        assert!(client_log_path().ends_with(CLIENT_LOG_FILE));
        assert!(server_config_path().ends_with(SERVER_CONFIG_FILE));
    }

    #[test]
    fn test_files_share_directory() {
        assert_eq!(pid_path().parent(), log_path().parent());
    }
}
