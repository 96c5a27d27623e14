//! SSH error types.

use sshw_core::ClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Jump host list is cyclic or too deep.
    #[error("jump chain: {0}")]
    JumpChain(String),

    /// Every step of the authentication chain was rejected.
    #[error("authentication failed for {0}")]
    AuthenticationFailed(String),

    #[error("ssh agent: {0}")]
    Agent(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("exit status {0}")]
    ExitStatus(u32),

    #[error("scp: {0}")]
    Scp(String),

    #[error("exec `{cmd}`: {reason}")]
    Exec { cmd: String, reason: String },

    #[error("terminal: {0}")]
    Terminal(String),

    #[error("cancelled")]
    Cancelled,

    #[error("ssh protocol error: {0}")]
    Protocol(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Protocol(err.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::Key(err.to_string())
    }
}

impl From<SshError> for ClientError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::Cancelled => ClientError::Cancelled,
            SshError::Io(e) => ClientError::Io(e),
            SshError::Terminal(msg) => ClientError::Terminal(msg),
            SshError::Exec { cmd, reason } => ClientError::Exec { cmd, reason },
            other => ClientError::Session(other.to_string()),
        }
    }
}
