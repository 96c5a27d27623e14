//! Error type for client operations.

use thiserror::Error;

/// Errors surfaced by [`crate::Client`] implementations.
///
/// The dispatcher reports `to_string()` of these back to the invoking
/// client, so messages are written for the end user.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The node has nothing to dial (pre-exec only node).
    #[error("server: should run local")]
    ShouldRunLocal,

    /// An operation needs an established connection.
    #[error("{op} must start client")]
    NotConnected { op: &'static str },

    /// Dial, handshake or authentication failure.
    #[error("connect {identity}: {reason}")]
    Connect { identity: String, reason: String },

    /// Remote session or channel failure.
    #[error("{0}")]
    Session(String),

    /// A local command failed.
    #[error("exec `{cmd}`: {reason}")]
    Exec { cmd: String, reason: String },

    /// Terminal setup failed.
    #[error("terminal: {0}")]
    Terminal(String),

    /// Failure reported by the master daemon, verbatim.
    #[error("{0}")]
    Remote(String),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn session<E: std::fmt::Display>(err: E) -> Self {
        Self::Session(err.to_string())
    }
}
