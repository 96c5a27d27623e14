//! Error types for the sshw client library.
//!
//! **Panic-Free Policy:** no `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()` or `todo!()` outside tests.

use std::io;
use std::path::PathBuf;

use sshw_core::ClientError;
use sshw_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    /// None of the default config files exist.
    #[error("no config file found (tried {0})")]
    ConfigNotFound(String),

    #[error("read {path}: {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("parse {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("write {path}: {source}")]
    ConfigWrite { path: PathBuf, source: io::Error },

    #[error("serialize merged config: {0}")]
    ConfigSerialize(serde_yaml::Error),

    #[error("no node named {0:?}")]
    NodeNotFound(String),

    #[error("parse {input}: {reason}")]
    InvalidScpTarget { input: String, reason: String },

    /// The control socket refused or dropped a connection.
    #[error("master at {path}: {source}")]
    Socket { path: PathBuf, source: io::Error },

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    /// The master could not be started.
    #[error("failed to start master: {0}")]
    Spawn(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    pub fn socket(path: &std::path::Path, source: io::Error) -> Self {
        Self::Socket {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<CliError> for ClientError {
    fn from(err: CliError) -> Self {
        match err {
            CliError::Client(inner) => inner,
            other => ClientError::Session(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
