//! Unix socket server for the sshw master daemon.
//!
//! The server:
//! - Listens on the control socket, recovering from a stale socket file
//! - Spawns a ConnectionHandler for each connection
//! - Isolates each connection task so a panic never reaches the accept loop
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   DaemonServer  │
//! │                 │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  MasterHandler  │────▶│ RegistryHandle  │
//! │ (per connection)│     │    (shared)     │     │                 │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Server errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, FIRST_REQUEST_TIMEOUT};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sshw_core::ClientFactory;

use crate::master::MasterHandler;

/// Bind attempts before giving up on a socket path that keeps reappearing.
const MAX_BIND_ATTEMPTS: usize = 3;

/// Unix socket server for the master daemon.
pub struct DaemonServer<F: ClientFactory> {
    /// Path to the Unix socket
    socket_path: PathBuf,

    /// Dispatcher shared by all connections
    master: Arc<MasterHandler<F>>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    connection_counter: AtomicU64,
}

impl<F: ClientFactory> DaemonServer<F> {
    /// Creates a new daemon server.
    ///
    /// # Arguments
    ///
    /// * `socket_path` - Path where the Unix socket will be created
    /// * `master` - Dispatcher serving each connection
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        socket_path: impl Into<PathBuf>,
        master: Arc<MasterHandler<F>>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            master,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server.
    ///
    /// Listens for connections until the cancellation token is triggered,
    /// then removes the socket file.
    ///
    /// # Errors
    ///
    /// - `ServerError::AlreadyRunning` if another daemon answers on the path
    /// - `ServerError::SocketSetup` if the socket cannot be created
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;

        info!(
            socket = %self.socket_path.display(),
            "Master daemon listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    /// Binds the listener, removing a stale socket file left by a dead daemon.
    async fn bind(&self) -> Result<UnixListener, ServerError> {
        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| self.setup_error(e))?;
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match UnixListener::bind(&self.socket_path) {
                Ok(listener) => return Ok(listener),
                Err(e) if e.kind() == ErrorKind::AddrInUse && attempt < MAX_BIND_ATTEMPTS => {
                    if sshw_protocol::is_running(&self.socket_path).await {
                        return Err(ServerError::AlreadyRunning {
                            path: self.socket_path.clone(),
                        });
                    }
                    warn!(
                        socket = %self.socket_path.display(),
                        "Removing stale socket file"
                    );
                    match std::fs::remove_file(&self.socket_path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(self.setup_error(e)),
                    }
                }
                Err(e) => return Err(self.setup_error(e)),
            }
        }
    }

    /// Spawns a handler task for one connection.
    ///
    /// The handler runs inside its own task so a panic is reported as a
    /// `JoinError` here instead of unwinding into the accept loop.
    fn handle_connection(&self, stream: UnixStream, connection_number: u64) {
        let master = Arc::clone(&self.master);

        tokio::spawn(async move {
            let handler = ConnectionHandler::new(stream, master, connection_number);
            let task = tokio::spawn(handler.run());

            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(connection = connection_number, "Connection closed without request");
                }
                Ok(Err(e)) => {
                    warn!(connection = connection_number, error = %e, "Connection rejected");
                }
                Err(e) if e.is_panic() => {
                    error!(connection = connection_number, "Connection handler panicked");
                }
                Err(e) => {
                    debug!(connection = connection_number, error = %e, "Connection task cancelled");
                }
            }
        });
    }

    fn setup_error(&self, error: std::io::Error) -> ServerError {
        ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: error.to_string(),
        }
    }

    /// Performs cleanup on shutdown.
    fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("master already running on {path}")]
    AlreadyRunning { path: PathBuf },
}
