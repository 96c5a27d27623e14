//! Connection handler for individual control connections.
//!
//! Each accepted socket gets its own `ConnectionHandler` that:
//! - Reads the first request record under a timeout
//! - Hands the connection, with whatever it already buffered, to the master
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use sshw_core::ClientFactory;
use sshw_protocol::{ProtocolError, Request, Response};

use crate::master::MasterHandler;

/// How long a fresh connection may stay silent before its first request.
pub const FIRST_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that end a connection before it reaches the master.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no request within {0:?}")]
    Timeout(Duration),

    #[error("connection closed before first request")]
    Eof,

    #[error("invalid first request: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Handler for a single control connection.
pub struct ConnectionHandler<F: ClientFactory> {
    stream: UnixStream,
    master: Arc<MasterHandler<F>>,
    connection_number: u64,
}

impl<F: ClientFactory> ConnectionHandler<F> {
    pub fn new(stream: UnixStream, master: Arc<MasterHandler<F>>, connection_number: u64) -> Self {
        Self {
            stream,
            master,
            connection_number,
        }
    }

    /// Runs the connection to completion.
    ///
    /// A malformed first record is answered with a failure response before
    /// the socket closes; silence or EOF just closes it.
    pub async fn run(self) -> Result<(), ConnectionError> {
        let connection = self.connection_number;
        let (mut reader, mut writer) = sshw_protocol::split(self.stream);

        let request = match timeout(FIRST_REQUEST_TIMEOUT, reader.read::<Request>()).await {
            Ok(Ok(request)) => request,
            Ok(Err(ProtocolError::Eof)) => return Err(ConnectionError::Eof),
            Ok(Err(e)) => {
                let _ = writer.write(&Response::fail(e.to_string())).await;
                return Err(e.into());
            }
            Err(_) => return Err(ConnectionError::Timeout(FIRST_REQUEST_TIMEOUT)),
        };

        debug!(connection, path = %request.path, "Received request");
        self.master.dispatch(request, reader, writer).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "no request within 30s");

        let err: ConnectionError = ProtocolError::decode("expected value").into();
        assert!(err.to_string().starts_with("invalid first request"));
    }
}
