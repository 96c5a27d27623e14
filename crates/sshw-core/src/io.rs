//! Byte streams bound to a client session.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The standard streams a client reads from and writes to.
///
/// For a direct invocation these are the process's own stdio. Inside the
/// master daemon they are the sockets bound for one session number.
pub struct NodeIo {
    pub stdin: BoxReader,
    pub stdout: BoxWriter,
    pub stderr: BoxWriter,
}

impl NodeIo {
    pub fn new(stdin: BoxReader, stdout: BoxWriter, stderr: BoxWriter) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }

    /// Uses tokio's process stdio.
    pub fn stdio() -> Self {
        Self::new(
            Box::new(tokio::io::stdin()),
            Box::new(tokio::io::stdout()),
            Box::new(tokio::io::stderr()),
        )
    }

    /// Streams that read nothing and discard all output.
    ///
    /// Used for cached template clients that only carry a connection handle.
    pub fn detached() -> Self {
        Self::new(
            Box::new(tokio::io::empty()),
            Box::new(tokio::io::sink()),
            Box::new(tokio::io::sink()),
        )
    }
}

impl fmt::Debug for NodeIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIo").finish_non_exhaustive()
    }
}
