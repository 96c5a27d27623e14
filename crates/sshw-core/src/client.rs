//! The client contract shared by direct, multiplexed and daemon-side sessions.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::io::NodeIo;
use crate::node::{Node, WindowSize};

/// Sender that applies terminal size changes to a running shell.
pub type Resizer = mpsc::UnboundedSender<WindowSize>;

/// Callback invoked with the new size whenever the local terminal changes.
///
/// Returning an error stops the watcher.
pub type WindowCallback = Box<dyn FnMut(WindowSize) -> Result<(), ClientError> + Send>;

/// Operations the orchestrator and the master dispatcher drive.
///
/// Implementations own their [`Node`] and [`NodeIo`]. The dispatcher never
/// inspects SSH internals; it only moves the opaque [`Client::Handle`]
/// between wrappers when reusing a cached connection.
#[async_trait]
pub trait Client: Send {
    /// Shareable handle to an established connection.
    type Handle: Clone + Send + Sync + 'static;

    /// Runs pre-login local commands.
    async fn execs_pre(&mut self) -> Result<(), ClientError>;

    /// Whether there is anything to dial.
    fn can_connect(&self) -> bool;

    /// Dials and authenticates.
    async fn connect(&mut self) -> Result<(), ClientError>;

    /// Puts the local terminal in raw mode and records its size.
    fn init_terminal(&mut self) -> Result<(), ClientError>;

    /// Restores the local terminal. Safe to call without `init_terminal`.
    fn recover_terminal(&mut self);

    /// Starts watching the local terminal size.
    fn watch_window_change(&mut self, on_change: WindowCallback);

    /// Sender feeding size changes into the shell started by [`Client::shell`].
    fn resizer(&self) -> Resizer;

    /// Runs the configured copy jobs, aborting when `cancel` fires.
    async fn scp(&mut self, cancel: CancellationToken) -> Result<(), ClientError>;

    /// Runs an interactive shell to completion.
    async fn shell(&mut self) -> Result<(), ClientError>;

    /// Runs post-logout local commands.
    async fn execs_post(&mut self) -> Result<(), ClientError>;

    /// Closes the underlying connection.
    async fn close(&mut self) -> Result<(), ClientError>;

    /// Application-level keepalive check.
    async fn ping(&mut self) -> Result<(), ClientError>;

    fn get_client(&self) -> Option<Self::Handle>;

    fn set_client(&mut self, handle: Self::Handle);

    fn node(&self) -> &Node;
}

/// Builds clients for the master dispatcher.
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Client + 'static;

    fn new_client(&self, node: Node, io: NodeIo) -> Self::Client;
}
