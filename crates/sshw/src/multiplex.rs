//! A [`Client`] that runs sessions inside the master daemon.
//!
//! Local work (pre/post commands, terminal mode) is delegated to a wrapped
//! local client; copies and shells are sent to the master, with local stdio
//! forwarded over three extra connections.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sshw_core::{Client, ClientError, Node, NodeIo, Resizer, SessionNum, WindowCallback};
use sshw_protocol::{
    ChangeWindowRequest, ClientRequest, Request, Response, SocketReader, SocketWriter,
    PATH_CANCEL, PATH_CREATE_CONN, PATH_SCP, PATH_TERMINAL,
};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};
use crate::forward::{forward, interrupt_filter, Forwarder, InputFilter};
use crate::stdin::local_stdio;

/// Produces the local stdio bound to each forwarded session.
pub type StdioSource = Arc<dyn Fn() -> NodeIo + Send + Sync>;

async fn connect(socket: &Path) -> Result<(SocketReader, SocketWriter)> {
    let stream = UnixStream::connect(socket)
        .await
        .map_err(|e| CliError::socket(socket, e))?;
    Ok(sshw_protocol::split(stream))
}

/// Sends one request and decodes the data of a successful reply.
pub async fn rpc<T: DeserializeOwned>(socket: &Path, request: &Request) -> Result<T> {
    let (mut reader, mut writer) = connect(socket).await?;
    writer.write(request).await?;
    let response: Response = reader.read().await?;
    if !response.body.is_ok() {
        return Err(ClientError::Remote(response.body.message).into());
    }
    Ok(response.body.decode_data()?)
}

/// Asks the master for a fresh session number.
pub async fn get_num(socket: &Path) -> Result<SessionNum> {
    rpc(socket, &Request::bare(PATH_CREATE_CONN)).await
}

/// Asks the master to cancel the copy running for `num`.
pub async fn send_cancel(socket: &Path, num: SessionNum) -> Result<()> {
    let request = Request::new(PATH_CANCEL, &ClientRequest::cancel(num))?;
    let _: String = rpc(socket, &request).await?;
    Ok(())
}

/// Reads the final reply of a session request.
///
/// A failure carries the master's message verbatim behind `Error at <op>`.
pub async fn read_success(
    reader: &mut SocketReader,
    op: &str,
) -> std::result::Result<(), ClientError> {
    let response: Response = reader
        .read()
        .await
        .map_err(|e| ClientError::Remote(format!("Error at {op}: {e}")))?;
    if response.body.is_ok() {
        Ok(())
    } else {
        Err(ClientError::Remote(format!(
            "Error at {op}: {}",
            response.body.message
        )))
    }
}

/// Opens a session: binds stdio, then sends the session request.
async fn open_session(
    socket: &Path,
    stdio: &StdioSource,
    path: &str,
    node: Node,
    filters: Vec<InputFilter>,
) -> Result<(Forwarder, SocketReader, SocketWriter)> {
    let num = get_num(socket).await?;
    let forwarder = forward(socket, num, stdio(), filters).await?;

    let (reader, mut writer) = connect(socket).await?;
    writer
        .write(&Request::new(path, &ClientRequest::new(num, node))?)
        .await?;
    info!(num = %num, path, "Session opened on master");
    Ok((forwarder, reader, writer))
}

pub struct MultiplexClient<C> {
    local: C,
    node: Node,
    socket: PathBuf,
    stdio: StdioSource,
}

impl<C: Client> MultiplexClient<C> {
    /// Wraps `local`, forwarding the process's own stdio.
    pub fn new(local: C, socket: impl Into<PathBuf>) -> Self {
        Self::with_stdio(local, socket, Arc::new(local_stdio))
    }

    pub fn with_stdio(local: C, socket: impl Into<PathBuf>, stdio: StdioSource) -> Self {
        let node = local.node().clone();
        Self {
            local,
            node,
            socket: socket.into(),
            stdio,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }
}

#[async_trait]
impl<C: Client + 'static> Client for MultiplexClient<C> {
    type Handle = C::Handle;

    async fn execs_pre(&mut self) -> std::result::Result<(), ClientError> {
        self.local.execs_pre().await?;
        // Exported variables may have changed the expanded node.
        self.node = self.local.node().clone();
        Ok(())
    }

    fn can_connect(&self) -> bool {
        self.local.can_connect()
    }

    /// The master dials on demand.
    async fn connect(&mut self) -> std::result::Result<(), ClientError> {
        Ok(())
    }

    fn init_terminal(&mut self) -> std::result::Result<(), ClientError> {
        self.local.init_terminal()
    }

    fn recover_terminal(&mut self) {
        self.local.recover_terminal();
    }

    /// Resizes travel on the terminal session's control connection instead.
    fn watch_window_change(&mut self, _on_change: WindowCallback) {}

    fn resizer(&self) -> Resizer {
        self.local.resizer()
    }

    async fn scp(&mut self, cancel: CancellationToken) -> std::result::Result<(), ClientError> {
        if self.node.scps.is_empty() {
            return Ok(());
        }

        let interrupted = CancellationToken::new();
        let trigger = interrupted.clone();
        let filters = vec![interrupt_filter(move || trigger.cancel())];
        let (forwarder, mut reader, _writer) =
            open_session(&self.socket, &self.stdio, PATH_SCP, self.node.clone(), filters).await?;

        let socket = self.socket.clone();
        let num = forwarder.num();
        let finished = CancellationToken::new();
        let watcher = {
            let finished = finished.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = finished.cancelled() => return,
                    _ = interrupted.cancelled() => {}
                    _ = cancel.cancelled() => {}
                }
                info!(num = %num, "Cancelling copy");
                if let Err(e) = send_cancel(&socket, num).await {
                    warn!(error = %e, "Cancel request failed");
                }
            })
        };

        let result = read_success(&mut reader, "scp").await;
        finished.cancel();
        let _ = watcher.await;
        forwarder.close().await;
        result
    }

    async fn shell(&mut self) -> std::result::Result<(), ClientError> {
        let mut node = self.node.clone();
        if let Some(size) = sshw_ssh::terminal::size() {
            node.window = Some(size);
        }

        let (forwarder, mut reader, mut writer) =
            open_session(&self.socket, &self.stdio, PATH_TERMINAL, node, Vec::new()).await?;

        let (resize_tx, mut resize_rx) = mpsc::unbounded_channel();
        self.local.watch_window_change(Box::new(move |size| {
            resize_tx
                .send(size)
                .map_err(|_| ClientError::Session("terminal session ended".to_string()))
        }));
        let relay = tokio::spawn(async move {
            while let Some(size) = resize_rx.recv().await {
                if let Err(e) = writer.write(&ChangeWindowRequest::from(size)).await {
                    debug!(error = %e, "Resize relay stopped");
                    break;
                }
            }
        });

        let result = read_success(&mut reader, "shell").await;
        relay.abort();
        forwarder.close().await;
        result
    }

    async fn execs_post(&mut self) -> std::result::Result<(), ClientError> {
        self.local.execs_post().await
    }

    async fn close(&mut self) -> std::result::Result<(), ClientError> {
        self.local.close().await
    }

    /// The master pings its cached connections itself; this only checks
    /// that the master answers.
    async fn ping(&mut self) -> std::result::Result<(), ClientError> {
        if sshw_protocol::is_running(&self.socket).await {
            Ok(())
        } else {
            Err(ClientError::Session(format!(
                "master not running at {}",
                self.socket.display()
            )))
        }
    }

    fn get_client(&self) -> Option<Self::Handle> {
        self.local.get_client()
    }

    fn set_client(&mut self, handle: Self::Handle) {
        self.local.set_client(handle);
    }

    fn node(&self) -> &Node {
        &self.node
    }
}
