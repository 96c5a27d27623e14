//! [`Client`] implementation backed by russh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sshw_core::{
    expand_node, Client, ClientError, ClientFactory, Node, NodeIo, Resizer, WindowCallback,
    WindowSize,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dial::{self, SshConnection};
use crate::error::SshError;
use crate::{exec, scp, shell, terminal};

/// A client for one node.
///
/// The connection is shared through [`Client::get_client`] so the master
/// daemon can hand it to later sessions for the same identity.
pub struct SshClient {
    node: Node,
    io: NodeIo,
    conn: Option<Arc<SshConnection>>,
    window: WindowSize,
    raw_mode: bool,
    resize_tx: Resizer,
    resize_rx: mpsc::UnboundedReceiver<WindowSize>,
    watcher: Option<JoinHandle<()>>,
}

impl SshClient {
    pub fn new(node: Node, io: NodeIo) -> Self {
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        let window = node.window.unwrap_or_default();
        Self {
            node,
            io,
            conn: None,
            window,
            raw_mode: false,
            resize_tx,
            resize_rx,
            watcher: None,
        }
    }

    fn connection(&self, op: &'static str) -> Result<Arc<SshConnection>, ClientError> {
        self.conn.clone().ok_or(ClientError::NotConnected { op })
    }

    async fn banner(&mut self) -> Result<(), ClientError> {
        let line = format!(
            "connect server ssh -p {} {}@{} version: {}\n",
            self.node.port(),
            self.node.user(),
            self.node.host,
            env!("CARGO_PKG_VERSION"),
        );
        self.io.stdout.write_all(line.as_bytes()).await?;
        self.io.stdout.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Client for SshClient {
    type Handle = Arc<SshConnection>;

    async fn execs_pre(&mut self) -> Result<(), ClientError> {
        if exec::run_execs(&self.node.execs_pre, &mut self.io.stdout).await? {
            expand_node(&mut self.node);
        }
        Ok(())
    }

    fn can_connect(&self) -> bool {
        self.node.can_connect()
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        self.banner().await?;
        let conn = dial::dial(&self.node)
            .await
            .map_err(|e| ClientError::Connect {
                identity: self.node.identity(),
                reason: e.to_string(),
            })?;
        self.conn = Some(Arc::new(conn));
        Ok(())
    }

    fn init_terminal(&mut self) -> Result<(), ClientError> {
        if !terminal::stdin_is_tty() {
            info!("stdin is not a terminal, leaving mode unchanged");
            return Ok(());
        }
        if let Some(size) = terminal::size() {
            self.window = size;
        }
        terminal::enable_raw_mode()?;
        self.raw_mode = true;
        Ok(())
    }

    fn recover_terminal(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if self.raw_mode {
            terminal::disable_raw_mode();
            self.raw_mode = false;
        }
    }

    fn watch_window_change(&mut self, on_change: WindowCallback) {
        if let Some(previous) = self.watcher.take() {
            previous.abort();
        }
        self.watcher = Some(terminal::spawn_window_watcher(self.window, on_change));
    }

    fn resizer(&self) -> Resizer {
        self.resize_tx.clone()
    }

    async fn scp(&mut self, cancel: CancellationToken) -> Result<(), ClientError> {
        if self.node.scps.is_empty() {
            return Ok(());
        }
        let conn = self.connection("scp")?;

        for cp in &self.node.scps {
            let job = scp::copy(conn.handle(), cp, &mut self.io.stdout);
            let limited = async {
                if cp.timeout == 0 {
                    return job.await;
                }
                tokio::time::timeout(Duration::from_secs(cp.timeout), job)
                    .await
                    .map_err(|_| {
                        SshError::Scp(format!("{} timed out after {}s", cp.src, cp.timeout))
                    })?
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(src = %cp.src, "scp cancelled");
                    return Err(ClientError::Cancelled);
                }
                result = limited => {
                    result?;
                }
            }
        }
        Ok(())
    }

    async fn shell(&mut self) -> Result<(), ClientError> {
        let conn = self.connection("shell")?;
        shell::run_shell(
            conn.handle(),
            &mut self.io,
            self.window,
            &mut self.resize_rx,
            self.node.callback_shells.clone(),
        )
        .await?;
        Ok(())
    }

    async fn execs_post(&mut self) -> Result<(), ClientError> {
        exec::run_execs(&self.node.execs_stop, &mut self.io.stdout).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        match self.conn.take() {
            Some(conn) => conn.close().await.map_err(ClientError::from),
            None => Ok(()),
        }
    }

    async fn ping(&mut self) -> Result<(), ClientError> {
        let conn = self.connection("ping")?;
        conn.ping().await?;
        Ok(())
    }

    fn get_client(&self) -> Option<Self::Handle> {
        self.conn.clone()
    }

    fn set_client(&mut self, handle: Self::Handle) {
        self.conn = Some(handle);
    }

    fn node(&self) -> &Node {
        &self.node
    }
}

impl Drop for SshClient {
    fn drop(&mut self) {
        self.recover_terminal();
    }
}

/// Builds [`SshClient`]s for the master daemon.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshClientFactory;

impl ClientFactory for SshClientFactory {
    type Client = SshClient;

    fn new_client(&self, node: Node, io: NodeIo) -> SshClient {
        SshClient::new(node, io)
    }
}
