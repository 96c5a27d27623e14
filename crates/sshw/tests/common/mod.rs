//! Fixtures for client-side integration tests.
//!
//! `RemoteFactory` is the master's view: clients that never dial, a shell
//! that echoes stdin and reports resizes, and a copy that waits to be
//! cancelled. `LocalFake` is the local half wrapped by `MultiplexClient`
//! and records every call made on it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sshw_cli::multiplex::StdioSource;
use sshw_core::{
    Client, ClientError, ClientFactory, Node, NodeCp, NodeIo, Resizer, WindowCallback, WindowSize,
};
use sshwd::master::{MasterConfig, MasterHandler};
use sshwd::registry::{spawn_registry, RegistryConfig};
use sshwd::server::{DaemonServer, ServerError};

// ============================================================================
// Master-side fake
// ============================================================================

pub struct RemoteClient {
    node: Node,
    io: NodeIo,
    conn: Option<u64>,
    dials: Arc<AtomicU64>,
    resize_tx: Resizer,
    resize_rx: mpsc::UnboundedReceiver<WindowSize>,
}

impl RemoteClient {
    async fn say(&mut self, line: &str) -> Result<(), ClientError> {
        self.io.stdout.write_all(line.as_bytes()).await?;
        self.io.stdout.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Client for RemoteClient {
    type Handle = u64;

    async fn execs_pre(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    fn can_connect(&self) -> bool {
        self.node.can_connect()
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        self.conn = Some(self.dials.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(())
    }

    fn init_terminal(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    fn recover_terminal(&mut self) {}

    fn watch_window_change(&mut self, _on_change: WindowCallback) {}

    fn resizer(&self) -> Resizer {
        self.resize_tx.clone()
    }

    async fn scp(&mut self, cancel: CancellationToken) -> Result<(), ClientError> {
        if self.node.scps.is_empty() {
            return Ok(());
        }
        let line = format!("copying {}\n", self.node.scps[0].src);
        self.say(&line).await?;
        tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(()),
        }
    }

    async fn shell(&mut self) -> Result<(), ClientError> {
        let conn = self.conn.ok_or(ClientError::NotConnected { op: "shell" })?;
        let banner = format!("{} conn={}\n", self.node.host, conn);
        self.say(&banner).await?;

        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                n = self.io.stdin.read(&mut buf) => {
                    let n = n?;
                    if n == 0 {
                        break;
                    }
                    self.io.stdout.write_all(&buf[..n]).await?;
                    self.io.stdout.flush().await?;
                }
                Some(size) = self.resize_rx.recv() => {
                    let line = format!("resize {}x{}\n", size.cols, size.rows);
                    self.say(&line).await?;
                }
            }
        }

        self.io.stderr.write_all(b"bye\n").await?;
        self.io.stderr.flush().await?;
        if self.node.host == "failing" {
            return Err(ClientError::Session("exit status 3".to_string()));
        }
        Ok(())
    }

    async fn execs_post(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.conn = None;
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), ClientError> {
        self.conn
            .map(|_| ())
            .ok_or_else(|| ClientError::Session("keepalive failed".to_string()))
    }

    fn get_client(&self) -> Option<u64> {
        self.conn
    }

    fn set_client(&mut self, handle: u64) {
        self.conn = Some(handle);
    }

    fn node(&self) -> &Node {
        &self.node
    }
}

#[derive(Clone, Default)]
pub struct RemoteFactory {
    pub dials: Arc<AtomicU64>,
}

impl ClientFactory for RemoteFactory {
    type Client = RemoteClient;

    fn new_client(&self, node: Node, io: NodeIo) -> RemoteClient {
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        RemoteClient {
            node,
            io,
            conn: None,
            dials: Arc::clone(&self.dials),
            resize_tx,
            resize_rx,
        }
    }
}

// ============================================================================
// Local fake
// ============================================================================

pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

pub struct LocalFake {
    node: Node,
    pub log: CallLog,
    pub window_callback: Arc<Mutex<Option<WindowCallback>>>,
    /// Replaces `node.host` during `execs_pre`, as an exported variable would.
    pub host_after_pre: Option<String>,
    pub fail_shell: bool,
    resize_tx: Resizer,
}

impl LocalFake {
    pub fn new(node: Node) -> Self {
        let (resize_tx, _resize_rx) = mpsc::unbounded_channel();
        Self {
            node,
            log: Arc::default(),
            window_callback: Arc::default(),
            host_after_pre: None,
            fail_shell: false,
            resize_tx,
        }
    }

    fn record(&self, call: &'static str) {
        self.log.lock().unwrap().push(call);
    }

    pub fn calls(log: &CallLog) -> Vec<&'static str> {
        log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Client for LocalFake {
    type Handle = ();

    async fn execs_pre(&mut self) -> Result<(), ClientError> {
        self.record("execs_pre");
        if let Some(host) = self.host_after_pre.take() {
            self.node.host = host;
        }
        Ok(())
    }

    fn can_connect(&self) -> bool {
        self.node.can_connect()
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        self.record("connect");
        Ok(())
    }

    fn init_terminal(&mut self) -> Result<(), ClientError> {
        self.record("init_terminal");
        Ok(())
    }

    fn recover_terminal(&mut self) {
        self.record("recover_terminal");
    }

    fn watch_window_change(&mut self, on_change: WindowCallback) {
        self.record("watch_window_change");
        *self.window_callback.lock().unwrap() = Some(on_change);
    }

    fn resizer(&self) -> Resizer {
        self.resize_tx.clone()
    }

    async fn scp(&mut self, _cancel: CancellationToken) -> Result<(), ClientError> {
        self.record("scp");
        Ok(())
    }

    async fn shell(&mut self) -> Result<(), ClientError> {
        self.record("shell");
        if self.fail_shell {
            return Err(ClientError::Session("exit status 1".to_string()));
        }
        Ok(())
    }

    async fn execs_post(&mut self) -> Result<(), ClientError> {
        self.record("execs_post");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.record("close");
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    fn get_client(&self) -> Option<()> {
        None
    }

    fn set_client(&mut self, _handle: ()) {}

    fn node(&self) -> &Node {
        &self.node
    }
}

// ============================================================================
// Test master
// ============================================================================

pub struct TestMaster {
    pub socket_path: PathBuf,
    pub cancel_token: CancellationToken,
    pub factory: RemoteFactory,
    pub master: Arc<MasterHandler<RemoteFactory>>,
    task: JoinHandle<Result<(), ServerError>>,
    _temp_dir: TempDir,
}

impl TestMaster {
    pub async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("sshw.socket");

        let factory = RemoteFactory::default();
        let master = Arc::new(MasterHandler::new(
            factory.clone(),
            spawn_registry(RegistryConfig::default()),
            MasterConfig::default(),
        ));
        let cancel_token = CancellationToken::new();

        let server = DaemonServer::new(&socket_path, Arc::clone(&master), cancel_token.clone());
        let task = tokio::spawn(async move { server.run().await });

        let up = sshw_cli::daemon::wait_until_running(
            &socket_path,
            Duration::from_secs(1),
            Duration::from_millis(10),
        )
        .await;
        assert!(up, "test master did not come up");

        Self {
            socket_path,
            cancel_token,
            factory,
            master,
            task,
            _temp_dir: temp_dir,
        }
    }

    pub fn dials(&self) -> u64 {
        self.factory.dials.load(Ordering::SeqCst)
    }

    pub async fn shutdown(self) -> Result<(), ServerError> {
        self.cancel_token.cancel();
        self.task.await.expect("server task")
    }
}

// ============================================================================
// Local stdio
// ============================================================================

/// The test's ends of a forwarded session's stdio.
pub struct Terminal {
    pub stdin: DuplexStream,
    pub stdout: DuplexStream,
    pub stderr: DuplexStream,
}

impl Terminal {
    pub async fn read_stdout_until(&mut self, needle: &str) -> String {
        read_until(&mut self.stdout, needle).await
    }

    pub async fn read_stderr_until(&mut self, needle: &str) -> String {
        read_until(&mut self.stderr, needle).await
    }
}

async fn read_until(stream: &mut DuplexStream, needle: &str) -> String {
    let mut seen = Vec::new();
    let mut buf = [0u8; 256];
    let read = async {
        while !String::from_utf8_lossy(&seen).contains(needle) {
            let n = stream.read(&mut buf).await.expect("read local output");
            assert!(
                n > 0,
                "stream closed before {needle:?}; got {:?}",
                String::from_utf8_lossy(&seen)
            );
            seen.extend_from_slice(&buf[..n]);
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}"));
    String::from_utf8_lossy(&seen).into_owned()
}

/// A stdio source handing out one set of in-memory streams.
pub fn in_memory_stdio() -> (StdioSource, Terminal) {
    let (stdin_local, stdin_test) = tokio::io::duplex(4096);
    let (stdout_local, stdout_test) = tokio::io::duplex(4096);
    let (stderr_local, stderr_test) = tokio::io::duplex(4096);

    let slot = Mutex::new(Some(NodeIo::new(
        Box::new(stdin_local),
        Box::new(stdout_local),
        Box::new(stderr_local),
    )));
    let source: StdioSource =
        Arc::new(move || slot.lock().unwrap().take().unwrap_or_else(NodeIo::detached));

    (
        source,
        Terminal {
            stdin: stdin_test,
            stdout: stdout_test,
            stderr: stderr_test,
        },
    )
}

pub fn node(host: &str) -> Node {
    let mut node = Node::new(host, "tester");
    node.name = host.to_string();
    node
}

pub fn copy_node(host: &str) -> Node {
    let mut node = node(host);
    node.scps.push(NodeCp {
        src: "/tmp/a".to_string(),
        tgt: "/tmp/b".to_string(),
        ..Default::default()
    });
    node
}

pub async fn wait_for_callback(slot: &Arc<Mutex<Option<WindowCallback>>>) -> WindowCallback {
    for _ in 0..500 {
        if let Some(cb) = slot.lock().unwrap().take() {
            return cb;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("window callback never registered");
}

pub fn socket_in(dir: &Path) -> PathBuf {
    dir.join("sshw.socket")
}
