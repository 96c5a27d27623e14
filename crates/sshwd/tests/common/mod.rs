//! Shared fixtures for daemon integration tests.
//!
//! `FakeFactory` builds clients that never touch the network: connecting
//! mints a numbered fake connection, the shell echoes stdin to stdout and
//! reports resizes, and scp blocks until cancelled.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use sshw_core::{
    Client, ClientError, ClientFactory, Node, NodeCp, NodeIo, Resizer, SessionNum, WindowCallback,
    WindowSize,
};
use sshw_protocol::{
    ClientRequest, Request, Response, SocketReader, SocketWriter, StdRole, PATH_CREATE_CONN,
};
use sshwd::master::{MasterConfig, MasterHandler};
use sshwd::registry::{spawn_registry, RegistryConfig};
use sshwd::server::{DaemonServer, ServerError};

/// Maximum time to wait for the server socket to answer
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Interval between liveness checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Fake Clients
// ============================================================================

#[derive(Debug, Default)]
pub struct Stats {
    pub dials: AtomicU64,
    pub closes: AtomicU64,
    pub fail_ping: AtomicBool,
}

impl Stats {
    pub fn dials(&self) -> u64 {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct FakeConn {
    pub id: u64,
    alive: AtomicBool,
}

pub struct FakeClient {
    node: Node,
    io: NodeIo,
    conn: Option<Arc<FakeConn>>,
    stats: Arc<Stats>,
    resize_tx: Resizer,
    resize_rx: mpsc::UnboundedReceiver<WindowSize>,
}

impl FakeClient {
    async fn say(&mut self, line: &str) -> Result<(), ClientError> {
        self.io.stdout.write_all(line.as_bytes()).await?;
        self.io.stdout.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Client for FakeClient {
    type Handle = Arc<FakeConn>;

    async fn execs_pre(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    fn can_connect(&self) -> bool {
        self.node.can_connect()
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        let id = self.stats.dials.fetch_add(1, Ordering::SeqCst) + 1;
        self.conn = Some(Arc::new(FakeConn {
            id,
            alive: AtomicBool::new(true),
        }));
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
        if self.conn.is_none() {
            return Err(ClientError::NotConnected { op: "scp" });
        }
        self.say("copying\n").await?;
        tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            _ = sleep(Duration::from_secs(10)) => Ok(()),
        }
    }

    async fn shell(&mut self) -> Result<(), ClientError> {
        let conn = self
            .conn
            .clone()
            .ok_or(ClientError::NotConnected { op: "shell" })?;
        let banner = format!("{} conn={}\n", self.node.host, conn.id);
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
        Ok(())
    }

    async fn execs_post(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        if let Some(conn) = self.conn.take() {
            conn.alive.store(false, Ordering::SeqCst);
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), ClientError> {
        let alive = self
            .conn
            .as_ref()
            .is_some_and(|conn| conn.alive.load(Ordering::SeqCst));
        if !alive || self.stats.fail_ping.load(Ordering::SeqCst) {
            return Err(ClientError::Session("keepalive failed".to_string()));
        }
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

#[derive(Clone, Default)]
pub struct FakeFactory {
    pub stats: Arc<Stats>,
}

impl ClientFactory for FakeFactory {
    type Client = FakeClient;

    fn new_client(&self, node: Node, io: NodeIo) -> FakeClient {
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        FakeClient {
            node,
            io,
            conn: None,
            stats: Arc::clone(&self.stats),
            resize_tx,
            resize_rx,
        }
    }
}

// ============================================================================
// Test Server
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
pub struct TestServer {
    pub socket_path: PathBuf,
    pub cancel_token: CancellationToken,
    pub stats: Arc<Stats>,
    pub master: Arc<MasterHandler<FakeFactory>>,
    task: JoinHandle<Result<(), ServerError>>,
    _temp_dir: TempDir,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(RegistryConfig::default(), MasterConfig::default()).await
    }

    pub async fn spawn_with(registry: RegistryConfig, master: MasterConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("sshw.socket");

        let factory = FakeFactory::default();
        let stats = Arc::clone(&factory.stats);
        let master = Arc::new(MasterHandler::new(factory, spawn_registry(registry), master));
        let cancel_token = CancellationToken::new();

        let server = DaemonServer::new(&socket_path, Arc::clone(&master), cancel_token.clone());
        let task = tokio::spawn(async move { server.run().await });

        wait_until_running(&socket_path).await;

        Self {
            socket_path,
            cancel_token,
            stats,
            master,
            task,
            _temp_dir: temp_dir,
        }
    }

    /// Cancels the server and returns what `run` returned.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        self.cancel_token.cancel();
        self.task.await.expect("server task")
    }
}

pub async fn wait_until_running(path: &Path) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < SOCKET_WAIT_TIMEOUT {
        if sshw_protocol::is_running(path).await {
            return;
        }
        sleep(SOCKET_POLL_INTERVAL).await;
    }
    panic!("server socket did not answer within {SOCKET_WAIT_TIMEOUT:?}");
}

// ============================================================================
// Wire Helpers
// ============================================================================

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

/// Writes one record directly on a raw stream.
pub async fn send_raw_request(stream: &mut UnixStream, request: &Request) {
    let mut line = serde_json::to_vec(request).expect("encode request");
    line.push(b'\n');
    stream.write_all(&line).await.expect("write request");
}

/// Opens a connection and sends `request` as its first record.
pub async fn open(path: &Path, request: &Request) -> (SocketReader, SocketWriter) {
    let stream = UnixStream::connect(path).await.expect("connect");
    let (reader, mut writer) = sshw_protocol::split(stream);
    writer.write(request).await.expect("write request");
    (reader, writer)
}

/// One request, one response.
pub async fn call(path: &Path, request: &Request) -> Response {
    let (mut reader, _writer) = open(path, request).await;
    reader.read::<Response>().await.expect("read response")
}

pub async fn create_conn(path: &Path) -> SessionNum {
    let response = call(path, &Request::bare(PATH_CREATE_CONN)).await;
    assert!(response.body.is_ok(), "createConn failed: {}", response.body.message);
    response.body.decode_data().expect("session num")
}

/// The client ends of one session's three stream sockets.
pub struct Streams {
    pub stdin: UnixStream,
    pub stdout: BufReader<UnixStream>,
    pub stderr: BufReader<UnixStream>,
}

impl Streams {
    pub async fn bind(path: &Path, num: SessionNum) -> Self {
        let mut bound = Vec::new();
        for role in StdRole::ALL {
            let mut stream = UnixStream::connect(path).await.expect("connect std");
            let request = Request::new(role.path(), &num).expect("std request");
            send_raw_request(&mut stream, &request).await;
            bound.push(stream);
        }
        let stderr = bound.pop().expect("stderr");
        let stdout = bound.pop().expect("stdout");
        let stdin = bound.pop().expect("stdin");
        Self {
            stdin,
            stdout: BufReader::new(stdout),
            stderr: BufReader::new(stderr),
        }
    }

    pub async fn stdout_line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.stdout.read_line(&mut line))
            .await
            .expect("stdout line in time")
            .expect("read stdout");
        line
    }

    pub async fn stdout_to_end(&mut self) -> String {
        let mut rest = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.stdout.read_to_string(&mut rest))
            .await
            .expect("stdout closed in time")
            .expect("read stdout");
        rest
    }
}

pub fn session_request(path: &str, num: SessionNum, node: Node) -> Request {
    Request::new(path, &ClientRequest::new(num, node)).expect("session request")
}

/// Runs a whole terminal session that types `input` and returns
/// everything written to stdout plus the final response.
pub async fn run_terminal(path: &Path, node: Node, input: &[u8]) -> (String, Response) {
    let num = create_conn(path).await;
    let mut streams = Streams::bind(path, num).await;
    let (mut control, _writer) =
        open(path, &session_request(sshw_protocol::PATH_TERMINAL, num, node)).await;

    streams.stdin.write_all(input).await.expect("write stdin");
    streams.stdin.shutdown().await.expect("close stdin");

    let output = streams.stdout_to_end().await;
    let response = control.read::<Response>().await.expect("terminal response");
    (output, response)
}
