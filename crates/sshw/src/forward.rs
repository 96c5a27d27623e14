//! Client side of the three-socket stream forwarding.
//!
//! For one session number the forwarder opens a stdin, a stdout and a
//! stderr connection to the master, announces each with its role, and
//! pumps bytes between them and local stdio. [`forward`] only returns
//! once all three are announced, so the session request that follows
//! always finds its stdio bound.

use std::path::Path;
use std::time::Duration;

use sshw_core::{BoxReader, BoxWriter, NodeIo, SessionNum};
use sshw_protocol::{JsonProtoWriter, Request, StdRole};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CliError, Result};

/// How long [`Forwarder::close`] lets pending output drain.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Inspects every chunk read from local stdin before it is sent.
pub type InputFilter = Box<dyn FnMut(&[u8]) + Send>;

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;

/// Running pumps for one session.
pub struct Forwarder {
    num: SessionNum,
    cancel: CancellationToken,
    stdin: Option<JoinHandle<()>>,
    outputs: Vec<JoinHandle<()>>,
}

/// Binds the three stdio connections for `num` and starts pumping.
pub async fn forward(
    socket: &Path,
    num: SessionNum,
    io: NodeIo,
    filters: Vec<InputFilter>,
) -> Result<Forwarder> {
    let (stdin_conn, stdout_conn, stderr_conn) = tokio::try_join!(
        announce(socket, StdRole::Stdin, num),
        announce(socket, StdRole::Stdout, num),
        announce(socket, StdRole::Stderr, num),
    )?;
    debug!(num = %num, "stdio bound");

    let NodeIo {
        stdin,
        stdout,
        stderr,
    } = io;
    let cancel = CancellationToken::new();

    let stdin = tokio::spawn(pump_stdin(stdin, stdin_conn, filters, cancel.clone()));
    let outputs = vec![
        tokio::spawn(pump_output(stdout_conn, stdout, StdRole::Stdout)),
        tokio::spawn(pump_output(stderr_conn, stderr, StdRole::Stderr)),
    ];

    Ok(Forwarder {
        num,
        cancel,
        stdin: Some(stdin),
        outputs,
    })
}

async fn announce(socket: &Path, role: StdRole, num: SessionNum) -> Result<UnixStream> {
    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|e| CliError::socket(socket, e))?;
    let request = Request::new(role.path(), &num)?;
    JsonProtoWriter::new(&mut stream).write(&request).await?;
    Ok(stream)
}

async fn pump_stdin(
    mut local: BoxReader,
    mut conn: UnixStream,
    mut filters: Vec<InputFilter>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = local.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("local stdin closed");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "local stdin read failed");
                    break;
                }
            },
        };
        for filter in filters.iter_mut() {
            filter(&buf[..n]);
        }
        if let Err(e) = conn.write_all(&buf[..n]).await {
            debug!(error = %e, "stdin socket closed by master");
            break;
        }
    }
    // Half-close so the remote side sees EOF.
    let _ = conn.shutdown().await;
}

async fn pump_output(mut conn: UnixStream, mut local: BoxWriter, role: StdRole) {
    if let Err(e) = tokio::io::copy(&mut conn, &mut local).await {
        debug!(role = ?role, error = %e, "output forwarding stopped");
    }
    let _ = local.flush().await;
}

impl Forwarder {
    pub fn num(&self) -> SessionNum {
        self.num
    }

    /// Stops reading local stdin, then waits briefly for output to drain.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(stdin) = self.stdin.take() {
            let _ = stdin.await;
        }
        for output in std::mem::take(&mut self.outputs) {
            let abort = output.abort_handle();
            if tokio::time::timeout(DRAIN_TIMEOUT, output).await.is_err() {
                debug!("output did not drain in time");
                abort.abort();
            }
        }
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.cancel.cancel();
        for output in &self.outputs {
            output.abort();
        }
    }
}

/// Calls `on_interrupt` the first time a read consists of a lone Ctrl-C
/// or Ctrl-D.
pub fn interrupt_filter<F>(on_interrupt: F) -> InputFilter
where
    F: FnOnce() + Send + 'static,
{
    let mut pending = Some(on_interrupt);
    Box::new(move |chunk: &[u8]| {
        if matches!(chunk, [CTRL_C] | [CTRL_D]) {
            if let Some(fire) = pending.take() {
                fire();
            }
        }
    })
}
