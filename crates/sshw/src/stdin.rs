//! Local stdin that can be abandoned mid-read.
//!
//! `tokio::io::stdin()` parks a runtime blocking thread in `read(2)`;
//! dropping the future does not unblock it, and the runtime then waits for
//! that thread on shutdown. The descriptor behind fd 0 is never switched to
//! non-blocking mode: on a terminal it is the same open file description as
//! stdout and stderr, and their writes would start failing with `EAGAIN`.
//!
//! A terminal is instead reopened through `/dev/tty`, which yields a private
//! description that can be polled with [`AsyncFd`]. Anything else is read
//! by a detached thread feeding a channel, so dropping the reader only
//! drops the receiving end.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::thread;

use sshw_core::{BoxReader, NodeIo};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

const CONTROLLING_TTY: &str = "/dev/tty";
const THREAD_CHUNK: usize = 8192;

/// Polled reader over a freshly opened, non-blocking descriptor.
#[derive(Debug)]
pub struct TtyReader {
    inner: AsyncFd<File>,
}

impl TtyReader {
    /// Opens `path` for reading with its own file status flags.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(path)?;
        Ok(Self {
            inner: AsyncFd::new(file)?,
        })
    }
}

impl AsyncRead for TtyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Reads a blocking source on a detached thread.
///
/// The thread ends after EOF, a read error, or the first read that
/// completes once the reader has been dropped.
#[derive(Debug)]
pub struct ThreadReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    done: bool,
}

impl ThreadReader {
    pub fn spawn<R>(mut source: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(4);
        thread::Builder::new()
            .name("sshw-stdin".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; THREAD_CHUNK];
                loop {
                    let chunk = match source.read(&mut buf) {
                        Ok(0) => return,
                        Ok(n) => Ok(buf[..n].to_vec()),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => Err(e),
                    };
                    let failed = chunk.is_err();
                    if tx.blocking_send(chunk).is_err() || failed {
                        return;
                    }
                }
            })?;
        Ok(Self {
            rx,
            pending: Vec::new(),
            done: false,
        })
    }
}

impl AsyncRead for ThreadReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pending.is_empty() && !self.done {
            match ready!(self.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => self.done = true,
            }
        }
        let n = self.pending.len().min(buf.remaining());
        buf.put_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Poll::Ready(Ok(()))
    }
}

/// The process stdin as a reader that can be dropped mid-read.
pub fn stdin_reader() -> BoxReader {
    if io::stdin().is_terminal() {
        match TtyReader::open(CONTROLLING_TTY) {
            Ok(reader) => return Box::new(reader),
            Err(e) => debug!(error = %e, "cannot reopen terminal, reading stdin on a thread"),
        }
    }
    match ThreadReader::spawn(io::stdin()) {
        Ok(reader) => Box::new(reader),
        Err(e) => {
            debug!(error = %e, "stdin thread unavailable, using blocking reads");
            Box::new(tokio::io::stdin())
        }
    }
}

/// Process stdio with a cancellable stdin.
pub fn local_stdio() -> NodeIo {
    NodeIo::new(
        stdin_reader(),
        Box::new(tokio::io::stdout()),
        Box::new(tokio::io::stderr()),
    )
}
