//! Interactive shell over a PTY channel.

use russh::client::Handle;
use russh::{ChannelMsg, Pty};
use sshw_core::{NodeCallbackShell, NodeIo, WindowSize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::callback::{self, OutputMatcher};
use crate::dial::ClientHandler;
use crate::error::SshError;

const TERM: &str = "xterm";
const TTY_SPEED: u32 = 14400;

/// Runs a login shell until the remote side closes the channel.
///
/// Local stdin is forwarded until EOF, which is passed on to the remote
/// side. Sizes received on `resizes` become window-change requests. A
/// non-zero exit status is returned as [`SshError::ExitStatus`].
///
/// `callbacks` are typed in once the shell is up; a script that stops on
/// an error pattern is reported on stderr and leaves the shell open.
pub async fn run_shell(
    handle: &Handle<ClientHandler>,
    io: &mut NodeIo,
    size: WindowSize,
    resizes: &mut mpsc::UnboundedReceiver<WindowSize>,
    callbacks: Vec<NodeCallbackShell>,
) -> Result<(), SshError> {
    let mut channel = handle.channel_open_session().await?;
    channel
        .request_pty(
            false,
            TERM,
            u32::from(size.cols),
            u32::from(size.rows),
            0,
            0,
            &[
                (Pty::ECHO, 1),
                (Pty::TTY_OP_ISPEED, TTY_SPEED),
                (Pty::TTY_OP_OSPEED, TTY_SPEED),
            ],
        )
        .await?;
    channel.request_shell(false).await?;
    info!(cols = size.cols, rows = size.rows, "Shell started");

    let mut buf = vec![0u8; 8192];
    let mut stdin_open = true;
    let mut exit_status = None;

    let matcher = OutputMatcher::default();
    let (script_tx, mut script_rx) = mpsc::channel(4);
    let mut script_running = !callbacks.is_empty();
    let script = callback::run_script(callbacks, matcher.clone(), script_tx);
    tokio::pin!(script);

    loop {
        tokio::select! {
            read = io.stdin.read(&mut buf), if stdin_open => {
                match read? {
                    0 => {
                        debug!("Local stdin closed");
                        stdin_open = false;
                        channel.eof().await?;
                    }
                    n => channel.data(&buf[..n]).await?,
                }
            }
            result = &mut script, if script_running => {
                script_running = false;
                if let Err(e) = result {
                    warn!(error = %e, "Callback shells stopped");
                    let line = format!("\r\ncallback shell: {e}\r\n");
                    io.stderr.write_all(line.as_bytes()).await?;
                    io.stderr.flush().await?;
                }
            }
            Some(cmd) = script_rx.recv() => channel.data(&cmd[..]).await?,
            Some(size) = resizes.recv() => {
                debug!(cols = size.cols, rows = size.rows, "Window change");
                channel
                    .window_change(u32::from(size.cols), u32::from(size.rows), 0, 0)
                    .await?;
            }
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    matcher.feed(&data);
                    io.stdout.write_all(&data).await?;
                    io.stdout.flush().await?;
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    io.stderr.write_all(&data).await?;
                    io.stderr.flush().await?;
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                    exit_status = Some(status);
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
        }
    }

    info!(exit_status = ?exit_status, "Shell finished");
    match exit_status {
        Some(status) if status != 0 => Err(SshError::ExitStatus(status)),
        _ => Ok(()),
    }
}
