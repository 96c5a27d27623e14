//! Local commands run around a session.

use std::process::Stdio;

use sshw_core::NodeExec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::SshError;

/// Runs `execs` in order through `$SHELL -c`, stopping at the first failure.
///
/// Each command line is echoed to `out` before it runs. Stdout and stderr
/// of the command both go to `out`. A command with `var` set exports its
/// stdout, minus trailing newlines, into the process environment.
///
/// Returns whether any variable was exported, in which case the caller
/// should re-expand its node.
pub async fn run_execs<W>(execs: &[NodeExec], out: &mut W) -> Result<bool, SshError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut exported = false;
    for exec in execs {
        let captured = run_one(exec, out).await?;
        if !exec.var.is_empty() {
            let value = captured.trim_end_matches('\n');
            debug!(var = %exec.var, "Exporting command output");
            std::env::set_var(&exec.var, value);
            exported = true;
        }
    }
    Ok(exported)
}

fn shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

async fn run_one<W>(exec: &NodeExec, out: &mut W) -> Result<String, SshError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let failed = |reason: String| SshError::Exec {
        cmd: exec.cmd.clone(),
        reason,
    };

    out.write_all(format!("{}\n", exec.cmd).as_bytes()).await?;
    out.flush().await?;
    info!(cmd = %exec.cmd, "Running local command");

    let mut child = Command::new(shell())
        .arg("-c")
        .arg(&exec.cmd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| failed(e.to_string()))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];
    let mut captured = Vec::new();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            n = read_some(&mut stdout, &mut out_buf), if stdout.is_some() => {
                let n = n?;
                if n == 0 {
                    stdout = None;
                } else {
                    out.write_all(&out_buf[..n]).await?;
                    captured.extend_from_slice(&out_buf[..n]);
                }
            }
            n = read_some(&mut stderr, &mut err_buf), if stderr.is_some() => {
                let n = n?;
                if n == 0 {
                    stderr = None;
                } else {
                    out.write_all(&err_buf[..n]).await?;
                }
            }
        }
        out.flush().await?;
    }

    let status = child.wait().await?;
    if !status.success() {
        let reason = match status.code() {
            Some(code) => format!("exit status {code}"),
            None => "killed by signal".to_string(),
        };
        return Err(failed(reason));
    }
    Ok(String::from_utf8_lossy(&captured).into_owned())
}

async fn read_some<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}
