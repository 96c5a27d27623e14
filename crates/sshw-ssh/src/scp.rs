//! Single-file SCP over an exec channel.
//!
//! The remote end runs `scp -t` (sink) or `scp -f` (source). Each control
//! record is answered by one status byte: 0 ok, 1 warning, 2 fatal, the
//! latter two followed by a message line.

use std::path::{Path, PathBuf};

use russh::client::Handle;
use sshw_core::NodeCp;
use tokio::fs::File;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, info};

use crate::dial::ClientHandler;
use crate::error::SshError;

const CHUNK: usize = 32 * 1024;
const FILE_MODE: &str = "0644";

/// Copies one file described by `cp` over a new channel on `handle`.
///
/// Progress goes to `progress`. Returns the number of bytes copied.
pub async fn copy<W>(
    handle: &Handle<ClientHandler>,
    cp: &NodeCp,
    progress: &mut W,
) -> Result<u64, SshError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let channel = handle.channel_open_session().await?;
    let command = remote_command(cp);
    debug!(command = %command, "Starting remote scp");
    channel.exec(true, command).await?;

    let mut stream = BufReader::new(channel.into_stream());
    let copied = if cp.is_receive {
        receive(&mut stream, Path::new(&cp.tgt), progress).await?
    } else {
        let local = Path::new(&cp.src);
        let name = match parse_file_name(&cp.tgt) {
            "" => local_file_name(local)?,
            name => name.to_string(),
        };
        send(&mut stream, local, &name, progress).await?
    };
    stream.get_mut().shutdown().await?;

    info!(src = %cp.src, tgt = %cp.tgt, bytes = copied, "scp finished");
    Ok(copied)
}

/// Command line run on the remote host for `cp`.
pub fn remote_command(cp: &NodeCp) -> String {
    if cp.is_receive {
        format!("scp -qf {}", shell_quote(&cp.src))
    } else if cp.tgt.trim().is_empty() {
        "scp -qt .".to_string()
    } else {
        format!("scp -qt {}", shell_quote(&cp.tgt))
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Streams `local` into a remote sink under `name`.
pub async fn send<S, W>(
    stream: &mut S,
    local: &Path,
    name: &str,
    progress: &mut W,
) -> Result<u64, SshError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut file = File::open(local).await?;
    let size = file.metadata().await?.len();
    announce_size(progress, size).await?;

    read_ack(stream).await?;
    stream
        .write_all(format!("C{FILE_MODE} {size} {name}\n").as_bytes())
        .await?;
    stream.flush().await?;
    read_ack(stream).await?;

    let mut meter = Meter::new("Uploading");
    let mut buf = vec![0u8; CHUNK];
    let mut sent = 0u64;
    while sent < size {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Err(SshError::Scp(format!(
                "{} shrank while copying",
                local.display()
            )));
        }
        let n = n.min((size - sent) as usize);
        stream.write_all(&buf[..n]).await?;
        sent += n as u64;
        meter.update(progress, sent).await?;
    }
    stream.write_all(&[0]).await?;
    stream.flush().await?;
    read_ack(stream).await?;
    meter.finish(progress).await?;
    Ok(sent)
}

/// Pulls one file from a remote source into `target`.
///
/// A `target` naming an existing directory receives the file under the
/// name the source announces.
pub async fn receive<S, W>(stream: &mut S, target: &Path, progress: &mut W) -> Result<u64, SshError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    send_ok(stream).await?;
    let header = loop {
        let line = read_record(stream).await?;
        if line.starts_with('T') {
            send_ok(stream).await?;
            continue;
        }
        break parse_header(&line)?;
    };
    announce_size(progress, header.size).await?;

    let path = local_target(target, &header.name);
    let mut file = File::create(&path).await?;
    send_ok(stream).await?;

    let mut meter = Meter::new("Downloading");
    let mut buf = vec![0u8; CHUNK];
    let mut received = 0u64;
    while received < header.size {
        let want = CHUNK.min((header.size - received) as usize);
        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(SshError::Scp("unexpected end of stream".to_string()));
        }
        file.write_all(&buf[..n]).await?;
        received += n as u64;
        meter.update(progress, received).await?;
    }
    file.flush().await?;
    read_ack(stream).await?;
    send_ok(stream).await?;
    meter.finish(progress).await?;
    Ok(received)
}

#[derive(Debug, PartialEq, Eq)]
struct Header {
    size: u64,
    name: String,
}

fn parse_header(line: &str) -> Result<Header, SshError> {
    let malformed = || SshError::Scp(format!("unexpected header {line:?}"));
    let rest = line.strip_prefix('C').ok_or_else(malformed)?;
    let mut parts = rest.splitn(3, ' ');
    let _mode = parts.next().ok_or_else(malformed)?;
    let size = parts
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(malformed)?;
    let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(malformed)?;
    Ok(Header {
        size,
        name: name.to_string(),
    })
}

fn local_target(target: &Path, name: &str) -> PathBuf {
    if target.as_os_str().is_empty() {
        PathBuf::from(name)
    } else if target.is_dir() {
        target.join(name)
    } else {
        target.to_path_buf()
    }
}

fn local_file_name(path: &Path) -> Result<String, SshError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| SshError::Scp(format!("{} has no file name", path.display())))
}

async fn send_ok<S: AsyncWrite + Unpin>(stream: &mut S) -> Result<(), SshError> {
    stream.write_all(&[0]).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one status byte, turning warnings and errors into [`SshError::Scp`].
async fn read_ack<S: AsyncBufRead + Unpin>(stream: &mut S) -> Result<(), SshError> {
    let mut status = [0u8; 1];
    if stream.read(&mut status).await? == 0 {
        return Err(SshError::Scp("unexpected end of stream".to_string()));
    }
    match status[0] {
        0 => Ok(()),
        1 | 2 => {
            let mut message = String::new();
            stream.read_line(&mut message).await?;
            Err(SshError::Scp(message.trim_end().to_string()))
        }
        other => Err(SshError::Scp(format!("unexpected status byte {other}"))),
    }
}

/// Reads a control record, or the error a source sends instead of one.
async fn read_record<S: AsyncBufRead + Unpin>(stream: &mut S) -> Result<String, SshError> {
    let mut line = String::new();
    if stream.read_line(&mut line).await? == 0 {
        return Err(SshError::Scp("unexpected end of stream".to_string()));
    }
    match line.as_bytes().first() {
        Some(1) | Some(2) => Err(SshError::Scp(line[1..].trim_end().to_string())),
        _ => Ok(line.trim_end_matches('\n').to_string()),
    }
}

async fn announce_size<W>(out: &mut W, size: u64) -> Result<(), SshError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    out.write_all(format!("\rFile Size: {}\n", human_bytes(size)).as_bytes())
        .await?;
    out.flush().await?;
    Ok(())
}

/// Rewrites one progress line in place.
struct Meter {
    label: &'static str,
    shown: String,
}

impl Meter {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            shown: String::new(),
        }
    }

    async fn update<W>(&mut self, out: &mut W, done: u64) -> Result<(), SshError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let human = human_bytes(done);
        if human != self.shown {
            out.write_all(format!("\r{}... {} complete", self.label, human).as_bytes())
                .await?;
            out.flush().await?;
            self.shown = human;
        }
        Ok(())
    }

    async fn finish<W>(&mut self, out: &mut W) -> Result<(), SshError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }
}

/// Final path component of a copy target.
///
/// Blank input, a trailing separator or a trailing `.` mean "no name";
/// the caller then falls back to the source's name.
pub fn parse_file_name(path: &str) -> &str {
    let path = path.trim_matches(|c| c == ' ' || c == '\t');
    if path.is_empty() || path.ends_with('/') || path.ends_with('.') {
        return "";
    }
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// SI-scaled byte count: `83 MB`, `1.2 kB`, `512 B`.
pub fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];
    if n < 10 {
        return format!("{n} B");
    }
    let exp = ((n as f64).log10() / 3.0).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);
    let value = n as f64 / 1000f64.powi(exp as i32);
    if value < 10.0 {
        format!("{:.1} {}", value, UNITS[exp])
    } else {
        format!("{:.0} {}", value, UNITS[exp])
    }
}
