//! Newline-delimited JSON framing.
//!
//! Each record is one JSON document followed by `\n`. JSON text never
//! contains an unescaped newline, so the delimiter is unambiguous. Readers
//! keep their buffer across records, so bytes that follow a record (for
//! example stream data after a `stdin` request) are never lost.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Record delimiter.
pub const DELIM: u8 = b'\n';

/// Maximum record size (1MB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Reads delimited records from a buffered stream.
#[derive(Debug)]
pub struct JsonProtoReader<R> {
    inner: R,
}

impl<R: AsyncBufRead + Unpin> JsonProtoReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads and decodes the next record.
    ///
    /// Blank lines between records are skipped.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Eof` if the stream ends before a record starts
    /// - `ProtocolError::Truncated` if it ends inside a record
    /// - `ProtocolError::TooLarge` if no delimiter appears within the limit
    /// - `ProtocolError::Decode` on malformed JSON
    pub async fn read<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        loop {
            let mut buf = Vec::new();
            let n = (&mut self.inner)
                .take(MAX_FRAME_SIZE as u64 + 1)
                .read_until(DELIM, &mut buf)
                .await?;

            if n == 0 {
                return Err(ProtocolError::Eof);
            }

            match buf.last() {
                Some(&DELIM) => {
                    buf.pop();
                }
                _ if buf.len() > MAX_FRAME_SIZE => {
                    return Err(ProtocolError::TooLarge {
                        size: buf.len(),
                        max: MAX_FRAME_SIZE,
                    });
                }
                _ => return Err(ProtocolError::Truncated { len: buf.len() }),
            }

            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return serde_json::from_slice(&buf).map_err(ProtocolError::decode);
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Returns the underlying reader, including any buffered bytes.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes delimited records.
#[derive(Debug)]
pub struct JsonProtoWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> JsonProtoWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encodes `msg`, appends the delimiter and flushes.
    pub async fn write<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<(), ProtocolError> {
        let mut buf = serde_json::to_vec(msg).map_err(ProtocolError::encode)?;
        if buf.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::TooLarge {
                size: buf.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        buf.push(DELIM);
        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
