//! Protocol errors.

use thiserror::Error;

/// Errors reading or writing wire records.
///
/// All of them are terminal for the connection they occur on and never
/// for the daemon.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Stream ended cleanly before any byte of a record.
    #[error("connection closed")]
    Eof,

    /// Stream ended in the middle of a record.
    #[error("truncated record ({len} bytes without delimiter)")]
    Truncated { len: usize },

    /// Record exceeds the frame limit.
    #[error("record too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// Malformed JSON or wrong schema for the path.
    #[error("malformed record: {0}")]
    Decode(String),

    #[error("encode record: {0}")]
    Encode(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn decode<E: std::fmt::Display>(err: E) -> Self {
        Self::Decode(err.to_string())
    }

    pub fn encode<E: std::fmt::Display>(err: E) -> Self {
        Self::Encode(err.to_string())
    }

    /// True when the peer simply went away.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}
