//! Control socket helpers shared by the daemon and its clients.

use std::path::Path;

use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::codec::{JsonProtoReader, JsonProtoWriter};

pub type SocketReader = JsonProtoReader<BufReader<OwnedReadHalf>>;
pub type SocketWriter = JsonProtoWriter<OwnedWriteHalf>;

/// Liveness check: true iff something accepts connections on `path`.
///
/// The check connection is closed immediately; no handshake is sent.
pub async fn is_running(path: &Path) -> bool {
    UnixStream::connect(path).await.is_ok()
}

/// Splits a socket into a record reader and writer.
pub fn split(stream: UnixStream) -> (SocketReader, SocketWriter) {
    let (reader, writer) = stream.into_split();
    (
        JsonProtoReader::new(BufReader::new(reader)),
        JsonProtoWriter::new(writer),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_is_running_tracks_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alive.sock");

        assert!(!is_running(&path).await);

        let listener = UnixListener::bind(&path).unwrap();
        assert!(is_running(&path).await);

        drop(listener);
        assert!(!is_running(&path).await);
    }
}
