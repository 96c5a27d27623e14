//! sshw protocol - wire format for the master daemon control socket
//!
//! Every connection starts with one [`Request`] record. Depending on the
//! path it is answered with a [`Response`], kept open as a raw byte stream,
//! or kept open for streamed [`ChangeWindowRequest`] records.

pub mod codec;
pub mod error;
pub mod message;
pub mod transport;

pub use codec::{JsonProtoReader, JsonProtoWriter, DELIM, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use message::{
    ChangeWindowRequest, ClientRequest, PlainResult, Request, Response, Route, StdRole,
    PATH_CANCEL, PATH_CREATE_CONN, PATH_SCP, PATH_SESSION, PATH_STD, PATH_STDERR, PATH_STDIN,
    PATH_STDOUT, PATH_TERMINAL,
};
pub use transport::{is_running, split, SocketReader, SocketWriter};
