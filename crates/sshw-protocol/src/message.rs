//! Envelopes exchanged over the control socket.
//!
//! Field names are PascalCase on the wire:
//!
//! ```text
//! Request  { "Path": "session/terminal", "Body": {...} }
//! Response { "Body": { "Message": "", "Code": 0, "Data": ... } }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sshw_core::{Node, SessionNum, WindowSize};

use crate::error::ProtocolError;

// ============================================================================
// Paths
// ============================================================================

pub const PATH_CREATE_CONN: &str = "createConn";
pub const PATH_STD: &str = "std";
pub const PATH_STDIN: &str = "stdin";
pub const PATH_STDOUT: &str = "stdout";
pub const PATH_STDERR: &str = "stderr";
pub const PATH_SESSION: &str = "session";
pub const PATH_TERMINAL: &str = "session/terminal";
pub const PATH_SCP: &str = "session/scp";
pub const PATH_CANCEL: &str = "session/cancel";

/// Which stream slot a `std*` connection fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdRole {
    Stdin,
    Stdout,
    Stderr,
}

impl StdRole {
    pub const ALL: [StdRole; 3] = [StdRole::Stdin, StdRole::Stdout, StdRole::Stderr];

    pub fn path(self) -> &'static str {
        match self {
            Self::Stdin => PATH_STDIN,
            Self::Stdout => PATH_STDOUT,
            Self::Stderr => PATH_STDERR,
        }
    }
}

/// Routing decision for a request path, matched by prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    CreateConn,
    Std(StdRole),
    Terminal,
    Scp,
    Cancel,
    Unknown(String),
}

impl Route {
    pub fn parse(path: &str) -> Self {
        if path.starts_with(PATH_CREATE_CONN) {
            return Self::CreateConn;
        }
        if path.starts_with(PATH_STD) {
            return match path {
                p if p.starts_with(PATH_STDIN) => Self::Std(StdRole::Stdin),
                p if p.starts_with(PATH_STDOUT) => Self::Std(StdRole::Stdout),
                p if p.starts_with(PATH_STDERR) => Self::Std(StdRole::Stderr),
                other => Self::Unknown(other.to_string()),
            };
        }
        if path.starts_with(PATH_TERMINAL) {
            return Self::Terminal;
        }
        if path.starts_with(PATH_SCP) {
            return Self::Scp;
        }
        if path.starts_with(PATH_CANCEL) {
            return Self::Cancel;
        }
        Self::Unknown(path.to_string())
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// A routed request. `Body` is interpreted per path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    pub path: String,
    #[serde(default)]
    pub body: Value,
}

impl Request {
    /// Creates a request with a serialized body.
    pub fn new<T: Serialize>(path: impl Into<String>, body: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            path: path.into(),
            body: serde_json::to_value(body).map_err(ProtocolError::encode)?,
        })
    }

    /// Creates a request with a `null` body.
    pub fn bare(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            body: Value::Null,
        }
    }

    pub fn route(&self) -> Route {
        Route::parse(&self.path)
    }

    /// Decodes the body into the schema expected for this path.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.body).map_err(ProtocolError::decode)
    }
}

/// Reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub body: PlainResult,
}

impl Response {
    pub fn success<T: Serialize>(data: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            body: PlainResult::success(data)?,
        })
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            body: PlainResult::fail(message),
        }
    }
}

/// Result code carried in every [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlainResult {
    #[serde(default)]
    pub message: String,
    /// `0` on success, `-1` on failure.
    pub code: i32,
    #[serde(default)]
    pub data: Value,
}

impl PlainResult {
    pub const OK: i32 = 0;
    pub const FAIL: i32 = -1;

    pub fn success<T: Serialize>(data: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            message: String::new(),
            code: Self::OK,
            data: serde_json::to_value(data).map_err(ProtocolError::encode)?,
        })
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Self::FAIL,
            data: Value::Null,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Self::OK
    }

    /// Decodes `Data` into the expected payload type.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.data).map_err(ProtocolError::decode)
    }
}

// ============================================================================
// Bodies
// ============================================================================

/// Body of `session/*` requests.
///
/// `Node` is absent on `session/cancel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientRequest {
    pub num: SessionNum,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
}

impl ClientRequest {
    pub fn new(num: SessionNum, node: Node) -> Self {
        Self {
            num,
            node: Some(node),
        }
    }

    pub fn cancel(num: SessionNum) -> Self {
        Self { num, node: None }
    }
}

/// Resize event streamed on the `session/terminal` connection after the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeWindowRequest {
    pub width: u16,
    pub height: u16,
}

impl From<WindowSize> for ChangeWindowRequest {
    fn from(size: WindowSize) -> Self {
        Self {
            width: size.cols,
            height: size.rows,
        }
    }
}

impl From<ChangeWindowRequest> for WindowSize {
    fn from(req: ChangeWindowRequest) -> Self {
        WindowSize::new(req.width, req.height)
    }
}
