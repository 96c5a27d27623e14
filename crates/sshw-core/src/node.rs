//! Node configuration entities and value objects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default SSH port used when a node leaves `port` unset.
pub const DEFAULT_PORT: u16 = 22;

/// Placeholder that resolves to the `USER` environment variable.
const USER_PLACEHOLDER: &str = "$USER";

// ============================================================================
// Value Objects
// ============================================================================

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

impl WindowSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// A local command run before login or after logout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeExec {
    /// Command line passed to `$SHELL -c`.
    pub cmd: String,
    /// When set, trimmed stdout is exported under this environment variable.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub var: String,
}

/// A single file copy job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NodeCp {
    pub src: String,
    pub tgt: String,
    /// `true` copies remote `src` to local `tgt`.
    pub is_receive: bool,
    /// Seconds; zero disables the timeout.
    pub timeout: u64,
}

/// A command typed into the remote shell right after login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NodeCallbackShell {
    pub cmd: String,
    /// Milliseconds to wait before sending `cmd`.
    pub delay: u64,
    /// Milliseconds to wait after sending `cmd`.
    pub wait: u64,
    /// Regex matched against remote output while `cmd` runs; a match stops
    /// the remaining commands.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_pattern: String,
}

/// A canned answer for keyboard-interactive authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct KeyboardInteraction {
    /// Answers any prompt that contains this text.
    pub question: String,
    pub answer: String,
    /// `answer` is a base32 TOTP secret; the current code is sent instead.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub google_auth: bool,
}

// ============================================================================
// Node
// ============================================================================

/// A connection descriptor from the node tree.
///
/// Nodes with only `name` and `children` act as folders. `jump` lists the
/// hosts to hop through, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Node {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alias: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub execs_pre: Vec<NodeExec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub execs_stop: Vec<NodeExec>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(rename = "keypath", skip_serializing_if = "String::is_empty")]
    pub key_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub passphrase: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub callback_shells: Vec<NodeCallbackShell>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scps: Vec<NodeCp>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jump: Vec<Node>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub merge_ignore: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keyboard_interactions: Vec<KeyboardInteraction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_master: Option<bool>,

    /// Terminal size of the invoking client. Never read from config files;
    /// carried on the wire so the daemon can size the remote PTY.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowSize>,
}

impl Node {
    /// Creates a node for `user@host` with every other field defaulted.
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            ..Self::default()
        }
    }

    /// Login user; empty or `$USER` falls back to the `USER` environment variable.
    pub fn user(&self) -> String {
        if self.user.is_empty() || self.user == USER_PLACEHOLDER {
            return std::env::var("USER").unwrap_or_default();
        }
        self.user.clone()
    }

    /// Port, defaulting to 22 when unset or zero.
    pub fn port(&self) -> u16 {
        match self.port {
            Some(port) if port > 0 => port,
            _ => DEFAULT_PORT,
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port())
        } else {
            format!("{}:{}", self.host, self.port())
        }
    }

    /// Registry key: `user@host:port`.
    pub fn identity(&self) -> String {
        format!("{}@{}", self.user(), self.addr())
    }

    /// Whether this node describes something to dial.
    ///
    /// A node with only pre-execs (no host) is a local script runner.
    pub fn can_connect(&self) -> bool {
        self.execs_pre.is_empty() || !self.host.is_empty()
    }

    /// Whether sessions for this node may go through the master daemon.
    pub fn control_master(&self) -> bool {
        self.control_master.unwrap_or(true)
    }

    /// A node with only a name and children is a folder.
    pub fn is_folder(&self) -> bool {
        !self.children.is_empty() && self.host.is_empty()
    }

    /// Label shown by `sshw` listings.
    pub fn label(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}

/// Depth-first search of the node tree by alias or name.
pub fn find_node<'a>(nodes: &'a [Node], name: &str) -> Option<&'a Node> {
    for node in nodes {
        if node.alias == name || node.name == name {
            return Some(node);
        }
        if let Some(found) = find_node(&node.children, name) {
            return Some(found);
        }
    }
    None
}

/// Flattens the tree into `(depth, node)` pairs in display order.
pub fn walk_nodes(nodes: &[Node]) -> Vec<(usize, &Node)> {
    fn walk<'a>(nodes: &'a [Node], depth: usize, out: &mut Vec<(usize, &'a Node)>) {
        for node in nodes {
            out.push((depth, node));
            walk(&node.children, depth + 1, out);
        }
    }

    let mut out = Vec::new();
    walk(nodes, 0, &mut out);
    out
}
