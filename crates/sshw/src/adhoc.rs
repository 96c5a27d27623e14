//! Nodes built from command-line arguments instead of the config file.

use std::fmt;
use std::str::FromStr;

use sshw_core::{expand_node, Node, NodeCp};

use crate::error::CliError;

/// Remote side of `sshw scp`: `[user@]host:[path]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpTarget {
    pub user: String,
    pub host: String,
    /// Empty means the remote login directory.
    pub path: String,
}

impl FromStr for ScpTarget {
    type Err = CliError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CliError::InvalidScpTarget {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (login, path) = input.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
        let (user, host) = match login.rsplit_once('@') {
            Some(("", _)) => return Err(invalid("empty user")),
            Some((user, host)) => (user, host),
            None => ("", login),
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for ScpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.user.is_empty() {
            write!(f, "{}@", self.user)?;
        }
        write!(f, "{}:{}", self.host, self.path)
    }
}

/// A one-off node that uploads `src` to `target`.
///
/// Expanded like a configured node; local paths are made absolute later,
/// when the node is executed.
pub fn scp_node(src: &str, target: &ScpTarget) -> Node {
    let mut node = Node::new(target.host.clone(), target.user.clone());
    node.name = target.to_string();
    node.scps.push(NodeCp {
        src: src.to_string(),
        tgt: target.path.clone(),
        ..NodeCp::default()
    });
    expand_node(&mut node);
    node
}
