//! sshw client library
//!
//! Everything the `sshw` binary does on the client side:
//! - `config` - node tree loading and merging, `sshw merge`
//! - `adhoc` - the one-off node behind `sshw scp`
//! - `listing` - node tree listing for `sshw` without a name
//! - `daemon` - master bootstrap and pid helpers
//! - `forward` - three-socket stdio forwarding
//! - `multiplex` - [`sshw_core::Client`] routed through the master
//! - `orchestrator` - mode decision and the session lifecycle
//!
//! A node with `control-master: false`, or a master that does not come up
//! in time, runs directly with an in-process [`sshw_ssh::SshClient`].

pub mod adhoc;
pub mod config;
pub mod daemon;
pub mod error;
pub mod forward;
pub mod listing;
pub mod multiplex;
pub mod orchestrator;
pub mod stdin;

pub use daemon::Mode;
pub use error::{CliError, Result};
pub use multiplex::MultiplexClient;
pub use orchestrator::{exec_client, exec_node};
