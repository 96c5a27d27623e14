//! sshw core - shared types for the sshw client and master daemon
//!
//! This crate provides the node model, the [`Client`] contract that both
//! direct and multiplexed sessions implement, and well-known paths.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()` or `todo!()` outside tests.

pub mod client;
pub mod error;
pub mod expand;
pub mod io;
pub mod node;
pub mod paths;
pub mod session;

// Re-exports for convenience
pub use client::{Client, ClientFactory, Resizer, WindowCallback};
pub use error::ClientError;
pub use expand::{expand, expand_node, expand_node_with};
pub use io::{BoxReader, BoxWriter, NodeIo};
pub use node::{
    find_node, walk_nodes, KeyboardInteraction, Node, NodeCallbackShell, NodeCp, NodeExec,
    WindowSize, DEFAULT_PORT,
};
pub use session::SessionNum;
