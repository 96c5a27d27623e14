//! sshwd - the sshw master daemon
//!
//! This crate provides the daemon side of connection multiplexing:
//! - `server` - Unix socket server accepting control connections
//! - `master` - Request dispatcher binding stream sockets to sessions
//! - `registry` - Refcounted cache of established connections
//! - `config` - Daemon tunables
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        sshw master                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │  DaemonServer   │────▶│       MasterHandler         │    │
//! │  │ (Unix Socket)   │     │ (bundles, cancels, dialing) │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             │                   │
//! │           │ connections                 │ get/put/ref       │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │ConnectionHandler│     │       RegistryActor         │    │
//! │  │ (per connection)│     │ (cached connection owner)   │    │
//! │  └─────────────────┘     └─────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod master;
pub mod registry;
pub mod server;
