//! sshw-ssh - the SSH side of sshw
//!
//! [`SshClient`] implements [`sshw_core::Client`] on top of russh. It is
//! used directly by the `sshw` binary when no master is running, and by
//! the master daemon through [`SshClientFactory`].

pub mod auth;
pub mod callback;
pub mod client;
pub mod dial;
pub mod error;
pub mod exec;
pub mod interactive;
pub mod scp;
pub mod shell;
pub mod terminal;

pub use client::{SshClient, SshClientFactory};
pub use dial::{dial, jump_chain, SshConnection};
pub use error::SshError;
