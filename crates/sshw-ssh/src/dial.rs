//! Dialing nodes, directly or through a chain of jump hosts.
//!
//! Every hop is a full SSH session. Later hops ride a `direct-tcpip`
//! channel opened on the previous one, so only the outermost hop sees a
//! real TCP socket.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::PublicKey;
use sshw_core::Node;
use tracing::{debug, info};

use crate::auth;
use crate::error::SshError;

/// TCP connect plus handshake budget per hop.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between SSH-level keepalives on every hop.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Budget for one explicit keepalive round trip.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest jump chain accepted.
pub const MAX_JUMP_DEPTH: usize = 8;

/// Session event handler shared by every hop.
///
/// Host keys are accepted without verification.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated session with the target, plus the jump sessions it rides on.
pub struct SshConnection {
    handle: Handle<ClientHandler>,
    /// Outermost first. Kept alive for as long as the target session.
    jumps: Vec<Handle<ClientHandler>>,
    identity: String,
}

impl SshConnection {
    pub fn handle(&self) -> &Handle<ClientHandler> {
        &self.handle
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn jump_count(&self) -> usize {
        self.jumps.len()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Sends a keepalive that requires a reply.
    pub async fn ping(&self) -> Result<(), SshError> {
        if self.is_closed() {
            return Err(SshError::ConnectionFailed(format!("{} is closed", self.identity)));
        }
        tokio::time::timeout(PING_TIMEOUT, self.handle.send_keepalive(true))
            .await
            .map_err(|_| SshError::Timeout(format!("keepalive to {}", self.identity)))??;
        Ok(())
    }

    /// Disconnects the target, then the jump hosts innermost first.
    pub async fn close(&self) -> Result<(), SshError> {
        let result = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        for jump in self.jumps.iter().rev() {
            if let Err(e) = jump
                .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
                .await
            {
                debug!(error = %e, "Jump host disconnect failed");
            }
        }
        info!(identity = %self.identity, "SSH connection closed");
        result.map_err(SshError::from)
    }
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("identity", &self.identity)
            .field("jumps", &self.jumps.len())
            .finish_non_exhaustive()
    }
}

/// Flattens the jump hosts of `node` into dial order, outermost first.
///
/// A hop's own jump hosts come before it. Cycles and chains longer than
/// [`MAX_JUMP_DEPTH`] are rejected. Returned hops have their `jump` cleared.
pub fn jump_chain(node: &Node) -> Result<Vec<Node>, SshError> {
    let mut hops = Vec::new();
    let mut path = vec![node.identity()];
    collect_hops(node, &mut path, &mut hops)?;
    Ok(hops)
}

fn collect_hops(node: &Node, path: &mut Vec<String>, hops: &mut Vec<Node>) -> Result<(), SshError> {
    for hop in &node.jump {
        let identity = hop.identity();
        if path.contains(&identity) {
            return Err(SshError::JumpChain(format!("cycle through {identity}")));
        }
        if path.len() > MAX_JUMP_DEPTH {
            return Err(SshError::JumpChain(format!(
                "more than {MAX_JUMP_DEPTH} hops"
            )));
        }

        path.push(identity);
        collect_hops(hop, path, hops)?;
        path.pop();

        if hops.len() >= MAX_JUMP_DEPTH {
            return Err(SshError::JumpChain(format!(
                "more than {MAX_JUMP_DEPTH} hops"
            )));
        }
        let mut bare = hop.clone();
        bare.jump.clear();
        hops.push(bare);
    }
    Ok(())
}

/// Dials and authenticates `node`, hopping through its jump chain.
pub async fn dial(node: &Node) -> Result<SshConnection, SshError> {
    let hops = jump_chain(node)?;
    let mut jumps: Vec<Handle<ClientHandler>> = Vec::with_capacity(hops.len());

    for hop in &hops {
        let handle = match jumps.last() {
            None => connect_direct(hop).await?,
            Some(previous) => connect_via(previous, hop).await?,
        };
        debug!(hop = %hop.identity(), "Jump host connected");
        jumps.push(handle);
    }

    let handle = match jumps.last() {
        None => connect_direct(node).await?,
        Some(previous) => connect_via(previous, node).await?,
    };

    let identity = node.identity();
    info!(identity = %identity, jumps = jumps.len(), "SSH connection established");
    Ok(SshConnection {
        handle,
        jumps,
        identity,
    })
}

fn session_config() -> Arc<client::Config> {
    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: 3,
        ..Default::default()
    })
}

async fn connect_direct(node: &Node) -> Result<Handle<ClientHandler>, SshError> {
    let addr = node.addr();
    debug!(addr = %addr, "Dialing");

    let mut handle = tokio::time::timeout(
        CONNECT_TIMEOUT,
        client::connect(session_config(), addr.as_str(), ClientHandler),
    )
    .await
    .map_err(|_| SshError::Timeout(format!("dial {addr} after {}s", CONNECT_TIMEOUT.as_secs())))??;

    auth::authenticate(&mut handle, node).await?;
    Ok(handle)
}

async fn connect_via(
    previous: &Handle<ClientHandler>,
    node: &Node,
) -> Result<Handle<ClientHandler>, SshError> {
    let addr = node.addr();
    debug!(addr = %addr, "Dialing through jump host");

    let channel = previous
        .channel_open_direct_tcpip(node.host.clone(), u32::from(node.port()), "127.0.0.1", 0)
        .await
        .map_err(|e| SshError::ConnectionFailed(format!("jump to {addr}: {e}")))?;

    let mut handle = tokio::time::timeout(
        CONNECT_TIMEOUT,
        client::connect_stream(session_config(), channel.into_stream(), ClientHandler),
    )
    .await
    .map_err(|_| {
        SshError::Timeout(format!(
            "handshake with {addr} after {}s",
            CONNECT_TIMEOUT.as_secs()
        ))
    })??;

    auth::authenticate(&mut handle, node).await?;
    Ok(handle)
}
