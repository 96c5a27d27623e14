//! Runs a node end to end: picks multiplexed or direct execution, then
//! drives the [`Client`] through its lifecycle.

use std::path::Path;

use sshw_core::{Client, ClientError, Node, NodeIo};
use sshw_ssh::SshClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::absolutize_copies;
use crate::daemon::{ensure_daemon, spawn_daemon, Mode};
use crate::multiplex::MultiplexClient;
use crate::stdin::local_stdio;

/// Chooses the execution mode for `node` without touching the client.
///
/// `spawn` is only called when the node allows multiplexing and no master
/// answers yet.
pub async fn choose_mode<S>(node: &Node, socket: &Path, spawn: S) -> Mode
where
    S: FnOnce() -> crate::Result<()>,
{
    if !node.control_master() {
        debug!(node = %node, "control-master disabled");
        return Mode::Direct;
    }
    ensure_daemon(socket, spawn).await
}

/// Connects to `node` using the master at `socket` when possible.
pub async fn exec_node(mut node: Node, socket: &Path) -> Result<(), ClientError> {
    // The master runs with its own working directory.
    absolutize_copies(&mut node, dirs::home_dir().as_deref());

    let cancel = interrupt_token();
    match choose_mode(&node, socket, spawn_daemon).await {
        Mode::Multiplexed => {
            info!(node = %node, "Running through master");
            // Stdin belongs to the forwarder; the local half only runs
            // local commands and terminal setup.
            let local_io = NodeIo::new(
                Box::new(tokio::io::empty()),
                Box::new(tokio::io::stdout()),
                Box::new(tokio::io::stderr()),
            );
            let mut client = MultiplexClient::new(SshClient::new(node, local_io), socket);
            exec_client(&mut client, cancel).await
        }
        Mode::Direct => {
            if node.control_master() {
                println!("can not run daemon server, exec directly");
            }
            info!(node = %node, "Running directly");
            let mut client = SshClient::new(node, local_stdio());
            exec_client(&mut client, cancel).await
        }
    }
}

/// Cancelled on SIGINT, which only arrives while the terminal is cooked.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

/// Drives one client: pre-commands, connect, copies, shell, post-commands.
///
/// The connection is closed and the terminal restored on every path after
/// a successful connect. When the node has copy jobs the shell is skipped.
pub async fn exec_client<C: Client>(
    client: &mut C,
    cancel: CancellationToken,
) -> Result<(), ClientError> {
    client.execs_pre().await?;
    if !client.can_connect() {
        info!("Nothing to connect to after pre-commands");
        return Ok(());
    }

    client.connect().await?;
    let result = run_session(client, cancel).await;

    client.recover_terminal();
    if let Err(e) = client.close().await {
        warn!(error = %e, "Close failed");
    }
    result
}

async fn run_session<C: Client>(
    client: &mut C,
    cancel: CancellationToken,
) -> Result<(), ClientError> {
    client.init_terminal()?;

    let resizer = client.resizer();
    client.watch_window_change(Box::new(move |size| {
        resizer
            .send(size)
            .map_err(|_| ClientError::Session("shell ended".to_string()))
    }));

    client.scp(cancel).await?;
    // A copy-only node ends here; callback shells still get their shell.
    let node = client.node();
    if !node.scps.is_empty() && node.callback_shells.is_empty() {
        return Ok(());
    }

    client.shell().await?;
    client.recover_terminal();
    client.execs_post().await
}
