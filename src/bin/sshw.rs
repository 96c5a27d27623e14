//! sshw - SSH node tree client with a connection-sharing master
//!
//! # Usage
//!
//! ```text
//! sshw                    # list the configured nodes
//! sshw web                # connect to the node named or aliased "web"
//! sshw -f nodes.yml web   # merge nodes.yml over the default config
//! sshw scp ./a.tar deploy@web:/tmp/   # one-off upload
//! sshw merge team.yml     # merge team.yml into the config file
//! sshw server start [-d]  # run the master (optionally in the background)
//! sshw server stop
//! sshw server status
//! ```
//!
//! Sessions go through the master unless the node sets
//! `control-master: false`; the client starts the master on demand.

use std::fs::{self, File, OpenOptions};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sshw_cli::daemon::{is_process_running, read_pid, write_pid};
use sshw_cli::adhoc::{scp_node, ScpTarget};
use sshw_cli::{config, exec_node, listing, CliError};
use sshw_core::{find_node, paths};
use sshw_ssh::SshClientFactory;
use sshwd::config::DaemonConfig;
use sshwd::master::{MasterConfig, MasterHandler};
use sshwd::registry::spawn_registry;
use sshwd::server::DaemonServer;

// ============================================================================
// CLI Arguments
// ============================================================================

/// sshw - ssh client with node tree and session multiplexing
#[derive(Parser, Debug)]
#[command(name = "sshw", version, about)]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Node name or alias; omit to list the nodes
    name: Option<String>,

    /// Extra config file merged over the default one
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the master daemon
    Server {
        #[command(subcommand)]
        action: ServerCommand,
    },
    /// Upload a local file, like scp
    #[command(after_help = "Example: sshw scp file user@host:")]
    Scp {
        /// Local file
        src: String,
        /// [user@]host:[path]
        remote: ScpTarget,
    },
    /// Merge nodes from FILE into the config file, matching by name
    Merge {
        file: PathBuf,

        /// Config file to rewrite instead of the default one
        #[arg(short = 'f', long = "file")]
        target: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ServerCommand {
    /// Start the master
    Start {
        /// Run in the background, logging to the state directory
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running master
    Stop,
    /// Show master status
    Status,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::Server { action }) => server_command(action),
        Some(Command::Scp { src, remote }) => run_scp(src, remote),
        Some(Command::Merge { file, target }) => merge_command(&file, target.as_deref()),
        None => run_client(args.name, args.file),
    }
}

// ============================================================================
// Server Commands
// ============================================================================

fn master_pid() -> Option<i32> {
    let path = paths::pid_path();
    let pid = read_pid(&path)?;
    if is_process_running(pid) {
        return Some(pid);
    }
    let _ = fs::remove_file(path);
    None
}

fn socket_answers(socket: &Path) -> bool {
    UnixStream::connect(socket).is_ok()
}

fn server_command(action: ServerCommand) -> Result<()> {
    let socket = paths::socket_path();

    match action {
        ServerCommand::Start { daemon } => {
            if socket_answers(&socket) {
                eprintln!("Master is already running on {}", socket.display());
                eprintln!("Use 'sshw server stop' to stop it first.");
                process::exit(1);
            }

            let config = DaemonConfig::load(&paths::server_config_path())
                .context("Failed to load server config")?;

            if daemon {
                daemonize()?;
            }

            let pid_path = paths::pid_path();
            write_pid(&pid_path, process::id()).context("Failed to write PID file")?;

            let result = run_server(socket, config);

            let _ = fs::remove_file(&pid_path);

            result
        }
        ServerCommand::Stop => {
            let Some(pid) = master_pid() else {
                println!("Master is not running.");
                return Ok(());
            };

            println!("Stopping master (PID {pid})...");
            // SAFETY: plain signal delivery to a pid we read from our own pid file.
            if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
                bail!("Failed to send SIGTERM to process {pid}");
            }

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Master stopped.");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(100));
            }

            eprintln!("Master did not stop within 5 seconds.");
            process::exit(1);
        }
        ServerCommand::Status => {
            let answering = socket_answers(&socket);
            match master_pid() {
                Some(pid) => println!("Master is running (PID {pid})"),
                None if answering => println!("Master is running (PID unknown)"),
                None => {
                    println!("Master is not running.");
                    process::exit(1);
                }
            }
            let state = if answering { "answering" } else { "not answering" };
            println!("Socket: {} ({state})", socket.display());
            Ok(())
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = paths::log_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }

    let stdout = open_log(&log_path).context("Failed to open log file for stdout")?;
    let stderr = stdout.try_clone().context("Failed to open log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

fn open_log(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[tokio::main]
async fn run_server(socket: PathBuf, config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sshwd=info".parse()?)
                .add_directive("sshw_core=info".parse()?)
                .add_directive("sshw_protocol=info".parse()?)
                .add_directive("sshw_ssh=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        idle_timeout = ?config.idle_timeout(),
        "sshw master starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(config.registry());
    let master = Arc::new(MasterHandler::new(
        SshClientFactory,
        registry,
        MasterConfig::default(),
    ));

    let server = DaemonServer::new(&socket, master, cancel_token);

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("sshw master stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}

// ============================================================================
// Client
// ============================================================================

fn create_log_file() -> Option<File> {
    let log_path = paths::client_log_path();

    if let Some(parent) = log_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("Warning: Failed to create log directory {parent:?}: {e}");
            return None;
        }
    }

    match open_log(&log_path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Warning: Failed to open log file {log_path:?}: {e}");
            None
        }
    }
}

/// Client logs never reach the terminal, which may be in raw mode.
fn init_client_logging() {
    let Some(file) = create_log_file() else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("off"))
            .init();
        return;
    };

    let mut filter = EnvFilter::from_default_env();
    for directive in ["sshw=warn", "sshw_cli=warn", "sshw_ssh=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn run_client(name: Option<String>, file: Option<PathBuf>) -> Result<()> {
    init_client_logging();

    let loaded = config::load(file.as_deref())?;
    info!(sources = ?loaded.sources, nodes = loaded.nodes.len(), "Config loaded");

    let Some(name) = name else {
        print!("{}", listing::render(&loaded.nodes));
        return Ok(());
    };
    let node = find_node(&loaded.nodes, &name)
        .cloned()
        .ok_or(CliError::NodeNotFound(name))?;

    if node.is_folder() {
        bail!("{} is a folder, pick one of its nodes", node.label());
    }

    exec_node(node, &paths::socket_path()).await?;
    Ok(())
}

#[tokio::main]
async fn run_scp(src: String, remote: ScpTarget) -> Result<()> {
    init_client_logging();

    let node = scp_node(&src, &remote);
    info!(src = %src, remote = %remote, "Ad-hoc copy");
    exec_node(node, &paths::socket_path()).await?;
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

fn merge_command(file: &Path, target: Option<&Path>) -> Result<()> {
    let report = config::merge(target, file)
        .context("Failed to merge config")?;
    println!("backup file {}", report.target.display());
    println!("backup name {}", report.backup.display());
    println!("Merge finished");
    Ok(())
}
