//! Session lifecycle ordering and master bootstrap fallback.

mod common;

use std::time::{Duration, Instant};

use common::{copy_node, node, socket_in, LocalFake, TestMaster};
use sshw_cli::daemon::{ensure_daemon, Mode};
use sshw_cli::orchestrator::choose_mode;
use sshw_cli::{exec_client, CliError};
use sshw_core::{NodeCallbackShell, NodeExec};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_exec_client_full_lifecycle() {
    let mut client = LocalFake::new(node("example"));
    let log = client.log.clone();

    exec_client(&mut client, CancellationToken::new()).await.unwrap();

    assert_eq!(
        LocalFake::calls(&log),
        vec![
            "execs_pre",
            "connect",
            "init_terminal",
            "watch_window_change",
            "scp",
            "shell",
            "recover_terminal",
            "execs_post",
            "recover_terminal",
            "close",
        ]
    );
}

#[tokio::test]
async fn test_exec_client_stops_after_copies() {
    let mut client = LocalFake::new(copy_node("example"));
    let log = client.log.clone();

    exec_client(&mut client, CancellationToken::new()).await.unwrap();

    assert_eq!(
        LocalFake::calls(&log),
        vec![
            "execs_pre",
            "connect",
            "init_terminal",
            "watch_window_change",
            "scp",
            "recover_terminal",
            "close",
        ]
    );
}

#[tokio::test]
async fn test_exec_client_copies_then_runs_callback_shells() {
    let mut scripted = copy_node("example");
    scripted.callback_shells.push(NodeCallbackShell {
        cmd: "tail -f /var/log/app.log".to_string(),
        ..NodeCallbackShell::default()
    });
    let mut client = LocalFake::new(scripted);
    let log = client.log.clone();

    exec_client(&mut client, CancellationToken::new()).await.unwrap();

    let calls = LocalFake::calls(&log);
    let scp = calls.iter().position(|c| *c == "scp").unwrap();
    let shell = calls.iter().position(|c| *c == "shell").unwrap();
    assert!(scp < shell);
    assert!(calls.contains(&"execs_post"));
}

#[tokio::test]
async fn test_exec_client_closes_after_shell_failure() {
    let mut client = LocalFake::new(node("example"));
    client.fail_shell = true;
    let log = client.log.clone();

    let err = exec_client(&mut client, CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "exit status 1");

    let calls = LocalFake::calls(&log);
    assert!(!calls.contains(&"execs_post"));
    assert_eq!(calls[calls.len() - 2..], ["recover_terminal", "close"]);
}

#[tokio::test]
async fn test_exec_client_local_only_node() {
    let mut local_only = node("");
    local_only.execs_pre.push(NodeExec {
        cmd: "echo hi".to_string(),
        var: String::new(),
    });
    let mut client = LocalFake::new(local_only);
    let log = client.log.clone();

    exec_client(&mut client, CancellationToken::new()).await.unwrap();
    assert_eq!(LocalFake::calls(&log), vec!["execs_pre"]);
}

#[tokio::test]
async fn test_running_master_is_used_without_spawning() {
    let master = TestMaster::spawn().await;

    let mode = ensure_daemon(&master.socket_path, || panic!("must not spawn")).await;
    assert_eq!(mode, Mode::Multiplexed);

    master.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_master_that_never_answers_falls_back_to_direct() {
    let dir = tempfile::tempdir().unwrap();
    let socket = socket_in(dir.path());

    let started = Instant::now();
    let mode = ensure_daemon(&socket, || Ok(())).await;

    assert_eq!(mode, Mode::Direct);
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_spawn_failure_falls_back_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let socket = socket_in(dir.path());

    let started = Instant::now();
    let mode = ensure_daemon(&socket, || Err(CliError::Spawn("no binary".to_string()))).await;

    assert_eq!(mode, Mode::Direct);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_choose_mode_respects_control_master() {
    let master = TestMaster::spawn().await;

    let shared = node("example");
    assert_eq!(
        choose_mode(&shared, &master.socket_path, || Ok(())).await,
        Mode::Multiplexed
    );

    let mut private = node("example");
    private.control_master = Some(false);
    assert_eq!(
        choose_mode(&private, &master.socket_path, || Ok(())).await,
        Mode::Direct
    );

    master.shutdown().await.unwrap();
}
