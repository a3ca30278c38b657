// ABOUTME: Integration tests for the process supervisor against real child processes.
// ABOUTME: Uses small shell scripts standing in for the agent binary (unix only).

#![cfg(unix)]

use frpdeck_core::{LogBus, LogEvent, LogStream, LogSubscription, ProcessSupervisor};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

// Writing an executable while another thread forks can fail with ETXTBSY,
// so script creation and spawning are serialized.
static SPAWN_LOCK: Mutex<()> = Mutex::const_new(());

const WAIT: Duration = Duration::from_secs(10);

struct Agent {
    dir: tempfile::TempDir,
    binary: PathBuf,
    config: PathBuf,
}

fn agent(script: &str) -> Agent {
    let dir = tempfile::tempdir().unwrap();
    let binary = dir.path().join("frpc");
    std::fs::write(&binary, format!("#!/bin/sh\n{script}\n")).unwrap();
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = dir.path().join("home.toml");
    std::fs::write(&config, "serverAddr = \"127.0.0.1\"\nserverPort = 7000\n").unwrap();
    Agent {
        dir,
        binary,
        config,
    }
}

async fn start(sup: &ProcessSupervisor, id: &str, agent: &Agent) -> frpdeck_core::ProcessInfo {
    let _guard = SPAWN_LOCK.lock().await;
    sup.start(id, &agent.binary, &agent.config).await.unwrap()
}

async fn wait_for(sub: &mut LogSubscription, pred: impl Fn(&LogEvent) -> bool) -> LogEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = sub.recv().await.expect("log bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for log event")
}

fn is_exit(event: &LogEvent, id: &str) -> bool {
    event.source_id == id
        && event.stream == LogStream::System
        && (event.text.starts_with("process exited") || event.text.starts_with("process terminated"))
}

fn kill(pid: u32) {
    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap()
}

#[tokio::test]
async fn test_external_kill_is_reported_once() {
    let agent = agent("exec sleep 30");
    let sup = ProcessSupervisor::new(LogBus::new(256));
    let mut sub = sup.log_bus().subscribe();

    let info = start(&sup, "home", &agent).await;
    assert!(sup.is_running("home").await);
    kill(info.pid.unwrap());

    let event = wait_for(&mut sub, |e| is_exit(e, "home")).await;
    assert_eq!(event.text, "process terminated by signal 9");
    assert!(sup.list().await.is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Some(extra) = sub.try_recv() {
        assert!(!is_exit(&extra, "home"), "duplicate exit event: {extra:?}");
    }
}

#[tokio::test]
async fn test_natural_exit_carries_code() {
    let agent = agent("exit 3");
    let sup = ProcessSupervisor::new(LogBus::new(256));
    let mut sub = sup.log_bus().subscribe();

    start(&sup, "home", &agent).await;

    let event = wait_for(&mut sub, |e| is_exit(e, "home")).await;
    assert_eq!(event.text, "process exited with code 3");
    assert!(!sup.is_running("home").await);
}

#[tokio::test]
async fn test_invocation_and_output_forwarding() {
    let agent = agent("echo \"$1 $2\"\npwd\necho oops >&2\nexec sleep 30");
    let sup = ProcessSupervisor::new(LogBus::new(256));
    let mut sub = sup.log_bus().subscribe();

    start(&sup, "home", &agent).await;

    let args = wait_for(&mut sub, |e| e.stream == LogStream::Stdout).await;
    assert_eq!(args.source_id, "home");
    assert_eq!(args.text, format!("-c {}", agent.config.display()));

    let cwd = wait_for(&mut sub, |e| e.stream == LogStream::Stdout).await;
    assert_eq!(canonical(Path::new(&cwd.text)), canonical(agent.dir.path()));

    let err = wait_for(&mut sub, |e| e.stream == LogStream::Stderr).await;
    assert_eq!(err.text, "oops");

    assert_eq!(sup.stop_all().await, 1);
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let agent = agent("exec sleep 30");
    let sup = ProcessSupervisor::new(LogBus::new(256));
    let mut sub = sup.log_bus().subscribe();

    let first = start(&sup, "home", &agent).await;
    let second = start(&sup, "home", &agent).await;
    assert_ne!(first.pid, second.pid);

    // The replaced process dies; the new one stays registered
    wait_for(&mut sub, |e| is_exit(e, "home")).await;
    let live = sup.list().await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].pid, second.pid);

    assert!(sup.stop("home").await);
    assert!(!sup.stop("home").await);
}

#[tokio::test]
async fn test_stop_terminates_process() {
    let agent = agent("exec sleep 30");
    let sup = ProcessSupervisor::new(LogBus::new(256));
    let mut sub = sup.log_bus().subscribe();

    start(&sup, "home", &agent).await;
    assert!(sup.stop("home").await);
    assert!(!sup.is_running("home").await);

    let event = wait_for(&mut sub, |e| is_exit(e, "home")).await;
    assert_eq!(event.text, "process terminated by signal 15");
}

#[tokio::test]
async fn test_stop_lets_agent_shut_down_cleanly() {
    let agent = agent("trap 'echo bye; exit 0' TERM\necho ready\nwhile :; do sleep 0.1; done");
    let sup = ProcessSupervisor::new(LogBus::new(256));
    let mut sub = sup.log_bus().subscribe();

    start(&sup, "home", &agent).await;
    wait_for(&mut sub, |e| e.text == "ready").await;
    assert!(sup.stop("home").await);

    let farewell = wait_for(&mut sub, |e| e.stream == LogStream::Stdout).await;
    assert_eq!(farewell.text, "bye");
    let event = wait_for(&mut sub, |e| is_exit(e, "home")).await;
    assert_eq!(event.text, "process exited with code 0");
}
