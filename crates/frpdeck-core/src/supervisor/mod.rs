// ABOUTME: Supervises agent processes keyed by configuration id.
// ABOUTME: One task owns the process table. Stops send SIGTERM, then force-kill after a grace period.

mod spawn;

pub use spawn::{
    AgentChild, ExitInfo, LaunchSpec, Launcher, OutputReader, TokioLauncher, CONFIG_FLAG,
};

use crate::error::SupervisorError;
use crate::log_bus::{LogBus, LogEvent, LogStream};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

const COMMAND_CAPACITY: usize = 32;

/// How long a stopped agent may take to exit before it is force-killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// A live process as reported by [`ProcessSupervisor::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub config_id: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    /// Unique per spawn, distinguishes a restarted process from its predecessor
    pub instance: u64,
}

/// Handle to the supervisor task. Cheap to clone.
///
/// When the last handle is dropped the task shuts down and every process it
/// still owns is stopped.
#[derive(Clone)]
pub struct ProcessSupervisor {
    commands: mpsc::Sender<Command>,
    bus: LogBus,
}

enum Command {
    Start {
        config_id: String,
        binary: PathBuf,
        config_file: PathBuf,
        reply: oneshot::Sender<Result<ProcessInfo, SupervisorError>>,
    },
    Stop {
        config_id: String,
        reply: oneshot::Sender<bool>,
    },
    StopAll {
        reply: oneshot::Sender<usize>,
    },
    List {
        reply: oneshot::Sender<Vec<ProcessInfo>>,
    },
}

impl ProcessSupervisor {
    /// Spawn a supervisor for real OS processes. Must be called inside a tokio runtime.
    pub fn new(bus: LogBus) -> Self {
        Self::with_launcher(bus, TokioLauncher)
    }

    /// Spawn a supervisor that starts processes through `launcher`.
    pub fn with_launcher(bus: LogBus, launcher: impl Launcher) -> Self {
        Self::with_stop_grace(bus, launcher, DEFAULT_STOP_GRACE)
    }

    /// Like [`ProcessSupervisor::with_launcher`], with a custom wait between
    /// the polite stop signal and the forced kill.
    pub fn with_stop_grace(bus: LogBus, launcher: impl Launcher, stop_grace: Duration) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let table = ProcessTable {
            launcher: Arc::new(launcher),
            bus: bus.clone(),
            handles: HashMap::new(),
            next_instance: 0,
            stop_grace,
            exit_tx,
        };
        tokio::spawn(table.run(command_rx, exit_rx));
        Self { commands, bus }
    }

    pub fn log_bus(&self) -> &LogBus {
        &self.bus
    }

    /// Start the agent for `config_id`, replacing any process already running for it.
    ///
    /// A relative `config_file` is resolved against the binary's directory.
    pub async fn start(
        &self,
        config_id: &str,
        binary: impl AsRef<Path>,
        config_file: impl AsRef<Path>,
    ) -> Result<ProcessInfo, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start {
                config_id: config_id.to_string(),
                binary: binary.as_ref().to_path_buf(),
                config_file: config_file.as_ref().to_path_buf(),
                reply,
            })
            .await
            .map_err(|_| SupervisorError::Unavailable)?;
        rx.await.map_err(|_| SupervisorError::Unavailable)?
    }

    /// Signal and forget the process for `config_id`. Returns false if none was live.
    pub async fn stop(&self, config_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Stop {
            config_id: config_id.to_string(),
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Signal every live process and clear the table. Returns how many were signaled.
    pub async fn stop_all(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::StopAll { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Live processes, ordered by config id.
    pub async fn list(&self) -> Vec<ProcessInfo> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::List { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn is_running(&self, config_id: &str) -> bool {
        self.list().await.iter().any(|p| p.config_id == config_id)
    }
}

struct ProcessHandle {
    info: ProcessInfo,
    // Sending or dropping this kills the process
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    /// Returns false if the process had already exited.
    fn signal(&mut self) -> bool {
        match self.kill_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

struct Exited {
    config_id: String,
    instance: u64,
    exit: std::io::Result<ExitInfo>,
}

struct ProcessTable {
    launcher: Arc<dyn Launcher>,
    bus: LogBus,
    handles: HashMap<String, ProcessHandle>,
    next_instance: u64,
    stop_grace: Duration,
    exit_tx: mpsc::UnboundedSender<Exited>,
}

impl ProcessTable {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut exits: mpsc::UnboundedReceiver<Exited>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(exited) = exits.recv() => self.on_exit(exited),
            }
        }

        let count = self.stop_all();
        tracing::debug!(count, "Process supervisor shut down");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start {
                config_id,
                binary,
                config_file,
                reply,
            } => {
                let result = self.start(config_id, &binary, &config_file).await;
                let _ = reply.send(result);
            }
            Command::Stop { config_id, reply } => {
                let _ = reply.send(self.stop(&config_id));
            }
            Command::StopAll { reply } => {
                let _ = reply.send(self.stop_all());
            }
            Command::List { reply } => {
                let mut list: Vec<ProcessInfo> =
                    self.handles.values().map(|h| h.info.clone()).collect();
                list.sort_by(|a, b| a.config_id.cmp(&b.config_id));
                let _ = reply.send(list);
            }
        }
    }

    async fn start(
        &mut self,
        config_id: String,
        binary: &Path,
        config_file: &Path,
    ) -> Result<ProcessInfo, SupervisorError> {
        let spec = launch_spec(binary, config_file)?;

        if let Some(mut previous) = self.handles.remove(&config_id) {
            if previous.signal() {
                tracing::info!(config_id = %config_id, pid = ?previous.info.pid, "Replacing running agent");
                self.bus
                    .publish(LogEvent::system(&config_id, "stopped existing process"));
            }
        }

        self.bus.publish(LogEvent::system(
            &config_id,
            format!(
                "starting {} with config {}",
                spec.binary.display(),
                spec.config_file.display()
            ),
        ));

        let mut child = match self.launcher.launch(&spec).await {
            Ok(child) => child,
            Err(source) => {
                tracing::warn!(config_id = %config_id, error = %source, "Failed to spawn agent");
                self.bus.publish(LogEvent::system(
                    &config_id,
                    format!("failed to start: {source}"),
                ));
                return Err(SupervisorError::Spawn {
                    binary: spec.binary,
                    source,
                });
            }
        };

        self.next_instance += 1;
        let info = ProcessInfo {
            config_id: config_id.clone(),
            pid: child.id(),
            started_at: Utc::now(),
            instance: self.next_instance,
        };

        if let Some(stdout) = child.take_stdout() {
            tokio::spawn(forward_lines(
                stdout,
                config_id.clone(),
                LogStream::Stdout,
                self.bus.clone(),
            ));
        }
        if let Some(stderr) = child.take_stderr() {
            tokio::spawn(forward_lines(
                stderr,
                config_id.clone(),
                LogStream::Stderr,
                self.bus.clone(),
            ));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(watch(
            child,
            kill_rx,
            self.stop_grace,
            config_id.clone(),
            info.instance,
            self.exit_tx.clone(),
        ));

        tracing::info!(config_id = %config_id, pid = ?info.pid, instance = info.instance, "Agent started");
        self.handles.insert(
            config_id,
            ProcessHandle {
                info: info.clone(),
                kill_tx: Some(kill_tx),
            },
        );
        Ok(info)
    }

    fn stop(&mut self, config_id: &str) -> bool {
        let Some(mut handle) = self.handles.remove(config_id) else {
            return false;
        };
        let signaled = handle.signal();
        if signaled {
            tracing::info!(config_id = %config_id, pid = ?handle.info.pid, "Stopped agent");
            self.bus
                .publish(LogEvent::system(config_id, "stopped process"));
        }
        signaled
    }

    fn stop_all(&mut self) -> usize {
        let mut count = 0;
        for (config_id, mut handle) in self.handles.drain() {
            if handle.signal() {
                self.bus
                    .publish(LogEvent::system(&config_id, "stopped process"));
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!(count, "Stopped all agents");
        }
        count
    }

    fn on_exit(&mut self, exited: Exited) {
        // A replaced process exits after its successor is registered; only
        // the matching instance may clear the slot.
        let current = self
            .handles
            .get(&exited.config_id)
            .is_some_and(|h| h.info.instance == exited.instance);
        if current {
            self.handles.remove(&exited.config_id);
        }

        let text = match &exited.exit {
            Ok(info) => format!("process {info}"),
            Err(e) => format!("lost track of process: {e}"),
        };
        // Only a live slot exiting on its own is unexpected
        let clean = !current || exited.exit.as_ref().is_ok_and(ExitInfo::success);
        if clean {
            tracing::info!(
                config_id = %exited.config_id,
                instance = exited.instance,
                current,
                "{text}"
            );
        } else {
            tracing::warn!(
                config_id = %exited.config_id,
                instance = exited.instance,
                "{text}"
            );
        }
        self.bus.publish(LogEvent::system(exited.config_id, text));
    }
}

/// Validate the paths and derive the launch parameters.
fn launch_spec(binary: &Path, config_file: &Path) -> Result<LaunchSpec, SupervisorError> {
    if !binary.is_file() {
        return Err(SupervisorError::BinaryNotFound(binary.to_path_buf()));
    }
    let binary = std::path::absolute(binary)
        .map_err(|_| SupervisorError::BinaryNotFound(binary.to_path_buf()))?;
    let working_dir = binary
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let config_file = if config_file.is_absolute() {
        config_file.to_path_buf()
    } else {
        working_dir.join(config_file)
    };
    if !config_file.is_file() {
        return Err(SupervisorError::ConfigNotFound(config_file));
    }

    Ok(LaunchSpec {
        binary,
        config_file,
        working_dir,
    })
}

async fn forward_lines(reader: OutputReader, config_id: String, stream: LogStream, bus: LogBus) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                bus.publish(LogEvent::new(&config_id, stream, line));
            }
            Err(e) => {
                tracing::debug!(config_id = %config_id, %stream, error = %e, "Output stream closed");
                break;
            }
        }
    }
}

async fn watch(
    mut child: Box<dyn AgentChild>,
    mut kill_rx: oneshot::Receiver<()>,
    stop_grace: Duration,
    config_id: String,
    instance: u64,
    exits: mpsc::UnboundedSender<Exited>,
) {
    let exit = tokio::select! {
        exit = child.wait() => exit,
        _ = &mut kill_rx => {
            if let Err(e) = child.terminate() {
                tracing::warn!(config_id = %config_id, error = %e, "Failed to signal agent");
            }
            match tokio::time::timeout(stop_grace, child.wait()).await {
                Ok(exit) => exit,
                Err(_) => {
                    tracing::warn!(config_id = %config_id, grace = ?stop_grace, "Agent ignored stop signal, killing");
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(config_id = %config_id, error = %e, "Failed to kill agent");
                    }
                    child.wait().await
                }
            }
        }
    };
    let _ = exits.send(Exited {
        config_id,
        instance,
        exit,
    });
}
