// ABOUTME: Launches agent child processes and abstracts the handle the supervisor holds.
// ABOUTME: TokioLauncher spawns real processes; tests substitute their own Launcher.

use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

/// Flag that tells the agent which configuration file to use.
pub const CONFIG_FLAG: &str = "-c";

pub type OutputReader = Box<dyn AsyncRead + Send + Unpin>;

/// Everything needed to start one agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Absolute path of the agent binary
    pub binary: PathBuf,
    /// Absolute path of the agent configuration file
    pub config_file: PathBuf,
    /// Directory containing the binary
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    pub fn args(&self) -> [OsString; 2] {
        [
            OsString::from(CONFIG_FLAG),
            self.config_file.clone().into_os_string(),
        ]
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal (unix only)
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {code}"),
            (None, Some(signal)) => write!(f, "terminated by signal {signal}"),
            (None, None) => write!(f, "exited with unknown status"),
        }
    }
}

/// A spawned agent process as seen by the supervisor.
#[async_trait]
pub trait AgentChild: Send {
    fn id(&self) -> Option<u32>;

    fn take_stdout(&mut self) -> Option<OutputReader>;

    fn take_stderr(&mut self) -> Option<OutputReader>;

    /// Ask the process to shut down (SIGTERM on unix) without waiting for it.
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process to stop without waiting for it.
    fn start_kill(&mut self) -> io::Result<()>;

    async fn wait(&mut self) -> io::Result<ExitInfo>;
}

/// Starts agent processes.
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn AgentChild>>;
}

/// Spawns real OS processes via tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

#[async_trait]
impl Launcher for TokioLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn AgentChild>> {
        let child = Command::new(&spec.binary)
            .args(spec.args())
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        tracing::info!(binary = %spec.binary.display(), pid = ?child.id(), "Spawned agent");
        Ok(Box::new(TokioChild(child)))
    }
}

struct TokioChild(Child);

#[async_trait]
impl AgentChild for TokioChild {
    fn id(&self) -> Option<u32> {
        self.0.id()
    }

    fn take_stdout(&mut self) -> Option<OutputReader> {
        self.0
            .stdout
            .take()
            .map(|out| Box::new(out) as OutputReader)
    }

    fn take_stderr(&mut self) -> Option<OutputReader> {
        self.0
            .stderr
            .take()
            .map(|err| Box::new(err) as OutputReader)
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // Already reaped
        let Some(pid) = self.0.id() else {
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.0.start_kill()
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.0.start_kill()
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        self.0.wait().await.map(ExitInfo::from)
    }
}
