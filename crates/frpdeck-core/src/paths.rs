// ABOUTME: Resolves logical resource paths against the roots a deployment may use.
// ABOUTME: Candidate roots are a pure function of the deployment mode and the process layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::path::{Path, PathBuf};

/// Directory holding per-agent configuration files, relative to a root.
pub const AGENT_DIR: &str = "frp";

/// How the application was deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Running from an installed executable.
    #[default]
    Installed,
    /// Running from a source checkout.
    Development,
    /// Running from a bundle with read-only resources next to a writable exe dir.
    Packaged,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentMode::Installed => "installed",
            DeploymentMode::Development => "development",
            DeploymentMode::Packaged => "packaged",
        };
        f.write_str(s)
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "installed" => Ok(DeploymentMode::Installed),
            "development" => Ok(DeploymentMode::Development),
            "packaged" => Ok(DeploymentMode::Packaged),
            other => Err(format!(
                "unknown deployment mode \"{other}\" (expected installed, development or packaged)"
            )),
        }
    }
}

/// Directories that describe where the running process lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub exe_dir: PathBuf,
    pub dev_root: PathBuf,
    pub resources_dir: PathBuf,
}

impl Layout {
    /// Layout of the current process. Unknown directories fall back to ".".
    pub fn current() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let dev_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let resources_dir = exe_dir.join("resources");
        Self {
            exe_dir,
            dev_root,
            resources_dir,
        }
    }
}

/// Roots to try, most preferred first. The first root is where new files are written.
pub fn candidate_roots(mode: DeploymentMode, layout: &Layout) -> Vec<PathBuf> {
    let roots = match mode {
        DeploymentMode::Installed => vec![layout.exe_dir.clone()],
        DeploymentMode::Development => vec![layout.dev_root.clone(), layout.exe_dir.clone()],
        DeploymentMode::Packaged => vec![layout.exe_dir.clone(), layout.resources_dir.clone()],
    };

    let mut unique: Vec<PathBuf> = Vec::with_capacity(roots.len());
    for root in roots {
        if !unique.contains(&root) {
            unique.push(root);
        }
    }
    unique
}

/// First candidate under `roots` that exists.
pub fn resolve(relative: impl AsRef<Path>, roots: &[PathBuf]) -> Option<PathBuf> {
    let relative = relative.as_ref();
    roots
        .iter()
        .map(|root| root.join(relative))
        .find(|candidate| candidate.exists())
}

/// Where to create `relative` when it does not exist yet.
pub fn write_target(relative: impl AsRef<Path>, roots: &[PathBuf]) -> Option<PathBuf> {
    roots.first().map(|root| root.join(relative.as_ref()))
}

/// Normalize a record's file path so it lives under [`AGENT_DIR`].
///
/// `home.toml` and `frp/home.toml` both become `frp/home.toml`.
pub fn agent_relative(file_path: &str) -> PathBuf {
    let trimmed = file_path.trim_start_matches(['/', '\\']);
    let bare = trimmed
        .strip_prefix(AGENT_DIR)
        .and_then(|rest| rest.strip_prefix(['/', '\\']))
        .unwrap_or(trimmed);
    Path::new(AGENT_DIR).join(bare)
}
