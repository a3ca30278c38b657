// ABOUTME: Shared logging setup for frpdeck binaries
// ABOUTME: init() for stderr, init_file() for long-running sessions, init_for() for crate-scoped output

use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// File-based logging. Default: WARN level, RUST_LOG override.
/// Logs to ~/.config/frpdeck/{app_name}/{app_name}.log
/// If setup fails, prints a warning to stderr and continues without logging.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = dirs::config_dir().ok_or("could not determine config directory")?;
    let log_path = log_file_path(&config_dir, app_name);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_ansi(false)
        .init();

    Ok(())
}

/// Location of the log file for `app_name` under `config_dir`.
pub fn log_file_path(config_dir: &Path, app_name: &str) -> PathBuf {
    config_dir
        .join("frpdeck")
        .join(app_name)
        .join(format!("{app_name}.log"))
}

/// Crate-filtered logging to stderr. Default: INFO for named crate, WARN for everything else.
pub fn init_for(crate_name: &str) {
    let filter = EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into())
        .add_directive(
            crate_directive(crate_name)
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// Crate names use dashes, tracing targets use underscores.
fn crate_directive(crate_name: &str) -> String {
    format!("{}=info", crate_name.replace('-', "_"))
}
