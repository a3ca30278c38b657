// ABOUTME: Core of frpdeck: named frpc configurations and the processes running them.
// ABOUTME: Config store, TOML codec, log bus, process supervisor, and path resolution.

pub mod binary;
pub mod codec;
pub mod config;
pub mod error;
pub mod log_bus;
pub mod paths;
mod persist;
pub mod record;
pub mod settings;
pub mod store;
pub mod supervisor;

pub use binary::AgentBinarySettings;
pub use codec::{decode, decode_file, encode, ImportedConfig};
pub use config::DeckConfig;
pub use error::{CodecError, ConfigError, StoreError, SupervisorError};
pub use log_bus::{LogBus, LogEvent, LogStream, LogSubscription};
pub use paths::{DeploymentMode, Layout};
pub use record::ConfigRecord;
pub use settings::{AuthConfig, Configuration, Visitor, VisitorType, WebServerConfig};
pub use store::{ConfigStore, ConfigUpdate, StoreEvent};
pub use supervisor::{ProcessInfo, ProcessSupervisor};
