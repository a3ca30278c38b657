// ABOUTME: Structured agent settings that get rendered into the agent's TOML file.
// ABOUTME: Server endpoint, auth, optional web admin, visitors, and pass-through keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Settings for one agent instance.
///
/// Field names follow the agent's own configuration language (camelCase),
/// so the same shape is used for the TOML file and for the JSON snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Address of the tunnel server
    pub server_addr: String,

    /// Port of the tunnel server
    pub server_port: u16,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Local web admin endpoint, omitted from the file when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_server: Option<WebServerConfig>,

    /// Visitors in declaration order
    #[serde(default)]
    pub visitors: Vec<Visitor>,

    /// Any other agent settings (proxies, log, transport, ...) carried through verbatim
    #[serde(flatten)]
    pub extra: toml::Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub method: String,
    pub token: String,
    /// Other `[auth]` keys, carried through verbatim
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: "token".to_string(),
            token: String::new(),
            extra: toml::Table::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    pub addr: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".to_string(),
            port: 7400,
            user: String::new(),
            password: String::new(),
            extra: toml::Table::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitorType {
    Stcp,
    #[default]
    Xtcp,
    Sudp,
}

impl fmt::Display for VisitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VisitorType::Stcp => "stcp",
            VisitorType::Xtcp => "xtcp",
            VisitorType::Sudp => "sudp",
        };
        f.write_str(s)
    }
}

/// A local endpoint that connects to a named proxy on the server side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VisitorType,
    #[serde(default)]
    pub server_name: String,
    pub bind_port: u16,
    #[serde(default)]
    pub secret_key: String,
    /// Other visitor keys (bindAddr, keepTunnelOpen, ...)
    #[serde(flatten)]
    pub extra: toml::Table,
}

/// A settings value that cannot be handed to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    MissingServerAddr,
    PortOutOfRange { field: String },
    UnnamedVisitor { index: usize },
    IncompleteProxy { index: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingServerAddr => write!(f, "serverAddr must not be empty"),
            Violation::PortOutOfRange { field } => {
                write!(f, "{field} must be between 1 and 65535")
            }
            Violation::UnnamedVisitor { index } => {
                write!(f, "visitor {} is missing a name", index + 1)
            }
            Violation::IncompleteProxy { index } => {
                write!(f, "proxy {} is missing a name or type", index + 1)
            }
        }
    }
}

impl Configuration {
    /// Minimal settings pointing at a server, with no visitors.
    pub fn new(server_addr: impl Into<String>, server_port: u16) -> Self {
        Self {
            server_addr: server_addr.into(),
            server_port,
            auth: AuthConfig::default(),
            web_server: None,
            visitors: Vec::new(),
            extra: toml::Table::new(),
        }
    }

    /// Check the invariants the agent relies on. Returns the first violation.
    pub fn validate(&self) -> Result<(), Violation> {
        if self.server_addr.trim().is_empty() {
            return Err(Violation::MissingServerAddr);
        }
        check_port("serverPort", self.server_port)?;
        if let Some(web) = &self.web_server {
            check_port("webServer.port", web.port)?;
        }
        for (index, visitor) in self.visitors.iter().enumerate() {
            if visitor.name.trim().is_empty() {
                return Err(Violation::UnnamedVisitor { index });
            }
            check_port(&format!("visitors[{index}].bindPort"), visitor.bind_port)?;
        }
        if let Some(toml::Value::Array(proxies)) = self.extra.get("proxies") {
            for (index, proxy) in proxies.iter().enumerate() {
                let named = |key: &str| {
                    proxy
                        .get(key)
                        .and_then(toml::Value::as_str)
                        .is_some_and(|v| !v.trim().is_empty())
                };
                if !named("name") || !named("type") {
                    return Err(Violation::IncompleteProxy { index });
                }
            }
        }
        Ok(())
    }
}

// u16 already caps the upper bound.
fn check_port(field: &str, port: u16) -> Result<(), Violation> {
    if port == 0 {
        return Err(Violation::PortOutOfRange {
            field: field.to_string(),
        });
    }
    Ok(())
}
