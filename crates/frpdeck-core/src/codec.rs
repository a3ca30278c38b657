// ABOUTME: Converts agent settings to and from the agent's TOML configuration language.
// ABOUTME: Strips application bookkeeping fields so only agent settings reach the file.

use crate::error::CodecError;
use crate::persist::write_atomic;
use crate::settings::Configuration;
use std::path::{Path, PathBuf};

/// Keys that belong to the application's record, never to the agent file.
pub const INTERNAL_KEYS: [&str; 4] = ["id", "name", "filePath", "isRunning"];

/// Settings read from a standalone TOML file, named after the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedConfig {
    pub name: String,
    pub path: PathBuf,
    pub settings: Configuration,
}

/// Render settings as the agent's TOML text.
pub fn encode(settings: &Configuration) -> Result<String, CodecError> {
    let mut table = match toml::Value::try_from(settings).map_err(CodecError::Encode)? {
        toml::Value::Table(table) => table,
        other => {
            return Err(CodecError::Invalid {
                reason: format!("settings rendered as {} instead of a table", other.type_str()),
            });
        }
    };
    strip_internal(&mut table);
    toml::to_string(&table).map_err(CodecError::Encode)
}

/// Parse the agent's TOML text back into settings.
///
/// TOML errors surface as [`CodecError::Syntax`]; text that parses but does not
/// describe valid settings surfaces as [`CodecError::Invalid`].
pub fn decode(text: &str) -> Result<Configuration, CodecError> {
    let mut table: toml::Table = toml::from_str(text).map_err(CodecError::Syntax)?;
    strip_internal(&mut table);

    let settings: Configuration = toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| CodecError::Invalid {
            reason: e.message().to_string(),
        })?;
    settings.validate().map_err(|v| CodecError::Invalid {
        reason: v.to_string(),
    })?;
    Ok(settings)
}

/// Read and decode a TOML file, naming the result after the file stem.
pub fn decode_file(path: &Path) -> Result<ImportedConfig, CodecError> {
    let text = std::fs::read_to_string(path).map_err(|source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let settings = decode(&text)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(ImportedConfig {
        name,
        path: path.to_path_buf(),
        settings,
    })
}

/// Encode settings and atomically replace the agent file at `path`.
pub fn write_file(path: &Path, settings: &Configuration) -> Result<(), CodecError> {
    let text = encode(settings)?;
    write_atomic(path, text.as_bytes()).map_err(|source| CodecError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "Wrote agent config");
    Ok(())
}

fn strip_internal(table: &mut toml::Table) {
    for key in INTERNAL_KEYS {
        table.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{AuthConfig, Visitor, VisitorType, WebServerConfig};
    use std::io::Write;

    fn sample() -> Configuration {
        let mut settings = Configuration::new("120.46.90.102", 65535);
        settings.auth = AuthConfig {
            method: "token".to_string(),
            token: "abc123".to_string(),
            extra: toml::Table::new(),
        };
        settings.web_server = Some(WebServerConfig {
            addr: "0.0.0.0".to_string(),
            port: 7401,
            user: "admin".to_string(),
            password: "pw".to_string(),
            extra: toml::Table::new(),
        });
        for (name, port) in [("zeta", 6003), ("alpha", 6001), ("mid", 65535)] {
            settings.visitors.push(Visitor {
                name: name.to_string(),
                kind: VisitorType::Stcp,
                server_name: format!("{name}-server"),
                bind_port: port,
                secret_key: "key".to_string(),
                extra: toml::Table::new(),
            });
        }
        settings
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let settings = sample();
        let text = encode(&settings).unwrap();
        let decoded = decode(&text).unwrap();
        assert_eq!(decoded, settings);

        let names: Vec<_> = decoded.visitors.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_large_ports_stay_plain_integers() {
        let text = encode(&sample()).unwrap();
        assert!(text.contains("serverPort = 65535"), "{text}");
        assert!(text.contains("bindPort = 65535"), "{text}");
        assert!(!text.contains("e+"));
        assert!(!text.contains("65535.0"));
        assert!(!text.contains("65_535"));
    }

    #[test]
    fn test_encode_uses_agent_key_names() {
        let text = encode(&sample()).unwrap();
        assert!(text.contains("serverAddr = \"120.46.90.102\""));
        assert!(text.contains("[auth]"));
        assert!(text.contains("[webServer]"));
        assert!(text.contains("[[visitors]]"));
        assert!(text.contains("type = \"stcp\""));
        assert!(text.contains("serverName = \"zeta-server\""));
    }

    #[test]
    fn test_encode_strips_internal_fields() {
        let mut settings = sample();
        settings
            .extra
            .insert("id".to_string(), toml::Value::String("1700000000000".into()));
        settings
            .extra
            .insert("name".to_string(), toml::Value::String("home".into()));
        settings
            .extra
            .insert("filePath".to_string(), toml::Value::String("home.toml".into()));
        settings
            .extra
            .insert("isRunning".to_string(), toml::Value::Boolean(true));

        let text = encode(&settings).unwrap();
        let table: toml::Table = toml::from_str(&text).unwrap();
        for key in INTERNAL_KEYS {
            assert!(!table.contains_key(key), "{key} leaked into {text}");
        }
    }

    #[test]
    fn test_decode_ignores_internal_fields() {
        let text = r#"
            id = "42"
            isRunning = true
            serverAddr = "example.com"
            serverPort = 7000
        "#;
        let settings = decode(text).unwrap();
        assert!(settings.extra.is_empty());
    }

    #[test]
    fn test_unknown_agent_settings_survive() {
        let text = r#"
            serverAddr = "example.com"
            serverPort = 7000
            loginFailExit = false

            [log]
            level = "debug"

            [[proxies]]
            name = "ssh"
            type = "tcp"
            localPort = 22
            remotePort = 6000
        "#;
        let settings = decode(text).unwrap();
        assert_eq!(settings.extra.len(), 3);

        let again = decode(&encode(&settings).unwrap()).unwrap();
        assert_eq!(again, settings);
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let settings = decode("serverAddr = \"example.com\"\nserverPort = 7000\n").unwrap();
        assert_eq!(settings.auth, AuthConfig::default());
        assert!(settings.web_server.is_none());
        assert!(settings.visitors.is_empty());
    }

    #[test]
    fn test_syntax_error_is_distinct() {
        let err = decode("serverAddr = ").unwrap_err();
        assert!(matches!(err, CodecError::Syntax(_)));
        assert!(err.is_syntax());
    }

    #[test]
    fn test_missing_required_field_is_invalid() {
        let err = decode("serverAddr = \"example.com\"").unwrap_err();
        match err {
            CodecError::Invalid { reason } => assert!(reason.contains("serverPort"), "{reason}"),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_port_is_invalid() {
        let err = decode("serverAddr = \"example.com\"\nserverPort = 70000").unwrap_err();
        assert!(matches!(err, CodecError::Invalid { .. }));

        let err = decode("serverAddr = \"example.com\"\nserverPort = 0").unwrap_err();
        assert!(matches!(err, CodecError::Invalid { .. }));
    }

    #[test]
    fn test_visitor_without_type_is_invalid() {
        let text = r#"
            serverAddr = "example.com"
            serverPort = 7000

            [[visitors]]
            name = "rdp"
            bindPort = 6000
        "#;
        assert!(matches!(decode(text), Err(CodecError::Invalid { .. })));
    }

    #[test]
    fn test_decode_file_names_after_stem() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "serverAddr = \"example.com\"\nserverPort = 7000").unwrap();

        let imported = decode_file(file.path()).unwrap();
        let stem = file.path().file_stem().unwrap().to_string_lossy();
        assert_eq!(imported.name, stem);
        assert_eq!(imported.settings.server_port, 7000);
    }

    #[test]
    fn test_decode_file_missing_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = decode_file(&path).unwrap_err();
        assert!(matches!(err, CodecError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_write_file_creates_agent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frp").join("home.toml");
        write_file(&path, &sample()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(decode(&text).unwrap(), sample());
    }

    #[test]
    fn test_nested_agent_settings_survive_round_trip() {
        let text = r#"
            serverAddr = "frp.example.com"
            serverPort = 7000

            [auth]
            method = "token"
            token = "t"
            additionalScopes = ["HeartBeats", "NewWorkConns"]

            [webServer]
            addr = "127.0.0.1"
            port = 7400
            pprofEnable = true

            [[visitors]]
            name = "rdp"
            type = "stcp"
            serverName = "desk"
            bindPort = 6000
            bindAddr = "0.0.0.0"
            keepTunnelOpen = true
        "#;
        let decoded = decode(text).unwrap();
        let visitor = &decoded.visitors[0];
        assert_eq!(visitor.extra["bindAddr"].as_str(), Some("0.0.0.0"));
        assert_eq!(visitor.extra["keepTunnelOpen"].as_bool(), Some(true));
        assert_eq!(decoded.auth.extra["additionalScopes"].as_array().unwrap().len(), 2);
        let web = decoded.web_server.as_ref().unwrap();
        assert_eq!(web.extra["pprofEnable"].as_bool(), Some(true));

        let encoded = encode(&decoded).unwrap();
        assert!(encoded.contains("bindAddr = \"0.0.0.0\""), "{encoded}");
        assert!(encoded.contains("keepTunnelOpen = true"), "{encoded}");
        assert!(encoded.contains("additionalScopes"), "{encoded}");
        assert!(encoded.contains("pprofEnable = true"), "{encoded}");
        assert_eq!(decode(&encoded).unwrap(), decoded);
    }
}
