/// Utility Functions for Configuration and Environment Management
///
/// Configuration comes from environment variables, optionally backed by a YAML
/// file (`kmcp.yaml` by default) with tool-specific sections:
///
/// ```yaml
/// tools:
///   create-user:
///     data_file: "./data/users.json"
/// ```
///
/// Environment variables win over the file.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;

use crate::core::error::ConfigError;

/// Config file read when `MCP_CONFIG_FILE` is not set.
pub const DEFAULT_CONFIG_FILE: &str = "kmcp.yaml";

/// Store location relative to the working directory when nothing else is configured.
pub const DEFAULT_DATA_FILE: &str = "src/data/users.json";

const DEFAULT_PORT: u16 = 3000;
const MAX_WORKERS: usize = 16;

/// Which transports the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Line-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// JSON-RPC over HTTP POST
    Http,
    /// STDIO and HTTP concurrently
    Both,
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            "both" => Ok(Self::Both),
            other => Err(ConfigError::InvalidTransport(other.to_string())),
        }
    }
}

/// Log line encoding on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line records
    #[default]
    Text,
    /// One JSON object per record
    Json,
}

impl LogFormat {
    /// `json` selects JSON output; anything else falls back to text.
    fn from_setting(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Everything the server needs to start, resolved once in `main`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name as reported in MCP initialize responses
    pub name: String,
    /// Server version as reported in MCP initialize responses
    pub version: String,
    pub transport: TransportMode,
    /// Bind address for HTTP mode
    pub host: String,
    pub port: u16,
    /// HTTP worker threads
    pub workers: usize,
    /// Backing file of the user store
    pub data_file: PathBuf,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Build the configuration from the process environment.
    ///
    /// # Returns
    /// The resolved configuration, or the first startup fault (unreadable or
    /// malformed config file, unknown transport mode)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of a variable, or None when unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config_path = PathBuf::from(var("MCP_CONFIG_FILE", DEFAULT_CONFIG_FILE));
        let file_config = load_config(&config_path)?;

        let transport: TransportMode = var("MCP_TRANSPORT_MODE", "stdio").parse()?;

        // Invalid ports fall back to the default rather than failing startup
        let port = lookup("PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let workers = lookup("WORKER_THREADS")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or_else(|| num_cpus::get().clamp(1, MAX_WORKERS));

        let data_file = lookup("USERS_DATA_FILE")
            .map(PathBuf::from)
            .or_else(|| {
                get_tool_config(&file_config, "create-user")
                    .get("data_file")
                    .and_then(|v| v.as_str())
                    .map(PathBuf::from)
            })
            .unwrap_or_else(default_data_file);

        Ok(Self {
            name: var("SERVER_NAME", "user-registry"),
            version: var("SERVER_VERSION", env!("CARGO_PKG_VERSION")),
            transport,
            host: var("HOST", "0.0.0.0"),
            port,
            workers,
            data_file,
            log_format: LogFormat::from_setting(&var("LOG_FORMAT", "text")),
        })
    }

    /// `host:port` string for binding the HTTP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_data_file() -> PathBuf {
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(DEFAULT_DATA_FILE)
}

/// Load configuration from a YAML file.
///
/// # Arguments
/// * `path` - YAML file to read
///
/// A missing file yields an empty configuration. A file that exists but cannot
/// be read or parsed is an error, since silently ignoring it would point the
/// store at the wrong place. Non-mapping documents are treated as empty.
pub fn load_config(path: &Path) -> Result<HashMap<String, Value>, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let doc: Value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    match doc {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(HashMap::new()),
    }
}

/// Get tool-specific configuration from the loaded configuration.
///
/// # Arguments
/// * `config` - Configuration returned by `load_config`
/// * `tool_name` - Name of the tool (e.g., "create-user")
///
/// # Returns
/// The `tools -> tool_name` section, or an empty map when the tool has none
pub fn get_tool_config(
    config: &HashMap<String, Value>,
    tool_name: &str,
) -> HashMap<String, Value> {
    config
        .get("tools")
        .and_then(|v| v.as_object())
        .and_then(|tools| tools.get(tool_name))
        .and_then(|v| v.as_object())
        .map(|tool_config| {
            tool_config
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_config_file() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("absent.yaml");
        let config = ServerConfig::from_lookup(lookup_from(&[(
            "MCP_CONFIG_FILE",
            missing.to_str().unwrap(),
        )]))
        .unwrap();

        assert_eq!(config.name, "user-registry");
        assert_eq!(config.transport, TransportMode::Stdio);
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert!(config.workers >= 1 && config.workers <= MAX_WORKERS);
        assert!(config.data_file.ends_with(DEFAULT_DATA_FILE));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_log_format_from_lookup() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("absent.yaml");
        let missing = missing.to_str().unwrap();

        for (setting, expected) in [
            ("json", LogFormat::Json),
            ("JSON", LogFormat::Json),
            ("text", LogFormat::Text),
            ("pretty", LogFormat::Text),
        ] {
            let config = ServerConfig::from_lookup(lookup_from(&[
                ("MCP_CONFIG_FILE", missing),
                ("LOG_FORMAT", setting),
            ]))
            .unwrap();
            assert_eq!(config.log_format, expected, "LOG_FORMAT={}", setting);
        }
    }

    #[test]
    fn test_env_overrides() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("absent.yaml");
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("MCP_CONFIG_FILE", missing.to_str().unwrap()),
            ("SERVER_NAME", "registry-test"),
            ("MCP_TRANSPORT_MODE", "both"),
            ("HOST", "127.0.0.1"),
            ("PORT", "not-a-port"),
            ("WORKER_THREADS", "3"),
            ("USERS_DATA_FILE", "/tmp/users.json"),
        ]))
        .unwrap();

        assert_eq!(config.name, "registry-test");
        assert_eq!(config.transport, TransportMode::Both);
        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.workers, 3);
        assert_eq!(config.data_file, PathBuf::from("/tmp/users.json"));
    }

    #[test]
    fn test_invalid_transport_is_rejected() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("absent.yaml");
        let err = ServerConfig::from_lookup(lookup_from(&[
            ("MCP_CONFIG_FILE", missing.to_str().unwrap()),
            ("MCP_TRANSPORT_MODE", "carrier-pigeon"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidTransport(ref m) if m == "carrier-pigeon"));
    }

    #[test]
    fn test_data_file_from_yaml_tool_section() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("kmcp.yaml");
        fs::write(
            &config_path,
            "tools:\n  create-user:\n    data_file: \"/srv/users.json\"\n",
        )
        .unwrap();

        let config = ServerConfig::from_lookup(lookup_from(&[(
            "MCP_CONFIG_FILE",
            config_path.to_str().unwrap(),
        )]))
        .unwrap();
        assert_eq!(config.data_file, PathBuf::from("/srv/users.json"));

        // The environment still wins over the file
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("MCP_CONFIG_FILE", config_path.to_str().unwrap()),
            ("USERS_DATA_FILE", "/env/users.json"),
        ]))
        .unwrap();
        assert_eq!(config.data_file, PathBuf::from("/env/users.json"));
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("kmcp.yaml");
        fs::write(&config_path, "tools: [unclosed\n").unwrap();

        let err = load_config(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_get_tool_config_missing_tool() {
        let mut config = HashMap::new();
        config.insert(
            "tools".to_string(),
            serde_json::json!({ "create-user": { "data_file": "x.json" } }),
        );

        assert!(get_tool_config(&config, "list-users").is_empty());
        assert_eq!(
            get_tool_config(&config, "create-user").get("data_file"),
            Some(&serde_json::json!("x.json"))
        );
    }
}
