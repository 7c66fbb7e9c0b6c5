//! Configuration system for rankmesh
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (RANKMESH_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::group::Rank;

/// File name searched for in the standard locations
pub const CONFIG_FILE_NAME: &str = "rankmesh.toml";

/// Complete rankmesh configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Group membership
    pub group: GroupSettings,

    /// Connection setup and frame limits
    pub transport: TransportSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Group membership settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    /// This process's rank (usually supplied per process via CLI or env)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<Rank>,

    /// Listen address of every rank, in rank order
    pub peers: Vec<String>,
}

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Upper bound on forming the mesh in milliseconds
    pub connect_timeout_ms: u64,

    /// Per-frame I/O timeout in milliseconds (0 = none)
    pub io_timeout_ms: u64,

    /// First dial retry delay in milliseconds
    pub initial_retry_ms: u64,

    /// Largest dial retry delay in milliseconds
    pub max_retry_ms: u64,

    /// Largest accepted frame payload in MB
    pub max_frame_mb: u64,

    /// Disable Nagle's algorithm on peer connections
    pub nodelay: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            io_timeout_ms: 0,
            initial_retry_ms: 50,
            max_retry_ms: 2_000,
            max_frame_mb: 1024,
            nodelay: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl MeshConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match Self::find_config_file(config_path)? {
            Some(path) => {
                let config = Self::load_file(&path)?;
                info!(path = %path.display(), "Configuration loaded from file");
                config
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Parse one configuration file without overrides or validation
    pub fn load_file(path: &std::path::Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration file");
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e.message()),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    pub fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        for path in search_paths() {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Group settings
        if let Ok(val) = std::env::var("RANKMESH_RANK") {
            if let Ok(n) = val.trim().parse() {
                self.group.rank = Some(n);
            }
        }
        if let Ok(val) = std::env::var("RANKMESH_PEERS") {
            self.group.peers = split_peer_list(&val);
        }

        // Transport settings
        if let Ok(val) = std::env::var("RANKMESH_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.transport.connect_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("RANKMESH_IO_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.transport.io_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("RANKMESH_MAX_FRAME_MB") {
            if let Ok(n) = val.parse() {
                self.transport.max_frame_mb = n;
            }
        }
        if let Ok(val) = std::env::var("RANKMESH_NODELAY") {
            self.transport.nodelay = val.to_lowercase() == "true" || val == "1";
        }

        // Logging settings
        if let Ok(val) = std::env::var("RANKMESH_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("RANKMESH_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("RANKMESH_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (i, peer) in self.group.peers.iter().enumerate() {
            validate_peer_addr(peer).map_err(|msg| {
                Error::config_field_invalid(format!("group.peers[{}]", i), msg)
            })?;
        }

        if let Some(rank) = self.group.rank {
            if !self.group.peers.is_empty() && rank as usize >= self.group.peers.len() {
                return Err(Error::config_field_invalid(
                    "group.rank",
                    format!(
                        "rank {} is outside a group of {} peers",
                        rank,
                        self.group.peers.len()
                    ),
                ));
            }
        }

        let t = &self.transport;
        if t.connect_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "transport.connect_timeout_ms",
                "connect timeout must be greater than zero",
            ));
        }
        if t.initial_retry_ms == 0 || t.max_retry_ms < t.initial_retry_ms {
            return Err(Error::config_field_invalid(
                "transport.max_retry_ms",
                "retry delays must be non-zero with max_retry_ms >= initial_retry_ms",
            ));
        }
        if t.max_frame_mb == 0 {
            return Err(Error::config_field_invalid(
                "transport.max_frame_mb",
                "frame limit must be greater than zero",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Peer addresses parsed as literal socket addresses.
    ///
    /// Host names are resolved by the rendezvous, not here.
    pub fn peer_socket_addrs(&self) -> Option<Vec<SocketAddr>> {
        self.group
            .peers
            .iter()
            .map(|p| p.parse().ok())
            .collect()
    }
}

/// Standard configuration locations, in search order
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("rankmesh").join(CONFIG_FILE_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".rankmesh").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/rankmesh").join(CONFIG_FILE_NAME));
    paths
}

/// Split a comma separated peer list, dropping blanks
pub fn split_peer_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Check that `addr` looks like `host:port`
fn validate_peer_addr(addr: &str) -> std::result::Result<(), String> {
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("'{}' is not a host:port address", addr))?;
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(format!("'{}' has an invalid host", addr));
    }
    port.parse::<u16>()
        .map(|_| ())
        .map_err(|_| format!("'{}' has an invalid port", addr))
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location written by `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rankmesh")
        .join(CONFIG_FILE_NAME)
}

/// Initialize a new configuration file, returning where it was written
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# rankmesh configuration
#
# Every rank of a group uses the same file; only the rank differs, and it is
# usually passed per process with --rank or RANKMESH_RANK.

[group]
# This process's rank, 0-based
# rank = 0

# Listen address of every rank, in rank order
peers = []
# peers = ["10.0.0.1:29500", "10.0.0.2:29500"]

[transport]
# Upper bound on forming the mesh in milliseconds
connect_timeout_ms = 30000

# Per-frame I/O timeout in milliseconds (0 = wait forever)
io_timeout_ms = 0

# Dial retry delays in milliseconds (exponential backoff)
initial_retry_ms = 50
max_retry_ms = 2000

# Largest accepted frame payload in MB
max_frame_mb = 1024

# Disable Nagle's algorithm on peer connections
nodelay = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.rankmesh/logs/rankmesh.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MeshConfig::default();
        assert!(config.group.peers.is_empty());
        assert_eq!(config.transport.connect_timeout_ms, 30_000);
        assert_eq!(config.transport.max_frame_mb, 1024);
        assert!(config.transport.nodelay);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_generated_default_parses_and_validates() {
        let config: MeshConfig = toml::from_str(&generate_default_config()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.initial_retry_ms, 50);
    }

    #[test]
    fn test_validation_rank_out_of_range() {
        let mut config = MeshConfig::default();
        config.group.peers = vec!["127.0.0.1:1".into(), "127.0.0.1:2".into()];
        config.group.rank = Some(2);

        match config.validate().unwrap_err() {
            Error::ConfigValidation { field, .. } => assert_eq!(field.as_deref(), Some("group.rank")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validation_bad_peer() {
        let mut config = MeshConfig::default();
        config.group.peers = vec!["node-a:29500".into(), "node-b".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("node-b"));

        config.group.peers = vec!["node-a:29500".into(), "[::1]:29501".into()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = MeshConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeouts() {
        let mut config = MeshConfig::default();
        config.transport.connect_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = MeshConfig::default();
        config.transport.max_retry_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_peer_list() {
        assert_eq!(
            split_peer_list(" a:1, b:2 ,,c:3 "),
            vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]
        );
        assert!(split_peer_list("").is_empty());
    }

    #[test]
    fn test_peer_socket_addrs() {
        let mut config = MeshConfig::default();
        config.group.peers = vec!["127.0.0.1:4000".into(), "127.0.0.1:4001".into()];
        assert_eq!(config.peer_socket_addrs().unwrap().len(), 2);

        config.group.peers.push("localhost:4002".into());
        assert!(config.peer_socket_addrs().is_none());
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[group]
rank = 1
peers = ["10.0.0.1:29500", "10.0.0.2:29500"]

[transport]
connect_timeout_ms = 5000
io_timeout_ms = 250

[logging]
level = "debug"
"#;

        let config: MeshConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.group.rank, Some(1));
        assert_eq!(config.group.peers.len(), 2);
        assert_eq!(config.transport.connect_timeout_ms, 5000);
        assert_eq!(config.transport.io_timeout_ms, 250);
        assert_eq!(config.transport.max_retry_ms, 2000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut config = MeshConfig::default();
        config.group.peers = vec!["127.0.0.1:1".into()];
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: MeshConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.group.peers, config.group.peers);
        assert_eq!(parsed.transport.max_frame_mb, config.transport.max_frame_mb);
    }
}
