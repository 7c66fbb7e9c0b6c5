//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides

mod common;

use std::fs;
use std::path::PathBuf;

use predicates::prelude::*;
use tempfile::TempDir;

use rankmesh::{Error, MeshConfig, StaticRendezvous, TransportConfig};

/// Test fixture for configuration testing
struct ConfigFixture {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rankmesh.toml");
        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    fn with(content: &str) -> Self {
        let fixture = Self::new();
        fs::write(&fixture.config_path, content).unwrap();
        fixture
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    fn validate_cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("rankmesh").unwrap();
        cmd.env_remove("RANKMESH_RANK")
            .env_remove("RANKMESH_PEERS")
            .env_remove("RANKMESH_LOG_LEVEL")
            .args(["config", "validate", "--config", self.path()]);
        cmd
    }
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_empty_config_uses_defaults() {
    let fixture = ConfigFixture::with("");
    let config = MeshConfig::load(Some(fixture.path())).unwrap();

    assert!(config.group.peers.is_empty());
    assert_eq!(config.transport.connect_timeout_ms, 30000);
    assert_eq!(config.transport.max_frame_mb, 1024);
    assert!(config.transport.nodelay);
    assert_eq!(config.logging.max_files, 5);
}

#[test]
fn test_fixture_loads() {
    let config = MeshConfig::load(common::valid_config_fixture().to_str()).unwrap();

    assert_eq!(
        config.group.peers,
        vec!["127.0.0.1:29500".to_string(), "127.0.0.1:29501".to_string()]
    );
    assert_eq!(config.transport.io_timeout_ms, 10000);
    assert_eq!(config.logging.level, "warn");
}

#[test]
fn test_full_group_config() {
    let fixture = ConfigFixture::with(
        r#"
[group]
rank = 2
peers = ["node-a:29500", "node-b:29500", "10.0.0.3:29500"]

[transport]
connect_timeout_ms = 1000
io_timeout_ms = 250
max_frame_mb = 8
nodelay = false
"#,
    );
    let config = MeshConfig::load(Some(fixture.path())).unwrap();
    assert_eq!(config.group.rank, Some(2));
    assert_eq!(config.group.peers.len(), 3);

    // host names are legal; only literal addresses parse up front
    assert!(config.peer_socket_addrs().is_none());

    let transport = TransportConfig::from(&config.transport);
    assert_eq!(transport.connect_timeout.as_millis(), 1000);
    assert_eq!(transport.io_timeout.map(|d| d.as_millis()), Some(250));
    assert_eq!(transport.max_frame_bytes, 8 * 1024 * 1024);
    assert!(!transport.nodelay);

    assert!(StaticRendezvous::from_config(&config).is_ok());
}

#[test]
fn test_zero_io_timeout_means_none() {
    let fixture = ConfigFixture::with("[transport]\nio_timeout_ms = 0\n");
    let config = MeshConfig::load(Some(fixture.path())).unwrap();
    assert!(TransportConfig::from(&config.transport).io_timeout.is_none());
}

#[test]
fn test_log_file_path_is_expanded() {
    let fixture = ConfigFixture::with("[logging]\nfile = \"~/logs/rankmesh.log\"\n");
    let config = MeshConfig::load(Some(fixture.path())).unwrap();
    let file = config.logging.file.unwrap();
    assert!(!file.starts_with('~'), "{} was not expanded", file);
    assert!(file.ends_with("logs/rankmesh.log"));
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_rank_outside_group() {
    let err = MeshConfig::load(common::invalid_config_fixture().to_str()).unwrap_err();
    match err {
        Error::ConfigValidation { field, .. } => assert_eq!(field.as_deref(), Some("group.rank")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_bad_peer_address() {
    let fixture = ConfigFixture::with("[group]\npeers = [\"127.0.0.1:29500\", \"no-port\"]\n");
    let err = MeshConfig::load(Some(fixture.path())).unwrap_err();
    match err {
        Error::ConfigValidation { field, .. } => {
            assert_eq!(field.as_deref(), Some("group.peers[1]"))
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_bad_log_level() {
    let fixture = ConfigFixture::with("[logging]\nlevel = \"loud\"\n");
    fixture
        .validate_cmd()
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("Invalid log level"));
}

#[test]
fn test_zero_connect_timeout() {
    let fixture = ConfigFixture::with("[transport]\nconnect_timeout_ms = 0\n");
    assert!(matches!(
        MeshConfig::load(Some(fixture.path())),
        Err(Error::ConfigValidation { .. })
    ));
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::with("[group\npeers = ");
    let err = MeshConfig::load(Some(fixture.path())).unwrap_err();
    assert!(matches!(err, Error::ConfigParse { .. }));

    fixture
        .validate_cmd()
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("E101"));
}

#[test]
fn test_wrong_value_type() {
    let fixture = ConfigFixture::with("[transport]\nconnect_timeout_ms = \"soon\"\n");
    assert!(matches!(
        MeshConfig::load(Some(fixture.path())),
        Err(Error::ConfigParse { .. })
    ));
}

#[test]
fn test_missing_file() {
    let fixture = ConfigFixture::new();
    assert!(matches!(
        MeshConfig::load(Some(fixture.path())),
        Err(Error::ConfigNotFound { .. })
    ));
}

// ─────────────────────────────────────────────────────────────────
// Environment Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_peers_and_rank() {
    let fixture = ConfigFixture::with("");
    let mut cmd = assert_cmd::Command::cargo_bin("rankmesh").unwrap();
    cmd.env("RANKMESH_RANK", "1")
        .env("RANKMESH_PEERS", "10.1.1.1:7000, 10.1.1.2:7000")
        .args(["config", "show", "--config", fixture.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("rank = 1"))
        .stdout(predicate::str::contains("10.1.1.2:7000"));
}

#[test]
fn test_env_override_is_validated() {
    let fixture = ConfigFixture::with("[group]\npeers = [\"127.0.0.1:1\"]\n");
    let mut cmd = fixture.validate_cmd();
    cmd.env("RANKMESH_RANK", "4")
        .assert()
        .failure()
        .stderr(predicate::str::contains("outside a group of 1"));
}

#[test]
fn test_show_custom_values() {
    let fixture = ConfigFixture::with(
        r#"
[transport]
max_frame_mb = 77

[logging]
level = "debug"
json_format = true
"#,
    );
    let mut cmd = assert_cmd::Command::cargo_bin("rankmesh").unwrap();
    cmd.env_remove("RANKMESH_LOG_LEVEL")
        .env_remove("RANKMESH_LOG_JSON")
        .args(["config", "show", "--config", fixture.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_frame_mb = 77"))
        .stdout(predicate::str::contains("level = \"debug\""))
        .stdout(predicate::str::contains("json_format = true"));
}
