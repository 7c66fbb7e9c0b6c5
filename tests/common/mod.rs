//! Common test utilities and fixtures
//!
//! This module provides shared test infrastructure

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use rankmesh::{ProcessGroup, TransportConfig};

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Get the valid config fixture path
pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

/// Get the invalid config fixture path
pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// Transport settings that fail fast instead of hanging a broken test
pub fn test_transport() -> TransportConfig {
    TransportConfig {
        connect_timeout: Duration::from_secs(10),
        io_timeout: Some(Duration::from_secs(10)),
        initial_retry: Duration::from_millis(10),
        max_retry: Duration::from_millis(200),
        ..TransportConfig::default()
    }
}

/// Form an `n`-rank loopback group
pub async fn local_group(n: u32) -> Vec<ProcessGroup> {
    ProcessGroup::bootstrap_local(n, &test_transport())
        .await
        .expect("local group should form")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_exist() {
        assert!(fixtures_dir().exists(), "Fixtures directory should exist");
        assert!(valid_config_fixture().exists());
        assert!(invalid_config_fixture().exists());
    }
}
