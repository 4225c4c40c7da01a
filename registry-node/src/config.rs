//! Configuration for the registry node

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Expected chain identifier
    pub chain_id: String,

    /// Genesis document (JSON)
    pub genesis_path: PathBuf,

    /// Block feed (JSON lines)
    pub blocks_path: PathBuf,

    /// Emit logs as JSON
    pub log_json: bool,

    /// Write the final state as a genesis document here
    pub export_path: Option<PathBuf>,

    /// State machine configuration
    pub registry: registry_core::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_id: "registry-1".to_string(),
            genesis_path: PathBuf::from("./genesis.json"),
            blocks_path: PathBuf::from("./blocks.jsonl"),
            log_json: false,
            export_path: None,
            registry: registry_core::Config::default(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// State machine settings are read by [`registry_core::Config::from_env`].
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config {
            registry: registry_core::Config::from_env()?,
            ..Config::default()
        };

        if let Ok(chain_id) = std::env::var("REGISTRY_CHAIN_ID") {
            config.chain_id = chain_id;
        }

        if let Ok(path) = std::env::var("REGISTRY_GENESIS") {
            config.genesis_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("REGISTRY_BLOCKS") {
            config.blocks_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("REGISTRY_EXPORT") {
            config.export_path = Some(PathBuf::from(path));
        }

        if let Ok(format) = std::env::var("REGISTRY_LOG_FORMAT") {
            config.log_json = format.eq_ignore_ascii_case("json");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_core::config::StoreBackend;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chain_id, "registry-1");
        assert!(!config.log_json);
        assert_eq!(config.registry.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_from_file_with_nested_registry_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            r#"
chain_id = "registry-test"
blocks_path = "/var/lib/registry/blocks.jsonl"
log_json = true

[registry]
backend = "rocksdb"
invariant_check_period = 10
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.chain_id, "registry-test");
        assert!(config.log_json);
        assert_eq!(config.genesis_path, PathBuf::from("./genesis.json"));
        assert_eq!(config.registry.backend, StoreBackend::Rocksdb);
        assert_eq!(config.registry.invariant_check_period, 10);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "chain_id = [").unwrap();
        assert!(matches!(Config::from_file(&path), Err(crate::Error::Config(_))));
    }
}
