//! Configuration for the registry state machine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-memory store, state is lost on exit
    Memory,
    /// RocksDB store under `data_dir` (requires the `rocksdb` feature)
    Rocksdb,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Store backend
    pub backend: StoreBackend,

    /// Run invariant checks every N committed blocks (0 disables)
    pub invariant_check_period: u64,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/registry"),
            backend: StoreBackend::Memory,
            invariant_check_period: 1,
            rocksdb: RocksDbConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
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

    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("REGISTRY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(backend) = std::env::var("REGISTRY_STORE_BACKEND") {
            config.backend = match backend.to_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "rocksdb" => StoreBackend::Rocksdb,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown store backend: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(period) = std::env::var("REGISTRY_INVARIANT_CHECK_PERIOD") {
            config.invariant_check_period = period
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid check period: {}", e)))?;
        }

        Ok(config)
    }
}
