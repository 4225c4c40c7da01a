//! Registry Node Binary
//!
//! Imports genesis and replays a block feed into the registry state machine.
//!
//! Configuration comes from the TOML file named by `REGISTRY_NODE_CONFIG`,
//! otherwise from `REGISTRY_*` environment variables.

use anyhow::Context;
use registry_node::Config;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    let config = if let Ok(config_path) = std::env::var("REGISTRY_NODE_CONFIG") {
        Config::from_file(&config_path)
            .with_context(|| format!("loading config from {}", config_path))?
    } else {
        Config::from_env().context("loading config from environment")?
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!(
        chain_id = %config.chain_id,
        backend = ?config.registry.backend,
        genesis = %config.genesis_path.display(),
        blocks = %config.blocks_path.display(),
        "Starting registry node"
    );

    match registry_node::run(&config) {
        Ok(summary) => {
            info!(
                height = summary.height,
                app_hash = %summary.app_hash,
                "Registry node stopped"
            );
            Ok(())
        }
        Err(err) => {
            error!(error = %err, fatal = err.is_fatal(), "Registry node halted");
            Err(err.into())
        }
    }
}
