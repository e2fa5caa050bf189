//! Docker proxy binary

use anyhow::{Context, Result};
use clap::Parser;
use docker_proxy::config::DEFAULT_CONFIG_PATH;
use docker_proxy::tls::{CERT_PATH, KEY_PATH};
use docker_proxy::{run_server, Config, SERVICE_NAME};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "docker-proxy")]
#[command(about = "Caching, host-routing proxy for container registries")]
#[command(version)]
struct Cli {
    /// Path to the config file (YAML, or JSON with a .json extension)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = proxy_logging::init_subscriber();

    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    info!(service = SERVICE_NAME, config = ?config, "Loaded configuration");

    if config.use_tls && (config.cert_file_path != CERT_PATH || config.key_file_path != KEY_PATH) {
        warn!(
            configured_cert = %config.cert_file_path,
            configured_key = %config.key_file_path,
            "Certificates are always reloaded from {} and {}; configured paths are ignored",
            CERT_PATH,
            KEY_PATH
        );
    }

    run_server(config).await
}
