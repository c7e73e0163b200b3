//! `vcs-pypi` binary: serves the index or checks a configuration file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use vcs_pypi_server::{run_server, Config};

#[derive(Parser)]
#[command(name = "vcs-pypi")]
#[command(about = "PEP 503 simple index backed by GitHub release assets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the index server
    Serve {
        /// Path to the JSON configuration file
        #[arg(long, short, default_value = "config.json")]
        config: PathBuf,

        /// Host to bind to, overrides `server.host`
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to, overrides `server.port`
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate a configuration file and exit
    CheckConfig {
        /// Path to the JSON configuration file
        #[arg(long, short, default_value = "config.json")]
        config: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.resolve_token_from_env();
    config.validate().map_err(|e| {
        error!(path = %path.display(), error = %e, "Invalid configuration");
        anyhow::anyhow!("{}: {}", path.display(), e)
    })?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = vcs_pypi_logging::init_subscriber();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut config = load_config(&config)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }

        Commands::CheckConfig { config: path } => {
            let config = load_config(&path)?;
            info!(path = %path.display(), "Configuration is valid");
            println!("Configuration {} is valid", path.display());
            println!("   Provider: {:?}", config.provider.kind);
            for owner in &config.provider.owners {
                println!("   Owner:    {} ({:?})", owner.name, owner.kind);
            }
            println!(
                "   Token:    {}",
                if config.provider.token.is_some() { "configured" } else { "none" }
            );
            Ok(())
        }
    }
}
