//! Spectrum Simulator Server
//!
//! Simulates a shared radio spectrum over TCP. Clients listen on numbered
//! channels and receive everything sent to them.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use spectrum_sim::{ServerConfig, SpectrumServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "spectrum-server", version, about = "Simulated radio spectrum over TCP")]
struct Cli {
    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ServerConfig::default(),
        };

        Ok(match self.port {
            Some(port) => config.port(port),
            None => config,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "spectrum_server=info,spectrum_sim=info,spectrum_protocol=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.server_config()?;

    let server = SpectrumServer::bind(config.clone())
        .await
        .with_context(|| format!("Failed to listen on {}", config.bind_addr))?;
    let port = server.local_addr()?.port();

    println!("Serving on port {}...", port);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to wait for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!("Spectrum server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_port() {
        let cli = Cli::parse_from(["spectrum-server"]);
        let config = cli.server_config().unwrap();
        assert_eq!(config.bind_addr.port(), 2438);
    }

    #[test]
    fn test_port_flag() {
        let cli = Cli::parse_from(["spectrum-server", "--port", "9000"]);
        assert_eq!(cli.server_config().unwrap().bind_addr.port(), 9000);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["spectrum-server", "--config", "/nonexistent/spectrum.json"]);
        assert!(cli.server_config().is_err());
    }
}
