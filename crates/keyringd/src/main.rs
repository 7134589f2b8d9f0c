//! keyringd - keyring relay daemon
//!
//! Seeds an in-memory keyring from the WAN tier, relays key lifecycle events
//! from WAN to LAN, and answers LAN keyring retrieval queries.

use clap::Parser;
use keyringd::config::Config;
use keyringd::server::Server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();

    // Initialize logging
    let level = if config.verbose { "keyringd=debug" } else { "keyringd=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if config.log_format == "json" {
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

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "keyringd v{} - relaying '{}' keys from {} to {}",
        env!("CARGO_PKG_VERSION"),
        config.prefix,
        config.wan_addr,
        config.lan_addr
    );

    let server = match Server::connect(&config).await {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to initialize server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Install signal handler
    {
        let server = server.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            server.shutdown();
        });
    }

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
