//! ApiRelay - Main entry point
//!
//! A small HTTP relay for remote JSON config feeds

use anyhow::Result;
use apirelay::{RelayConfig, RelayServer, SourceRegistry};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// ApiRelay - proxy pass-through and JSON config feed relay
#[derive(Parser, Debug)]
#[command(name = "apirelay")]
#[command(author = "ApiRelay Contributors")]
#[command(version = "1.0.0")]
#[command(about = "A small HTTP relay for remote JSON config feeds")]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting ApiRelay v1.0.0");
    info!("Port: {}", args.port);

    let config = RelayConfig { port: args.port };
    let server = Arc::new(RelayServer::new(config, SourceRegistry::default())?);

    info!("ApiRelay started successfully");

    server.run().await?;

    Ok(())
}
