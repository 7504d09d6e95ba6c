//! mqtt-stub: a minimal MQTT responder for device bring-up
//!
//! Accepts TCP connections and answers just enough MQTT for an embedded
//! client to believe it is talking to a broker:
//! - CONNECT is answered with CONNACK (accepted)
//! - PUBLISH is answered with PUBACK
//! - Everything else is logged and ignored
//!
//! Messages are never routed between clients.
//!
//! Features:
//! - One task per connection, tracked in a shared registry
//! - Graceful stop on Ctrl-C that closes every open connection
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod protocols;
mod runtime;
mod server;

use config::Config;
use server::Server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        max_connections = ?config.max_connections,
        "Starting mqtt-stub server"
    );

    let server = Server::new(config);

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt signal, shutting down");
                signal_server.stop();
            }
            Err(e) => warn!(error = %e, "Failed to listen for interrupt signal"),
        }
    });

    server.start().await?;
    Ok(())
}
