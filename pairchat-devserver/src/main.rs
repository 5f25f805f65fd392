//! `PairChat` development server -- in-memory chat backend.
//!
//! An axum server speaking the chat channel protocol at `/ws` and serving
//! the request API under `/api/chat`. Users come from the config file or
//! from `--user` arguments.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin pairchat-devserver -- --bind 127.0.0.1:8080 \
//!     --user u-1:ayse:secret-a --user u-2:can:secret-b
//! ```

use std::sync::Arc;

use clap::Parser;
use pairchat_devserver::config::{DevCliArgs, DevConfig};
use pairchat_devserver::server;

#[tokio::main]
async fn main() {
    let cli = DevCliArgs::parse();

    let config = match DevConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .init();

    if config.users.is_empty() {
        tracing::warn!("no users configured; every request will be rejected");
    }
    tracing::info!(addr = %config.bind_addr, users = config.users.len(), "starting pairchat dev server");

    let state = Arc::new(config.seeded_state().await);

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "dev server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "dev server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start dev server");
            std::process::exit(1);
        }
    }
}
