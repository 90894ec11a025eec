//! Agent Run Relay server
//!
//! Entry point: load configuration, set up logging, serve.

use std::sync::Arc;

use agent_run_relay::{config::AppConfig, server, telemetry};
use dotenvy::dotenv;
use mimalloc::MiMalloc;
use tracing::error;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    // Load .env (if present)
    let _ = dotenv();

    telemetry::init();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        std::process::exit(1);
    }

    if let Err(e) = server::start_server(Arc::new(config)).await {
        error!(error = %e, "Server terminated");
        std::process::exit(1);
    }
}
