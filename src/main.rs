use std::sync::Arc;

use tracing::info;

use interverse::state::JsonFileStore;
use interverse::transport::local::LocalTransport;
use interverse::{Config, PatternScamDetector, RelayService, UserId};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    // Initialize logging
    if let Err(e) = interverse::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        interverse::logging::init_console_only(&config.logging.level);
    }

    info!("interverse - federated chat relay");

    // The concrete chat-network transport is provided by the embedding
    // integration; standalone the relay runs against the in-process
    // transport with a file-backed federation state.
    let transport = Arc::new(LocalTransport::new(UserId(1)));
    let store = Arc::new(JsonFileStore::new("data/federation.json"));
    let service = RelayService::new(
        transport,
        store,
        Arc::new(PatternScamDetector::new()),
        &config,
    );

    service.start().await;
    info!("relay running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to wait for shutdown signal: {e}");
    }
    info!("shutting down");
}
