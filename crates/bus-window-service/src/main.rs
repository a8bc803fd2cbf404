//! # Bus Window Service
//!
//! Binary entry point for the Bus Window HTTP service.
//!
//! This executable:
//! - Loads configuration from files and the environment
//! - Initializes logging
//! - Creates the bus client for the configured provider
//! - Starts the HTTP server from bus-window-api
//! - Closes the bus connection once the server has stopped

mod config_loader;

use anyhow::Context;
use bus_runtime::StandardBusClient;
use bus_window_api::{start_server, LoggingConfig, ServiceError};
use config_loader::{ConfigLoader, LoadError};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const EXIT_BIND_FAILED: i32 = 1;
const EXIT_SERVER_FAILED: i32 = 2;
const EXIT_CONFIGURATION: i32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let service_config = match ConfigLoader::from_environment().load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&LoggingConfig::default())?;
            report_load_error(&e);
            std::process::exit(EXIT_CONFIGURATION);
        }
    };

    init_tracing(&service_config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = ?service_config.backend.provider.provider_type(),
        "Starting Bus Window Service"
    );

    let client = StandardBusClient::from_config(service_config.backend.clone());
    let result = start_server(service_config, Arc::new(client.clone())).await;

    if let Err(e) = client.dispose().await {
        warn!(error = %e, "Failed to close bus connection cleanly");
    }

    if let Err(e) = result {
        error!(error = %e, "HTTP server stopped with an error");

        let exit_code = match e {
            ServiceError::BindFailed { .. } => EXIT_BIND_FAILED,
            ServiceError::ServerFailed { .. } => EXIT_SERVER_FAILED,
            ServiceError::Configuration(_) => EXIT_CONFIGURATION,
        };
        std::process::exit(exit_code);
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("Invalid logging level '{}'", logging.level))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    installed.context("Failed to install tracing subscriber")
}

fn report_load_error(error: &LoadError) {
    match error {
        LoadError::Sources(_) | LoadError::Deserialize(_) => {
            error!(error = %error, "Could not load service configuration; aborting");
        }
        LoadError::Invalid(_) => {
            error!(error = %error, "Service configuration is invalid; aborting");
        }
    }
}
