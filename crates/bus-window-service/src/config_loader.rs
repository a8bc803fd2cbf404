//! Layered loading of the service configuration.
//!
//! Sources are applied in order, later ones overriding earlier ones:
//!
//! 1. `/etc/bus-window/service.yaml`
//! 2. `./config/service.yaml`
//! 3. the file named by `BW_CONFIG_FILE`, which must exist when set
//! 4. environment variables prefixed `BW__`, e.g. `BW__SERVER__PORT=9090`
//!    sets `server.port`
//!
//! Every field has a default, so no files and no variables still yields a
//! usable configuration. A malformed file or a value of the wrong type is an
//! error.

use bus_window_api::{ConfigError, ServiceConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

#[cfg(test)]
#[path = "config_loader_tests.rs"]
mod tests;

const SYSTEM_CONFIG_FILE: &str = "/etc/bus-window/service";
const LOCAL_CONFIG_FILE: &str = "config/service";
const CONFIG_FILE_VARIABLE: &str = "BW_CONFIG_FILE";
const ENV_PREFIX: &str = "BW";
const ENV_SEPARATOR: &str = "__";

/// Errors raised while loading the configuration
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read configuration sources: {0}")]
    Sources(#[source] config::ConfigError),

    #[error("Could not deserialize service configuration: {0}")]
    Deserialize(#[source] config::ConfigError),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Collects the configuration sources and builds a validated [`ServiceConfig`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    optional_files: Vec<PathBuf>,
    explicit_file: Option<PathBuf>,
    environment: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// The standard file locations plus the process environment.
    pub fn new() -> Self {
        Self {
            optional_files: vec![
                PathBuf::from(SYSTEM_CONFIG_FILE),
                PathBuf::from(LOCAL_CONFIG_FILE),
            ],
            explicit_file: None,
            environment: None,
        }
    }

    /// [`ConfigLoader::new`] with the explicit file taken from `BW_CONFIG_FILE`.
    pub fn from_environment() -> Self {
        let loader = Self::new();
        match std::env::var(CONFIG_FILE_VARIABLE) {
            Ok(path) if !path.trim().is_empty() => loader.with_explicit_file(path),
            _ => loader,
        }
    }

    /// Replace the optional file locations.
    pub fn with_optional_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.optional_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// A file that must exist and is applied after the optional ones.
    pub fn with_explicit_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_file = Some(path.into());
        self
    }

    /// Read variables from `variables` instead of the process environment.
    pub fn with_environment(mut self, variables: HashMap<String, String>) -> Self {
        self.environment = Some(variables);
        self
    }

    pub fn load(&self) -> Result<ServiceConfig, LoadError> {
        let mut builder = config::Config::builder();

        for file in &self.optional_files {
            builder = builder.add_source(
                config::File::from(file.as_path())
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );
        }

        if let Some(path) = &self.explicit_file {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .source(self.environment.clone()),
            )
            .build()
            .map_err(LoadError::Sources)?;

        let service_config: ServiceConfig = settings
            .try_deserialize()
            .map_err(LoadError::Deserialize)?;

        service_config.validate()?;
        Ok(service_config)
    }
}
