//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use bus_runtime::ClientConfig;
use serde::{Deserialize, Serialize};
use url::Url;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Bus client and broker settings
    pub backend: ClientConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Check the configuration for values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.backend.validate()?;
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Buffer size for request bodies sent without a Content-Length
    pub default_body_buffer_size: usize,

    /// Maximum request size in bytes
    pub max_body_size: usize,

    /// Enable CORS
    pub enable_cors: bool,

    /// Base URL used for message links instead of the request's Host header
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            default_body_buffer_size: 4096,
            max_body_size: 10 * 1024 * 1024, // 10MB
            enable_cors: true,
            public_base_url: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "server.host".to_string(),
            });
        }

        if self.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must be greater than zero".to_string(),
            });
        }

        if self.default_body_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.default_body_buffer_size must be greater than zero".to_string(),
            });
        }

        if self.default_body_buffer_size > self.max_body_size {
            return Err(ConfigError::Invalid {
                message: format!(
                    "server.default_body_buffer_size ({}) exceeds server.max_body_size ({})",
                    self.default_body_buffer_size, self.max_body_size
                ),
            });
        }

        if let Some(base) = &self.public_base_url {
            let valid = Url::parse(base)
                .map(|url| !url.cannot_be_a_base())
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::Invalid {
                    message: format!("server.public_base_url '{}' is not a base URL", base),
                });
            }
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level, used when `RUST_LOG` is not set
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}
