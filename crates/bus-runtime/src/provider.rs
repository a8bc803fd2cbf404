//! Provider types and configuration.

use crate::error::ConfigurationError;
use crate::message::{QueueOrTopicName, SubscriptionName};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Enumeration of built-in broker providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    InMemory,
    /// A binding supplied by the embedding application
    External,
}

/// How a receiver takes messages off a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Non-destructive reads only
    Peek,
    /// Messages are locked on receive and must be completed or abandoned
    PeekLock,
}

/// Configuration for the bus client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Messages requested per peek page
    pub page_size: u32,

    /// How long a single receive waits for a message while completing
    pub receive_timeout_ms: u64,

    pub provider: ProviderConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            receive_timeout_ms: 3000,
            provider: ProviderConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.page_size == 0 {
            return Err(ConfigurationError::Invalid {
                message: "page_size must be greater than zero".to_string(),
            });
        }

        if self.receive_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "receive_timeout_ms must be greater than zero".to_string(),
            });
        }

        self.provider.validate()
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    InMemory(InMemoryConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::InMemory(InMemoryConfig::default())
    }
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::InMemory(_) => ProviderType::InMemory,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            Self::InMemory(config) => config.validate(),
        }
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Queues and topics that exist on the broker
    pub entities: Vec<EntityConfig>,

    /// How long a peek-lock is held before the message becomes receivable again
    pub lock_duration_seconds: u64,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            lock_duration_seconds: 60,
        }
    }
}

impl InMemoryConfig {
    pub fn with_queue(mut self, name: QueueOrTopicName) -> Self {
        self.entities.push(EntityConfig::Queue { name });
        self
    }

    pub fn with_topic(
        mut self,
        name: QueueOrTopicName,
        subscriptions: Vec<SubscriptionName>,
    ) -> Self {
        self.entities.push(EntityConfig::Topic {
            name,
            subscriptions,
        });
        self
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.lock_duration_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "lock_duration_seconds must be greater than zero".to_string(),
            });
        }

        // Queues and topics share one namespace on the broker.
        let mut names = HashSet::new();
        for entity in &self.entities {
            if !names.insert(entity.name()) {
                return Err(ConfigurationError::Invalid {
                    message: format!("entity '{}' is declared more than once", entity.name()),
                });
            }

            if let EntityConfig::Topic {
                name,
                subscriptions,
            } = entity
            {
                let mut seen = HashSet::new();
                for subscription in subscriptions {
                    if !seen.insert(subscription) {
                        return Err(ConfigurationError::Invalid {
                            message: format!(
                                "subscription '{}' is declared more than once on topic '{}'",
                                subscription, name
                            ),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// A queue or topic declared on the in-memory broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityConfig {
    Queue {
        name: QueueOrTopicName,
    },
    Topic {
        name: QueueOrTopicName,
        #[serde(default)]
        subscriptions: Vec<SubscriptionName>,
    },
}

impl EntityConfig {
    pub fn name(&self) -> &QueueOrTopicName {
        match self {
            Self::Queue { name } | Self::Topic { name, .. } => name,
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
