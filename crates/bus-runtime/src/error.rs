//! Error types for bus operations.

use crate::message::Scope;
use thiserror::Error;

/// Error type for all gateway operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Could not find queue {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Could not find message {queue_name}/{message_id}")]
    MessageNotFound {
        queue_name: String,
        message_id: String,
    },

    #[error("Backend error ({reason}): {message}")]
    Backend {
        reason: FailureReason,
        message: String,
    },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Backend returned an unusable message: {0}")]
    InvalidMessage(#[from] FormatError),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Client has been disposed")]
    ClientDisposed,

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl QueueError {
    /// Build the not-found error for a message in the given scope.
    pub fn message_not_found(scope: &Scope, message_id: impl ToString) -> Self {
        Self::MessageNotFound {
            queue_name: scope.entity_name().to_string(),
            message_id: message_id.to_string(),
        }
    }

    /// True for the domain-expected "does not exist" outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::QueueNotFound { .. } | Self::MessageNotFound { .. }
        )
    }

    /// Check if error is transient. Nothing is retried automatically; callers
    /// decide for themselves.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Backend { reason, .. } => reason.is_transient(),
            Self::QueueNotFound { .. }
            | Self::MessageNotFound { .. }
            | Self::InvalidRequest { .. }
            | Self::InvalidMessage(_)
            | Self::Cancelled
            | Self::ClientDisposed
            | Self::Serialization(_)
            | Self::Configuration(_) => false,
        }
    }
}

/// Returned when a string is not a valid identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("String is not a valid {type_name}.")]
pub struct FormatError {
    type_name: &'static str,
}

impl FormatError {
    pub(crate) fn new(type_name: &'static str) -> Self {
        Self { type_name }
    }

    /// Name of the identifier type that failed to parse.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Reason attached to a failure reported by a broker binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The queue, topic or subscription does not exist
    MessagingEntityNotFound,
    /// The lock on a received message expired or was never held
    MessageLockLost,
    /// Network or transport failure
    ServiceCommunicationProblem,
    /// The broker did not answer in time
    ServiceTimeout,
    /// The connection or link has been closed
    Disposed,
    /// Anything else
    Other,
}

impl FailureReason {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ServiceCommunicationProblem | Self::ServiceTimeout
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MessagingEntityNotFound => "MessagingEntityNotFound",
            Self::MessageLockLost => "MessageLockLost",
            Self::ServiceCommunicationProblem => "ServiceCommunicationProblem",
            Self::ServiceTimeout => "ServiceTimeout",
            Self::Disposed => "Disposed",
            Self::Other => "Other",
        };
        write!(f, "{}", name)
    }
}

/// Failure reported by a [`BusProvider`](crate::client::BusProvider) or one
/// of its links.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {message}")]
pub struct BrokerError {
    pub reason: FailureReason,
    pub message: String,
}

impl BrokerError {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn entity_not_found(entity: impl std::fmt::Display) -> Self {
        Self::new(
            FailureReason::MessagingEntityNotFound,
            format!("The messaging entity '{}' could not be found", entity),
        )
    }

    /// Map a broker failure on `scope` to the gateway's error taxonomy.
    pub fn into_queue_error(self, scope: &Scope) -> QueueError {
        match self.reason {
            FailureReason::MessagingEntityNotFound => QueueError::QueueNotFound {
                queue_name: scope.entity_name().to_string(),
            },
            reason => QueueError::Backend {
                reason,
                message: self.message,
            },
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
