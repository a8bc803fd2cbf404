//! Message types and the validated identifiers that address them.

use crate::error::FormatError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

/// Defines a validated string newtype.
///
/// The value must contain at least one non-whitespace character. It is kept
/// exactly as given; comparison and ordering are ordinal and case-sensitive.
macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap `value`.
            pub fn new(value: impl Into<String>) -> Result<Self, FormatError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(FormatError::new(stringify!($name)));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = FormatError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = FormatError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

identifier! {
    /// Name of a queue or a topic on the bus.
    QueueOrTopicName
}

identifier! {
    /// Name of a subscription on a topic.
    SubscriptionName
}

identifier! {
    /// Identifier of a single message.
    MessageId
}

// ============================================================================
// Scope
// ============================================================================

/// The addressable unit messages are peeked from: a queue, or one
/// subscription of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Queue(QueueOrTopicName),
    Subscription {
        topic: QueueOrTopicName,
        subscription: SubscriptionName,
    },
}

impl Scope {
    pub fn queue(name: QueueOrTopicName) -> Self {
        Self::Queue(name)
    }

    pub fn subscription(topic: QueueOrTopicName, subscription: SubscriptionName) -> Self {
        Self::Subscription {
            topic,
            subscription,
        }
    }

    /// The queue or topic name; this is what error messages refer to.
    pub fn entity_name(&self) -> &QueueOrTopicName {
        match self {
            Self::Queue(name) => name,
            Self::Subscription { topic, .. } => topic,
        }
    }

    pub fn subscription_name(&self) -> Option<&SubscriptionName> {
        match self {
            Self::Queue(_) => None,
            Self::Subscription { subscription, .. } => Some(subscription),
        }
    }

    /// Broker entity path, e.g. `orders` or `events/Subscriptions/audit`.
    pub fn entity_path(&self) -> String {
        match self {
            Self::Queue(name) => name.to_string(),
            Self::Subscription {
                topic,
                subscription,
            } => format!("{}/Subscriptions/{}", topic, subscription),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.entity_path())
    }
}

// ============================================================================
// Timestamp
// ============================================================================

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// The timestamp `duration` from now.
    pub fn after(duration: std::time::Duration) -> Self {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self(expires_at)
    }

    pub fn has_passed(&self) -> bool {
        Utc::now() >= self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent to a queue or topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Bytes,
    pub content_type: String,
    pub subject: Option<String>,
}

impl OutgoingMessage {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// A message as a broker binding reports it, before projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub message_id: String,
    pub content_type: Option<String>,
    pub subject: Option<String>,
    pub body: Bytes,
    pub sequence_number: i64,
    pub enqueued_at: Timestamp,
    pub delivery_count: u32,
}

/// Opaque token proving ownership of a peek-lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(uuid::Uuid);

impl LockToken {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message received under a peek-lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedMessage {
    pub message: BrokerMessage,
    pub lock_token: LockToken,
    pub locked_until: Timestamp,
}

/// Read-only view of a peeked message handed to callers.
///
/// The broker sequence number travels with the message so the pager can
/// resume after it, but it is not part of the public surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    id: MessageId,
    content_type: Option<String>,
    subject: Option<String>,
    body: Bytes,
    sequence_number: i64,
}

impl QueueMessage {
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn sequence_number(&self) -> i64 {
        self.sequence_number
    }
}

impl TryFrom<BrokerMessage> for QueueMessage {
    type Error = FormatError;

    fn try_from(message: BrokerMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            id: MessageId::new(message.message_id)?,
            content_type: message.content_type,
            subject: message.subject,
            body: message.body,
            sequence_number: message.sequence_number,
        })
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
