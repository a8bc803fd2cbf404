//! # Bus Runtime
//!
//! Read, send and complete operations over the queues and topic subscriptions
//! of a message bus.
//!
//! This library provides:
//! - Validated identifiers for queues, topics, subscriptions and messages
//! - Lazy, page-at-a-time peeking over a queue or subscription
//! - Removal of a single message by id through a peek-lock receive
//! - A provider seam for broker bindings, with an in-memory broker
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all bus operations
//! - [`message`] - Identifiers, scopes and message structures
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Client traits and implementations
//! - [`providers`] - Concrete broker providers

pub mod client;
pub mod error;
pub mod message;
mod paging;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{
    BusClient, BusClientExt, BusProvider, MessageReceiver, MessageSender, MessageStream,
    StandardBusClient,
};
pub use error::{BrokerError, ConfigurationError, FailureReason, FormatError, QueueError};
pub use message::{
    BrokerMessage, LockToken, LockedMessage, MessageId, OutgoingMessage, QueueMessage,
    QueueOrTopicName, Scope, SubscriptionName, Timestamp,
};
pub use provider::{
    ClientConfig, EntityConfig, InMemoryConfig, ProviderConfig, ProviderType, ReceiveMode,
};
pub use providers::InMemoryProvider;
