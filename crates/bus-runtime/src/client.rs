//! Client traits and implementations for bus operations.

use crate::error::{BrokerError, FailureReason, QueueError};
use crate::message::{
    LockedMessage, MessageId, OutgoingMessage, QueueMessage, QueueOrTopicName, Scope,
};
use crate::paging::PeekPager;
use crate::provider::{ClientConfig, ProviderConfig, ProviderType, ReceiveMode};
use crate::providers::InMemoryProvider;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Lazy sequence of peeked messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<QueueMessage, QueueError>> + Send>>;

// ============================================================================
// Gateway interface
// ============================================================================

/// Peek, send and complete operations over queues and topic subscriptions.
///
/// Every operation observes `cancel`: once it fires, outstanding backend calls
/// are abandoned and the operation fails with [`QueueError::Cancelled`].
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Enqueue one message on a queue or topic.
    async fn send_message(
        &self,
        entity: &QueueOrTopicName,
        message: OutgoingMessage,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError>;

    /// Walk every message currently in `scope`, one page at a time.
    ///
    /// Nothing is fetched until the stream is polled, and the next page is
    /// only requested once the previous one has been consumed. Messages
    /// enqueued while the walk is in progress may or may not be seen.
    fn peek_all_messages(&self, scope: Scope, cancel: CancellationToken) -> MessageStream;

    /// Find a single message by id without removing it.
    async fn peek_message(
        &self,
        scope: &Scope,
        message_id: &MessageId,
        cancel: &CancellationToken,
    ) -> Result<QueueMessage, QueueError>;

    /// Remove a single message by id.
    async fn complete_message(
        &self,
        scope: &Scope,
        message_id: &MessageId,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError>;
}

/// Convenience operations available on every [`BusClient`].
#[async_trait]
pub trait BusClientExt: BusClient {
    /// Serialize `body` as JSON and send it with content type `application/json`.
    async fn send_json_message<T>(
        &self,
        entity: &QueueOrTopicName,
        body: &T,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError>
    where
        T: Serialize + Sync,
    {
        let json = serde_json::to_vec(body)?;
        self.send_message(entity, OutgoingMessage::new("application/json", json), cancel)
            .await
    }
}

impl<C: BusClient + ?Sized> BusClientExt for C {}

// ============================================================================
// Provider interface
// ============================================================================

/// Interface implemented by a broker binding.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BusProvider: Send + Sync {
    /// Open a sender link to a queue or topic
    async fn create_sender(
        &self,
        entity: &QueueOrTopicName,
    ) -> Result<Box<dyn MessageSender>, BrokerError>;

    /// Open a receiver link on a queue or subscription
    async fn create_receiver(
        &self,
        scope: &Scope,
        mode: ReceiveMode,
    ) -> Result<Box<dyn MessageReceiver>, BrokerError>;

    /// Close the connection and every link still open on it
    async fn close(&self) -> Result<(), BrokerError>;

    fn provider_type(&self) -> ProviderType;
}

/// A sender link. The link is released when the value is dropped.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, message: OutgoingMessage) -> Result<(), BrokerError>;
}

/// A receiver link. The link, and any lock it still holds, is released when
/// the value is dropped.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Read up to `max_messages` without locking them, starting at
    /// `from_sequence_number` when given.
    ///
    /// While more messages exist past the returned ones, the page must hold
    /// exactly `max_messages`. A shorter page is taken to mean the scope is
    /// exhausted and ends the walk.
    async fn peek_messages(
        &self,
        max_messages: u32,
        from_sequence_number: Option<i64>,
    ) -> Result<Vec<crate::message::BrokerMessage>, BrokerError>;

    /// Lock and return the next message, or `None` if nothing arrives within
    /// `max_wait`
    async fn receive_message(
        &self,
        max_wait: Duration,
    ) -> Result<Option<LockedMessage>, BrokerError>;

    /// Remove a locked message from its scope
    async fn complete_message(&self, message: &LockedMessage) -> Result<(), BrokerError>;

    /// Release a locked message back to its scope
    async fn abandon_message(&self, message: &LockedMessage) -> Result<(), BrokerError>;
}

/// Run `future` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T, QueueError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QueueError::Cancelled),
        value = future => Ok(value),
    }
}

// ============================================================================
// StandardBusClient
// ============================================================================

struct ClientState {
    config: ClientConfig,
    provider: OnceCell<Arc<dyn BusProvider>>,
    disposed: AtomicBool,
}

/// Standard [`BusClient`] over a [`BusProvider`].
///
/// The provider connection is created on first use and shared by every clone
/// of the client; each operation opens its own sender or receiver and drops
/// it before returning.
///
/// # Example
///
/// ```
/// use bus_runtime::{
///     BusClient, ClientConfig, InMemoryConfig, InMemoryProvider, OutgoingMessage,
///     QueueOrTopicName, Scope, StandardBusClient,
/// };
/// use futures::TryStreamExt;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let orders = QueueOrTopicName::new("orders").unwrap();
/// let provider = InMemoryProvider::new(InMemoryConfig::default().with_queue(orders.clone()));
/// let client = StandardBusClient::with_provider(Arc::new(provider), ClientConfig::default());
/// let cancel = CancellationToken::new();
///
/// client
///     .send_message(&orders, OutgoingMessage::new("text/plain", "hello"), &cancel)
///     .await
///     .unwrap();
///
/// let messages: Vec<_> = client
///     .peek_all_messages(Scope::queue(orders), cancel)
///     .try_collect()
///     .await
///     .unwrap();
/// assert_eq!(messages.len(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct StandardBusClient {
    state: Arc<ClientState>,
}

impl StandardBusClient {
    /// Create a client whose provider is built from `config.provider` on
    /// first use.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            state: Arc::new(ClientState {
                config,
                provider: OnceCell::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a client over an already constructed provider.
    pub fn with_provider(provider: Arc<dyn BusProvider>, config: ClientConfig) -> Self {
        Self {
            state: Arc::new(ClientState {
                config,
                provider: OnceCell::new_with(Some(provider)),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.state.config
    }

    pub fn is_connected(&self) -> bool {
        self.state.provider.initialized() && !self.is_disposed()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }

    /// Close the provider connection. Later calls are no-ops and later
    /// operations fail with [`QueueError::ClientDisposed`].
    pub async fn dispose(&self) -> Result<(), QueueError> {
        if self.state.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match self.state.provider.get() {
            Some(provider) => {
                info!(provider = ?provider.provider_type(), "Closing bus connection");
                provider.close().await.map_err(|e| QueueError::Backend {
                    reason: e.reason,
                    message: e.message,
                })
            }
            None => Ok(()),
        }
    }

    async fn provider(&self) -> Result<Arc<dyn BusProvider>, QueueError> {
        if self.is_disposed() {
            return Err(QueueError::ClientDisposed);
        }

        let provider = self
            .state
            .provider
            .get_or_try_init(|| async { create_provider(&self.state.config.provider) })
            .await?;

        Ok(Arc::clone(provider))
    }

    async fn open_pager(
        &self,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> Result<PeekPager, QueueError> {
        let provider = self.provider().await?;
        let receiver = cancellable(cancel, provider.create_receiver(scope, ReceiveMode::Peek))
            .await?
            .map_err(|e| e.into_queue_error(scope))?;

        Ok(PeekPager::new(
            receiver,
            scope.clone(),
            self.state.config.page_size,
        ))
    }
}

fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn BusProvider>, QueueError> {
    config.validate()?;

    let provider: Arc<dyn BusProvider> = match config {
        ProviderConfig::InMemory(in_memory_config) => {
            Arc::new(InMemoryProvider::new(in_memory_config.clone()))
        }
    };

    info!(provider = ?provider.provider_type(), "Connected to bus provider");
    Ok(provider)
}

#[async_trait]
impl BusClient for StandardBusClient {
    #[instrument(skip(self, message, cancel), fields(entity = %entity))]
    async fn send_message(
        &self,
        entity: &QueueOrTopicName,
        message: OutgoingMessage,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        if message.content_type.trim().is_empty() {
            return Err(QueueError::InvalidRequest {
                message: "a content type is required".to_string(),
            });
        }

        let scope = Scope::queue(entity.clone());
        let provider = self.provider().await?;
        let sender = cancellable(cancel, provider.create_sender(entity))
            .await?
            .map_err(|e| e.into_queue_error(&scope))?;

        let size = message.body.len();
        cancellable(cancel, sender.send_message(message))
            .await?
            .map_err(|e| e.into_queue_error(&scope))?;

        debug!(size_bytes = size, "Message sent");
        Ok(())
    }

    fn peek_all_messages(&self, scope: Scope, cancel: CancellationToken) -> MessageStream {
        let client = self.clone();

        let stream = async_stream::try_stream! {
            let mut pager = client.open_pager(&scope, &cancel).await?;
            while let Some(page) = pager.next_page(&cancel).await? {
                for message in page {
                    yield message;
                }
            }
            debug!(scope = %scope, pages = pager.pages_fetched(), "Peek traversal finished");
        };

        Box::pin(stream)
    }

    async fn peek_message(
        &self,
        scope: &Scope,
        message_id: &MessageId,
        cancel: &CancellationToken,
    ) -> Result<QueueMessage, QueueError> {
        let mut messages = self.peek_all_messages(scope.clone(), cancel.clone());
        while let Some(message) = messages.next().await {
            let message = message?;
            if message.id() == message_id {
                return Ok(message);
            }
        }

        Err(QueueError::message_not_found(scope, message_id))
    }

    #[instrument(skip(self, cancel), fields(scope = %scope, message_id = %message_id))]
    async fn complete_message(
        &self,
        scope: &Scope,
        message_id: &MessageId,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        // Fail fast before opening a locking receiver for an id that is not there.
        self.peek_message(scope, message_id, cancel).await?;

        let provider = self.provider().await?;
        let receiver = cancellable(cancel, provider.create_receiver(scope, ReceiveMode::PeekLock))
            .await?
            .map_err(|e| e.into_queue_error(scope))?;

        let max_wait = self.state.config.receive_timeout();
        let mut seen = HashSet::new();

        loop {
            let received = cancellable(cancel, receiver.receive_message(max_wait))
                .await?
                .map_err(|e| e.into_queue_error(scope))?;

            let Some(locked) = received else {
                break;
            };

            let first_sighting = seen.insert(locked.message.sequence_number);
            if first_sighting && locked.message.message_id == message_id.as_str() {
                if locked.locked_until.has_passed() {
                    warn!(
                        locked_until = %locked.locked_until,
                        "Lock expired before the message could be completed"
                    );
                    return Err(BrokerError::new(
                        FailureReason::MessageLockLost,
                        format!("lock on '{}' expired before completion", message_id),
                    )
                    .into_queue_error(scope));
                }

                cancellable(cancel, receiver.complete_message(&locked))
                    .await?
                    .map_err(|e| e.into_queue_error(scope))?;
                info!(
                    delivery_count = locked.message.delivery_count,
                    enqueued_at = %locked.message.enqueued_at,
                    "Message completed"
                );
                return Ok(());
            }

            debug!(
                sequence_number = locked.message.sequence_number,
                delivery_count = locked.message.delivery_count,
                "Releasing message that does not match"
            );
            cancellable(cancel, receiver.abandon_message(&locked))
                .await?
                .map_err(|e| e.into_queue_error(scope))?;

            if !first_sighting {
                // The broker is handing back messages already visited.
                break;
            }
        }

        warn!("Message disappeared before it could be received");
        Err(QueueError::message_not_found(scope, message_id))
    }
}
