//! In-memory broker provider for development and testing.
//!
//! Entities are declared up front from [`InMemoryConfig`]. Each queue, and
//! each subscription of a topic, is an ordered log keyed by sequence number.
//! Sending to a topic copies the message into every subscription.
//!
//! Receivers support both non-destructive peeks and peek-lock receives with
//! lock expiry, complete and abandon, which is everything the gateway needs.

use crate::client::{BusProvider, MessageReceiver, MessageSender};
use crate::error::{BrokerError, FailureReason};
use crate::message::{
    BrokerMessage, LockToken, LockedMessage, OutgoingMessage, QueueOrTopicName, Scope,
    SubscriptionName, Timestamp,
};
use crate::provider::{EntityConfig, InMemoryConfig, ProviderType, ReceiveMode};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

struct BrokerState {
    entities: HashMap<QueueOrTopicName, Entity>,
    closed: bool,
}

enum Entity {
    Queue(MessageLog),
    Topic(HashMap<SubscriptionName, MessageLog>),
}

/// Messages of one queue or subscription, in sequence order
struct MessageLog {
    next_sequence_number: i64,
    messages: BTreeMap<i64, StoredMessage>,
}

impl MessageLog {
    fn new() -> Self {
        Self {
            next_sequence_number: 1,
            messages: BTreeMap::new(),
        }
    }

    fn append(&mut self, message_id: &str, message: &OutgoingMessage) {
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number += 1;

        self.messages.insert(
            sequence_number,
            StoredMessage {
                message: BrokerMessage {
                    message_id: message_id.to_string(),
                    content_type: Some(message.content_type.clone()),
                    subject: message.subject.clone(),
                    body: message.body.clone(),
                    sequence_number,
                    enqueued_at: Timestamp::now(),
                    delivery_count: 0,
                },
                lock: None,
            },
        );
    }
}

struct StoredMessage {
    message: BrokerMessage,
    lock: Option<MessageLock>,
}

impl StoredMessage {
    fn is_locked(&self) -> bool {
        self.lock.as_ref().is_some_and(|lock| !lock.locked_until.has_passed())
    }

    fn is_locked_by(&self, token: &LockToken) -> bool {
        self.lock
            .as_ref()
            .is_some_and(|lock| lock.token == *token && !lock.locked_until.has_passed())
    }
}

struct MessageLock {
    token: LockToken,
    receiver_id: u64,
    locked_until: Timestamp,
}

impl BrokerState {
    fn from_config(config: &InMemoryConfig) -> Self {
        let entities = config
            .entities
            .iter()
            .map(|entity| match entity {
                EntityConfig::Queue { name } => (name.clone(), Entity::Queue(MessageLog::new())),
                EntityConfig::Topic {
                    name,
                    subscriptions,
                } => (
                    name.clone(),
                    Entity::Topic(
                        subscriptions
                            .iter()
                            .map(|subscription| (subscription.clone(), MessageLog::new()))
                            .collect(),
                    ),
                ),
            })
            .collect();

        Self {
            entities,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::new(
                FailureReason::Disposed,
                "The broker connection has been closed",
            ));
        }
        Ok(())
    }

    fn log(&self, scope: &Scope) -> Result<&MessageLog, BrokerError> {
        match (scope, self.entities.get(scope.entity_name())) {
            (Scope::Queue(_), Some(Entity::Queue(log))) => Ok(log),
            (Scope::Subscription { subscription, .. }, Some(Entity::Topic(subscriptions))) => {
                subscriptions
                    .get(subscription)
                    .ok_or_else(|| BrokerError::entity_not_found(scope))
            }
            _ => Err(BrokerError::entity_not_found(scope)),
        }
    }

    fn log_mut(&mut self, scope: &Scope) -> Result<&mut MessageLog, BrokerError> {
        match (scope, self.entities.get_mut(scope.entity_name())) {
            (Scope::Queue(_), Some(Entity::Queue(log))) => Ok(log),
            (Scope::Subscription { subscription, .. }, Some(Entity::Topic(subscriptions))) => {
                subscriptions
                    .get_mut(subscription)
                    .ok_or_else(|| BrokerError::entity_not_found(scope))
            }
            _ => Err(BrokerError::entity_not_found(scope)),
        }
    }
}

/// State shared by the provider and every link opened on it
struct Broker {
    state: RwLock<BrokerState>,
    arrivals: Notify,
    open_links: AtomicUsize,
    next_receiver_id: AtomicU64,
    lock_duration: Duration,
}

impl Broker {
    fn read(&self) -> Result<RwLockReadGuard<'_, BrokerState>, BrokerError> {
        self.state
            .read()
            .map_err(|_| BrokerError::new(FailureReason::Other, "broker state lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BrokerState>, BrokerError> {
        self.state
            .write()
            .map_err(|_| BrokerError::new(FailureReason::Other, "broker state lock poisoned"))
    }

    fn enqueue(
        &self,
        entity: &QueueOrTopicName,
        message: &OutgoingMessage,
    ) -> Result<String, BrokerError> {
        let message_id = uuid::Uuid::new_v4().to_string();

        {
            let mut state = self.write()?;
            state.ensure_open()?;
            match state.entities.get_mut(entity) {
                Some(Entity::Queue(log)) => log.append(&message_id, message),
                Some(Entity::Topic(subscriptions)) => {
                    for log in subscriptions.values_mut() {
                        log.append(&message_id, message);
                    }
                }
                None => return Err(BrokerError::entity_not_found(entity)),
            }
        }

        self.arrivals.notify_waiters();
        Ok(message_id)
    }

    fn peek(
        &self,
        scope: &Scope,
        max_messages: u32,
        from_sequence_number: Option<i64>,
    ) -> Result<Vec<BrokerMessage>, BrokerError> {
        let state = self.read()?;
        state.ensure_open()?;
        let log = state.log(scope)?;

        let start = from_sequence_number.unwrap_or(i64::MIN);
        Ok(log
            .messages
            .range(start..)
            .take(max_messages as usize)
            .map(|(_, stored)| stored.message.clone())
            .collect())
    }

    /// Lock the lowest unlocked message with a sequence number above `after`.
    fn lock_next(
        &self,
        scope: &Scope,
        receiver_id: u64,
        after: i64,
    ) -> Result<Option<LockedMessage>, BrokerError> {
        let mut state = self.write()?;
        state.ensure_open()?;
        let log = state.log_mut(scope)?;

        let start = after.saturating_add(1);
        let Some(stored) = log
            .messages
            .range_mut(start..)
            .map(|(_, stored)| stored)
            .find(|stored| !stored.is_locked())
        else {
            return Ok(None);
        };

        let lock_token = LockToken::new();
        let locked_until = Timestamp::after(self.lock_duration);
        stored.message.delivery_count += 1;
        stored.lock = Some(MessageLock {
            token: lock_token,
            receiver_id,
            locked_until,
        });

        Ok(Some(LockedMessage {
            message: stored.message.clone(),
            lock_token,
            locked_until,
        }))
    }

    fn complete(&self, scope: &Scope, locked: &LockedMessage) -> Result<(), BrokerError> {
        let mut state = self.write()?;
        state.ensure_open()?;
        let log = state.log_mut(scope)?;

        let sequence_number = locked.message.sequence_number;
        let held = log
            .messages
            .get(&sequence_number)
            .is_some_and(|stored| stored.is_locked_by(&locked.lock_token));
        if !held {
            return Err(lock_lost(locked));
        }

        log.messages.remove(&sequence_number);
        Ok(())
    }

    fn abandon(&self, scope: &Scope, locked: &LockedMessage) -> Result<(), BrokerError> {
        {
            let mut state = self.write()?;
            state.ensure_open()?;
            let log = state.log_mut(scope)?;

            match log.messages.get_mut(&locked.message.sequence_number) {
                Some(stored) if stored.is_locked_by(&locked.lock_token) => stored.lock = None,
                _ => return Err(lock_lost(locked)),
            }
        }

        self.arrivals.notify_waiters();
        Ok(())
    }

    /// Drop every lock still held by a receiver.
    fn release_locks(&self, scope: &Scope, receiver_id: u64) {
        match self.try_release_locks(scope, receiver_id) {
            Ok(0) => {}
            Ok(released) => {
                debug!(scope = %scope, released, "Released locks of closed receiver");
                self.arrivals.notify_waiters();
            }
            Err(e) => warn!(scope = %scope, error = %e, "Failed to release receiver locks"),
        }
    }

    fn try_release_locks(&self, scope: &Scope, receiver_id: u64) -> Result<usize, BrokerError> {
        let mut state = self.write()?;
        let log = state.log_mut(scope)?;

        let mut released = 0;
        for stored in log.messages.values_mut() {
            if stored
                .lock
                .as_ref()
                .is_some_and(|lock| lock.receiver_id == receiver_id)
            {
                stored.lock = None;
                released += 1;
            }
        }
        Ok(released)
    }
}

fn lock_lost(locked: &LockedMessage) -> BrokerError {
    BrokerError::new(
        FailureReason::MessageLockLost,
        format!(
            "The lock on message {} has expired or is no longer held",
            locked.message.message_id
        ),
    )
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory broker provider.
///
/// Clones share the same broker, so a test can keep a handle while a client
/// owns another.
#[derive(Clone)]
pub struct InMemoryProvider {
    broker: Arc<Broker>,
}

impl InMemoryProvider {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            broker: Arc::new(Broker {
                state: RwLock::new(BrokerState::from_config(&config)),
                arrivals: Notify::new(),
                open_links: AtomicUsize::new(0),
                next_receiver_id: AtomicU64::new(1),
                lock_duration: config.lock_duration(),
            }),
        }
    }

    /// Number of senders and receivers currently open.
    pub fn open_links(&self) -> usize {
        self.broker.open_links.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.broker.read().map(|state| state.closed).unwrap_or(true)
    }

    /// Number of messages currently held by a queue or subscription.
    pub fn message_count(&self, scope: &Scope) -> Result<usize, BrokerError> {
        let state = self.broker.read()?;
        Ok(state.log(scope)?.messages.len())
    }

    /// Enqueue directly, bypassing link creation. Returns the assigned id.
    pub fn enqueue(
        &self,
        entity: &QueueOrTopicName,
        message: OutgoingMessage,
    ) -> Result<String, BrokerError> {
        self.broker.enqueue(entity, &message)
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl BusProvider for InMemoryProvider {
    async fn create_sender(
        &self,
        entity: &QueueOrTopicName,
    ) -> Result<Box<dyn MessageSender>, BrokerError> {
        {
            let state = self.broker.read()?;
            state.ensure_open()?;
            if !state.entities.contains_key(entity) {
                return Err(BrokerError::entity_not_found(entity));
            }
        }

        self.broker.open_links.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySender {
            broker: Arc::clone(&self.broker),
            entity: entity.clone(),
        }))
    }

    async fn create_receiver(
        &self,
        scope: &Scope,
        mode: ReceiveMode,
    ) -> Result<Box<dyn MessageReceiver>, BrokerError> {
        {
            let state = self.broker.read()?;
            state.ensure_open()?;
            state.log(scope)?;
        }

        let receiver_id = self.broker.next_receiver_id.fetch_add(1, Ordering::SeqCst);
        self.broker.open_links.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryReceiver {
            broker: Arc::clone(&self.broker),
            scope: scope.clone(),
            mode,
            receiver_id,
            delivered_up_to: AtomicI64::new(0),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.write()?.closed = true;
        self.broker.arrivals.notify_waiters();
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

// ============================================================================
// Links
// ============================================================================

struct InMemorySender {
    broker: Arc<Broker>,
    entity: QueueOrTopicName,
}

#[async_trait]
impl MessageSender for InMemorySender {
    async fn send_message(&self, message: OutgoingMessage) -> Result<(), BrokerError> {
        let message_id = self.broker.enqueue(&self.entity, &message)?;
        debug!(entity = %self.entity, message_id = %message_id, "Enqueued message");
        Ok(())
    }
}

impl Drop for InMemorySender {
    fn drop(&mut self) {
        self.broker.open_links.fetch_sub(1, Ordering::SeqCst);
    }
}

struct InMemoryReceiver {
    broker: Arc<Broker>,
    scope: Scope,
    mode: ReceiveMode,
    receiver_id: u64,
    /// Highest sequence number handed out by this receiver
    delivered_up_to: AtomicI64,
}

impl InMemoryReceiver {
    fn ensure_peek_lock(&self) -> Result<(), BrokerError> {
        match self.mode {
            ReceiveMode::PeekLock => Ok(()),
            ReceiveMode::Peek => Err(BrokerError::new(
                FailureReason::Other,
                "A receiver opened in peek mode cannot lock messages",
            )),
        }
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn peek_messages(
        &self,
        max_messages: u32,
        from_sequence_number: Option<i64>,
    ) -> Result<Vec<BrokerMessage>, BrokerError> {
        self.broker
            .peek(&self.scope, max_messages, from_sequence_number)
    }

    async fn receive_message(
        &self,
        max_wait: Duration,
    ) -> Result<Option<LockedMessage>, BrokerError> {
        self.ensure_peek_lock()?;
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            // Register interest before looking, so an arrival in between is not missed.
            let arrival = self.broker.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            let after = self.delivered_up_to.load(Ordering::SeqCst);
            if let Some(locked) = self.broker.lock_next(&self.scope, self.receiver_id, after)? {
                self.delivered_up_to
                    .fetch_max(locked.message.sequence_number, Ordering::SeqCst);
                return Ok(Some(locked));
            }

            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn complete_message(&self, message: &LockedMessage) -> Result<(), BrokerError> {
        self.ensure_peek_lock()?;
        self.broker.complete(&self.scope, message)
    }

    async fn abandon_message(&self, message: &LockedMessage) -> Result<(), BrokerError> {
        self.ensure_peek_lock()?;
        self.broker.abandon(&self.scope, message)
    }
}

impl Drop for InMemoryReceiver {
    fn drop(&mut self) {
        if self.mode == ReceiveMode::PeekLock {
            self.broker.release_locks(&self.scope, self.receiver_id);
        }
        self.broker.open_links.fetch_sub(1, Ordering::SeqCst);
    }
}
