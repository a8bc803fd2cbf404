//! Common test utilities for bus-window-api integration tests
//!
//! This module provides:
//! - A router wired to a seeded in-memory broker
//! - Request builders and response readers

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use bus_runtime::{
    ClientConfig, InMemoryConfig, InMemoryProvider, OutgoingMessage, ProviderConfig,
    QueueOrTopicName, Scope, StandardBusClient, SubscriptionName,
};
use bus_window_api::{create_router, AppState, ServiceConfig};
use bytes::Bytes;
use std::sync::Arc;

pub const HOST: &str = "bus.local";

/// Page size used by the test client, small enough that a handful of
/// messages spans several pages.
pub const PAGE_SIZE: u32 = 3;

pub fn queue_name(name: &str) -> QueueOrTopicName {
    QueueOrTopicName::new(name).unwrap()
}

#[allow(dead_code)]
pub fn queue_scope(name: &str) -> Scope {
    Scope::queue(queue_name(name))
}

#[allow(dead_code)]
pub fn subscription_scope(topic: &str, subscription: &str) -> Scope {
    Scope::subscription(
        queue_name(topic),
        SubscriptionName::new(subscription).unwrap(),
    )
}

/// An in-memory broker with:
/// - queues `orders` and `idle`
/// - topic `events` with subscriptions `audit` and `billing`
pub struct TestBus {
    pub provider: InMemoryProvider,
    pub client: StandardBusClient,
    pub config: ServiceConfig,
}

impl TestBus {
    pub fn new() -> Self {
        let memory = InMemoryConfig::default()
            .with_queue(queue_name("orders"))
            .with_queue(queue_name("idle"))
            .with_topic(
                queue_name("events"),
                vec![
                    SubscriptionName::new("audit").unwrap(),
                    SubscriptionName::new("billing").unwrap(),
                ],
            );

        let backend = ClientConfig {
            page_size: PAGE_SIZE,
            receive_timeout_ms: 200,
            provider: ProviderConfig::InMemory(memory.clone()),
        };

        let mut config = ServiceConfig::default();
        config.backend = backend.clone();
        config.server.default_body_buffer_size = 64;
        config.server.max_body_size = 1024;

        let provider = InMemoryProvider::new(memory);
        let client = StandardBusClient::with_provider(Arc::new(provider.clone()), backend);

        Self {
            provider,
            client,
            config,
        }
    }

    /// A fresh router over this bus.
    pub fn router(&self) -> Router {
        create_router(AppState::new(
            self.config.clone(),
            Arc::new(self.client.clone()),
        ))
    }

    /// Enqueue directly on the broker and return the assigned id.
    #[allow(dead_code)]
    pub fn seed(&self, entity: &str, content_type: &str, body: &str) -> String {
        self.provider
            .enqueue(
                &queue_name(entity),
                OutgoingMessage::new(content_type, body.to_string()),
            )
            .unwrap()
    }

    #[allow(dead_code)]
    pub fn seed_with_subject(
        &self,
        entity: &str,
        content_type: &str,
        subject: &str,
        body: &str,
    ) -> String {
        self.provider
            .enqueue(
                &queue_name(entity),
                OutgoingMessage::new(content_type, body.to_string()).with_subject(subject),
            )
            .unwrap()
    }

    #[allow(dead_code)]
    pub fn count(&self, scope: &Scope) -> usize {
        self.provider.message_count(scope).unwrap()
    }
}

// ============================================================================
// Requests
// ============================================================================

#[allow(dead_code)]
pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap()
}

#[allow(dead_code)]
pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap()
}

#[allow(dead_code)]
pub fn post(uri: &str, content_type: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body.len().to_string())
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============================================================================
// Responses
// ============================================================================

pub async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

#[allow(dead_code)]
pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

/// One part of a `multipart/mixed` body.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub content_type: String,
    pub body: String,
}

/// Split a multipart body produced with `boundary` into its parts.
///
/// Panics if the body does not end with the closing delimiter.
#[allow(dead_code)]
pub fn parse_multipart(body: &str, boundary: &str) -> Vec<Part> {
    let closing = format!("--{}--\r\n", boundary);
    let content = body
        .strip_suffix(&closing)
        .unwrap_or_else(|| panic!("body is missing the closing delimiter: {:?}", body));

    let delimiter = format!("--{}\r\n", boundary);
    content
        .split(&delimiter)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            let (headers, body) = chunk.split_once("\r\n\r\n").unwrap();
            let content_type = headers
                .lines()
                .find_map(|line| line.strip_prefix("Content-Type: "))
                .unwrap()
                .to_string();
            Part {
                content_type,
                body: body.strip_suffix("\r\n").unwrap().to_string(),
            }
        })
        .collect()
}

/// The boundary declared in a multipart response's `Content-Type`.
#[allow(dead_code)]
pub fn boundary_of(response: &Response) -> String {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .strip_prefix("multipart/mixed; boundary=")
        .unwrap()
        .to_string()
}
