//! # Bus Window HTTP Service
//!
//! HTTP API for looking into the queues and topic subscriptions of a message
//! bus.
//!
//! This service provides:
//! - Streaming `multipart/mixed` listings of every message in a queue or subscription
//! - JSON arrays of links to individual messages
//! - Single message retrieval and removal by id
//! - Sending messages to queues and topics
//! - A health check endpoint

pub mod config;
pub mod errors;
pub mod links;
pub mod multipart;
pub mod request_body;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

pub use config::{LoggingConfig, ServerConfig, ServiceConfig};
pub use errors::{ApiError, ConfigError, ServiceError};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bus_runtime::{
    BusClient, MessageId, MessageStream, OutgoingMessage, QueueOrTopicName, Scope,
    SubscriptionName,
};
use futures::StreamExt;
use links::LinkBuilder;
use multipart::{Boundary, BodyStream, MultipartRenderer, FALLBACK_CONTENT_TYPE};
use request_body::BodyLimits;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

/// Header carrying the message subject on sends and single-message reads.
pub const SUBJECT_HEADER: HeaderName = HeaderName::from_static("subject");

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Client for the message bus
    pub client: Arc<dyn BusClient>,

    /// Cancelled when the server gives up on in-flight requests
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServiceConfig, client: Arc<dyn BusClient>) -> Self {
        Self {
            config,
            client,
            shutdown: CancellationToken::new(),
        }
    }

    /// A token for one request, cancelled when the returned guard is dropped
    /// or the server shuts down.
    fn request_token(&self) -> (CancellationToken, DropGuard) {
        let token = self.shutdown.child_token();
        let guard = token.clone().drop_guard();
        (token, guard)
    }

    fn body_limits(&self) -> BodyLimits {
        BodyLimits {
            default_capacity: self.config.server.default_body_buffer_size,
            max_size: self.config.server.max_body_size,
        }
    }
}

// ============================================================================
// Router and Server
// ============================================================================

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let queue_routes = Router::new()
        .route(
            "/queue/{name}",
            get(list_queue_messages).post(send_queue_message),
        )
        .route("/queue/{name}/ids", get(list_queue_message_links))
        .route(
            "/queue/{name}/{message_id}",
            get(get_queue_message).delete(complete_queue_message),
        );

    let topic_routes = Router::new()
        .route("/topic/{topic}", post(send_topic_message))
        .route(
            "/topic/{topic}/{subscription}",
            get(list_subscription_messages),
        )
        .route(
            "/topic/{topic}/{subscription}/ids",
            get(list_subscription_message_links),
        )
        .route(
            "/topic/{topic}/{subscription}/{message_id}",
            get(get_subscription_message).delete(complete_subscription_message),
        );

    let health_routes = Router::new().route("/health", get(handle_health_check));

    let mut router = Router::new()
        .merge(queue_routes)
        .merge(topic_routes)
        .merge(health_routes);

    if state.config.server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server
///
/// Runs until SIGINT or SIGTERM. In-flight requests are then given
/// `shutdown_timeout_seconds` to finish before their bus operations are
/// cancelled.
pub async fn start_server(
    config: ServiceConfig,
    client: Arc<dyn BusClient>,
) -> Result<(), ServiceError> {
    config.validate()?;

    let state = AppState::new(config.clone(), client);
    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(address.as_str())
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!(address = %address, "Starting HTTP server");

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!(
                timeout_seconds = shutdown_timeout.as_secs(),
                "Initiating graceful shutdown"
            );

            tokio::spawn(async move {
                tokio::time::sleep(shutdown_timeout).await;
                if !shutdown.is_cancelled() {
                    warn!("Shutdown timeout elapsed, cancelling in-flight requests");
                    shutdown.cancel();
                }
            });
        }
    };

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        });

    shutdown.cancel();
    result?;

    info!("HTTP server shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// ============================================================================
// Queue Handlers
// ============================================================================

#[instrument(skip(state), fields(queue = %name))]
async fn list_queue_messages(
    State(state): State<AppState>,
    Path(name): Path<QueueOrTopicName>,
) -> Result<Response, ApiError> {
    list_messages(state, Scope::queue(name)).await
}

#[instrument(skip(state, headers), fields(queue = %name))]
async fn list_queue_message_links(
    State(state): State<AppState>,
    Path(name): Path<QueueOrTopicName>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    list_message_links(state, Scope::queue(name), &headers).await
}

#[instrument(skip(state), fields(queue = %name, message_id = %message_id))]
async fn get_queue_message(
    State(state): State<AppState>,
    Path((name, message_id)): Path<(QueueOrTopicName, MessageId)>,
) -> Result<Response, ApiError> {
    get_message(state, Scope::queue(name), message_id).await
}

#[instrument(skip(state), fields(queue = %name, message_id = %message_id))]
async fn complete_queue_message(
    State(state): State<AppState>,
    Path((name, message_id)): Path<(QueueOrTopicName, MessageId)>,
) -> Result<StatusCode, ApiError> {
    complete_message(state, Scope::queue(name), message_id).await
}

#[instrument(skip(state, headers, body), fields(queue = %name))]
async fn send_queue_message(
    State(state): State<AppState>,
    Path(name): Path<QueueOrTopicName>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ApiError> {
    send_message(state, name, headers, body).await
}

// ============================================================================
// Topic Handlers
// ============================================================================

#[instrument(skip(state), fields(topic = %topic, subscription = %subscription))]
async fn list_subscription_messages(
    State(state): State<AppState>,
    Path((topic, subscription)): Path<(QueueOrTopicName, SubscriptionName)>,
) -> Result<Response, ApiError> {
    list_messages(state, Scope::subscription(topic, subscription)).await
}

#[instrument(skip(state, headers), fields(topic = %topic, subscription = %subscription))]
async fn list_subscription_message_links(
    State(state): State<AppState>,
    Path((topic, subscription)): Path<(QueueOrTopicName, SubscriptionName)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    list_message_links(state, Scope::subscription(topic, subscription), &headers).await
}

#[instrument(
    skip(state),
    fields(topic = %topic, subscription = %subscription, message_id = %message_id)
)]
async fn get_subscription_message(
    State(state): State<AppState>,
    Path((topic, subscription, message_id)): Path<(QueueOrTopicName, SubscriptionName, MessageId)>,
) -> Result<Response, ApiError> {
    get_message(state, Scope::subscription(topic, subscription), message_id).await
}

#[instrument(
    skip(state),
    fields(topic = %topic, subscription = %subscription, message_id = %message_id)
)]
async fn complete_subscription_message(
    State(state): State<AppState>,
    Path((topic, subscription, message_id)): Path<(QueueOrTopicName, SubscriptionName, MessageId)>,
) -> Result<StatusCode, ApiError> {
    complete_message(state, Scope::subscription(topic, subscription), message_id).await
}

#[instrument(skip(state, headers, body), fields(topic = %topic))]
async fn send_topic_message(
    State(state): State<AppState>,
    Path(topic): Path<QueueOrTopicName>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ApiError> {
    send_message(state, topic, headers, body).await
}

// ============================================================================
// Shared Handler Logic
// ============================================================================

/// Peek the first message before committing to a response, so a missing
/// scope becomes an error status instead of a truncated body. The returned
/// stream yields that message again, followed by the rest.
async fn open_listing(
    state: &AppState,
    scope: Scope,
) -> Result<(MessageStream, DropGuard), ApiError> {
    let (cancel, guard) = state.request_token();
    let mut messages = state.client.peek_all_messages(scope, cancel);

    let first = messages.next().await.transpose()?;
    let all: MessageStream = Box::pin(futures::stream::iter(first.map(Ok)).chain(messages));
    Ok((all, guard))
}

async fn list_messages(state: AppState, scope: Scope) -> Result<Response, ApiError> {
    let (messages, guard) = open_listing(&state, scope).await?;

    let renderer = MultipartRenderer::new(Boundary::new());
    let content_type = renderer.content_type();
    let body = hold_until_done(renderer.render(messages), guard);

    Ok((
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(body),
    )
        .into_response())
}

async fn list_message_links(
    state: AppState,
    scope: Scope,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let links = LinkBuilder::from_request(
        headers,
        state.config.server.public_base_url.as_deref(),
    )?;
    let (messages, guard) = open_listing(&state, scope.clone()).await?;

    let body = hold_until_done(links.render_array(scope, messages), guard);

    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(body),
    )
        .into_response())
}

async fn get_message(
    state: AppState,
    scope: Scope,
    message_id: MessageId,
) -> Result<Response, ApiError> {
    let (cancel, _guard) = state.request_token();
    let message = state
        .client
        .peek_message(&scope, &message_id, &cancel)
        .await?;

    let content_type = message
        .content_type()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static(FALLBACK_CONTENT_TYPE));

    let mut response = (
        [(header::CONTENT_TYPE, content_type)],
        Body::from(message.body().clone()),
    )
        .into_response();

    if let Some(subject) = message.subject() {
        match HeaderValue::from_str(subject) {
            Ok(value) => {
                response.headers_mut().insert(SUBJECT_HEADER, value);
            }
            Err(_) => warn!("Message subject is not a valid header value, omitting it"),
        }
    }

    Ok(response)
}

async fn complete_message(
    state: AppState,
    scope: Scope,
    message_id: MessageId,
) -> Result<StatusCode, ApiError> {
    let (cancel, _guard) = state.request_token();
    state
        .client
        .complete_message(&scope, &message_id, &cancel)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn send_message(
    state: AppState,
    entity: QueueOrTopicName,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(ApiError::missing_content_type)?;

    let subject = headers
        .get(&SUBJECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let payload = request_body::read_bounded(
        body,
        request_body::declared_length(&headers),
        state.body_limits(),
    )
    .await?;

    let mut message = OutgoingMessage::new(content_type, payload);
    message.subject = subject;

    let (cancel, _guard) = state.request_token();
    state.client.send_message(&entity, message, &cancel).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Keep `guard` alive until `body` has been fully written or dropped.
fn hold_until_done(body: BodyStream, guard: DropGuard) -> BodyStream {
    Box::pin(async_stream::stream! {
        let _guard = guard;
        for await chunk in body {
            yield chunk;
        }
    })
}

// ============================================================================
// Health Check
// ============================================================================

#[instrument]
async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware
///
/// Propagates or generates an `x-correlation-id` header and logs completion
/// at a level chosen by status class.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}

// ============================================================================
// Response Types
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}
