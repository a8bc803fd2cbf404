//! Absolute links to individual messages.

use crate::errors::ApiError;
use crate::multipart::BodyStream;
use axum::http::{header, HeaderMap};
use bus_runtime::{MessageId, QueueError, QueueMessage, Scope};
use bytes::Bytes;
use futures::Stream;
use std::io;
use tracing::error;
use url::Url;

#[cfg(test)]
#[path = "links_tests.rs"]
mod tests;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Builds `{base}/queue/{name}/{id}` and
/// `{base}/topic/{topic}/{subscription}/{id}` links, percent-encoding each
/// path segment.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base: Url,
}

impl LinkBuilder {
    /// Use a fixed base URL. Any path on it is kept as a prefix.
    pub fn with_base(base: &str) -> Result<Self, ApiError> {
        let base = Url::parse(base).map_err(|e| ApiError::InvalidRequest {
            message: format!("Invalid base URL '{}': {}", base, e),
        })?;

        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidRequest {
                message: format!("'{}' cannot be used as a base URL", base),
            });
        }

        Ok(Self { base })
    }

    /// Derive the base URL from the request's `Host` and `X-Forwarded-Proto`
    /// headers, unless a public base URL is configured.
    pub fn from_request(headers: &HeaderMap, public_base_url: Option<&str>) -> Result<Self, ApiError> {
        if let Some(base) = public_base_url {
            return Self::with_base(base);
        }

        let scheme = headers
            .get(FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("http");

        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ApiError::InvalidRequest {
                message: "No host was provided.".to_string(),
            })?;

        let invalid = || ApiError::InvalidRequest {
            message: format!("Invalid host '{}'", host),
        };

        if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
            return Err(ApiError::InvalidRequest {
                message: format!("Unsupported forwarded protocol '{}'", scheme),
            });
        }

        let base = Url::parse(&format!("{}://{}/", scheme, host)).map_err(|_| invalid())?;

        // Anything beyond an authority in the header would leak into every link.
        let authority_only = base.host_str().is_some()
            && base.path() == "/"
            && base.query().is_none()
            && base.fragment().is_none()
            && base.username().is_empty()
            && base.password().is_none();
        if !authority_only {
            return Err(invalid());
        }

        Ok(Self { base })
    }

    /// Link to a single message in `scope`.
    pub fn message_link(&self, scope: &Scope, message_id: &MessageId) -> String {
        let mut url = self.base.clone();

        // Bases are checked to be able to hold a path when the builder is created.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            match scope {
                Scope::Queue(name) => {
                    segments.extend(["queue", name.as_str()]);
                }
                Scope::Subscription {
                    topic,
                    subscription,
                } => {
                    segments.extend(["topic", topic.as_str(), subscription.as_str()]);
                }
            }
            segments.push(message_id.as_str());
        }

        url.into()
    }

    /// Stream a JSON array with one link per message.
    pub fn render_array<S>(
        self,
        scope: Scope,
        messages: S,
    ) -> BodyStream
    where
        S: Stream<Item = Result<QueueMessage, QueueError>> + Send + 'static,
    {
        let stream = async_stream::try_stream! {
            yield Bytes::from_static(b"[");

            let mut count = 0usize;
            for await message in messages {
                let message = message.map_err(|e| {
                    error!(error = %e, count, "Message stream failed, truncating link array");
                    io::Error::other(e)
                })?;

                let link = serde_json::to_string(&self.message_link(&scope, message.id()))?;
                let element = if count == 0 { link } else { format!(",{}", link) };
                count += 1;
                yield Bytes::from(element);
            }

            yield Bytes::from_static(b"]");
        };

        Box::pin(stream)
    }
}
