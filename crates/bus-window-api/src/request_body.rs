//! Bounded reading of request bodies.

use crate::errors::ApiError;
use axum::body::Body;
use axum::http::{header, HeaderMap};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::debug;

#[cfg(test)]
#[path = "request_body_tests.rs"]
mod tests;

/// Limits applied while reading a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLimits {
    /// Buffer size used when the request declares no length
    pub default_capacity: usize,
    /// Largest length a request may declare
    pub max_size: usize,
}

/// The `Content-Length` the client declared, if it is present and numeric.
pub fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Read `body` into a buffer sized from the declared length, or from
/// `limits.default_capacity` when there is none.
///
/// A body shorter than declared is returned as read. A body that outgrows
/// the buffer is rejected as soon as the overflowing chunk arrives.
pub async fn read_bounded(
    body: Body,
    declared_length: Option<usize>,
    limits: BodyLimits,
) -> Result<Bytes, ApiError> {
    if let Some(declared) = declared_length {
        if declared > limits.max_size {
            return Err(ApiError::PayloadTooLarge {
                limit: limits.max_size,
            });
        }
    }

    let capacity = declared_length.unwrap_or(limits.default_capacity);
    let mut buffer = BytesMut::with_capacity(capacity);
    let mut chunks = body.into_data_stream();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| ApiError::BodyRead {
            message: e.to_string(),
        })?;

        if buffer.len() + chunk.len() > capacity {
            return Err(ApiError::PayloadTooLarge { limit: capacity });
        }
        buffer.extend_from_slice(&chunk);
    }

    if let Some(declared) = declared_length {
        if buffer.len() < declared {
            debug!(
                declared,
                received = buffer.len(),
                "Request body shorter than declared"
            );
        }
    }

    Ok(buffer.freeze())
}
