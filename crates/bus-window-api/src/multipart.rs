//! Streaming `multipart/mixed` rendering of peeked messages.
//!
//! Each message becomes one part, emitted as its own chunk so the client
//! receives it as soon as it has been peeked:
//!
//! ```text
//! --{boundary}\r\n
//! Content-Type: {content type}\r\n
//! Content-Disposition: inline\r\n
//! \r\n
//! {body}\r\n
//! ```
//!
//! The body ends with `--{boundary}--\r\n`. Bodies are written as-is and are
//! not checked for the boundary string.

use bus_runtime::{QueueError, QueueMessage};
use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use std::io;
use std::pin::Pin;
use tracing::error;

#[cfg(test)]
#[path = "multipart_tests.rs"]
mod tests;

/// Response body chunks. An error ends the body early.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Content type used for parts whose message carries none.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Multipart boundary, unique per response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary(String);

impl Boundary {
    pub fn new() -> Self {
        Self(format!("boundary_{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Boundary {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders a message stream as a `multipart/mixed` body.
#[derive(Debug, Clone)]
pub struct MultipartRenderer {
    boundary: Boundary,
}

impl MultipartRenderer {
    pub fn new(boundary: Boundary) -> Self {
        Self { boundary }
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Value for the response `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    /// Encode one message as a complete part.
    pub fn part(&self, message: &QueueMessage) -> Bytes {
        let content_type = message.content_type().unwrap_or(FALLBACK_CONTENT_TYPE);
        let header = format!(
            "--{}\r\nContent-Type: {}\r\nContent-Disposition: inline\r\n\r\n",
            self.boundary, content_type
        );

        let mut part = BytesMut::with_capacity(header.len() + message.body().len() + 2);
        part.put_slice(header.as_bytes());
        part.put_slice(message.body());
        part.put_slice(b"\r\n");
        part.freeze()
    }

    /// The closing delimiter.
    pub fn closing(&self) -> Bytes {
        Bytes::from(format!("--{}--\r\n", self.boundary))
    }

    /// Stream the parts for `messages` followed by the closing delimiter.
    ///
    /// A failure part-way through ends the stream with an I/O error, leaving
    /// the client with a body that has no closing delimiter.
    pub fn render<S>(self, messages: S) -> BodyStream
    where
        S: Stream<Item = Result<QueueMessage, QueueError>> + Send + 'static,
    {
        let stream = async_stream::try_stream! {
            let mut parts = 0usize;
            for await message in messages {
                let message = message.map_err(|e| {
                    error!(error = %e, parts, "Message stream failed, truncating multipart body");
                    io::Error::other(e)
                })?;
                parts += 1;
                yield self.part(&message);
            }
            yield self.closing();
        };

        Box::pin(stream)
    }
}
