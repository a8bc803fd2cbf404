//! Cursor-driven paging over a peek receiver.

use crate::client::{cancellable, MessageReceiver};
use crate::error::{BrokerError, FailureReason, QueueError};
use crate::message::{QueueMessage, Scope};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(test)]
#[path = "paging_tests.rs"]
mod tests;

/// Walks a scope one page at a time.
///
/// The first page starts at the head of the scope. Each following page
/// starts one past the highest sequence number already returned, so sequence
/// numbers handed out by one pager strictly increase. An empty page, or one
/// shorter than the page size, ends the walk.
///
/// This relies on the receiver returning full pages while more messages
/// remain; see [`MessageReceiver::peek_messages`]. A provider whose broker
/// may hand back partial pages has to top them up before returning.
pub(crate) struct PeekPager {
    receiver: Box<dyn MessageReceiver>,
    scope: Scope,
    page_size: u32,
    next_sequence_number: Option<i64>,
    pages_fetched: usize,
    exhausted: bool,
}

impl PeekPager {
    pub(crate) fn new(receiver: Box<dyn MessageReceiver>, scope: Scope, page_size: u32) -> Self {
        Self {
            receiver,
            scope,
            page_size,
            next_sequence_number: None,
            pages_fetched: 0,
            exhausted: false,
        }
    }

    /// Number of non-empty pages returned so far.
    pub(crate) fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetch the next page, or `None` once the scope is exhausted.
    pub(crate) async fn next_page(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<QueueMessage>>, QueueError> {
        if self.exhausted {
            return Ok(None);
        }

        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        let page = cancellable(
            cancel,
            self.receiver
                .peek_messages(self.page_size, self.next_sequence_number),
        )
        .await?
        .map_err(|e| e.into_queue_error(&self.scope))?;

        if page.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let mut messages = Vec::with_capacity(page.len());
        for message in page {
            if let Some(floor) = self.next_sequence_number {
                if message.sequence_number < floor {
                    self.exhausted = true;
                    return Err(BrokerError::new(
                        FailureReason::Other,
                        format!(
                            "peek from sequence number {} returned sequence number {}",
                            floor, message.sequence_number
                        ),
                    )
                    .into_queue_error(&self.scope));
                }
            }
            messages.push(QueueMessage::try_from(message)?);
        }

        if let Some(last) = messages.last() {
            self.next_sequence_number = Some(last.sequence_number().saturating_add(1));
        }
        if messages.len() < self.page_size as usize {
            self.exhausted = true;
        }
        self.pages_fetched += 1;

        debug!(
            scope = %self.scope,
            page = self.pages_fetched,
            count = messages.len(),
            "Peeked page"
        );

        Ok(Some(messages))
    }
}
