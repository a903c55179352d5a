//! Caller-driven handle over a structured response stream

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::context::ContextMode;
use crate::conversation::{Attachment, Message, SharedConversation};
use crate::error::{ColloquyError, Result};
use crate::events::EventEmitter;
use crate::llm::StructuredStream;

use super::assembler::{PartialAssembly, PartialMessage, StreamingResponseAssembler};

/// A response being generated for the conversation.
///
/// Polling the handle yields live [`PartialMessage`] snapshots in arrival
/// order. Nothing touches the conversation until [`finish`](Self::finish)
/// succeeds; cancelling or dropping the handle leaves it unchanged.
pub struct ResponseStream {
    inner: Option<StructuredStream>,
    assembler: StreamingResponseAssembler,
    conversation: SharedConversation,
    events: EventEmitter,
    mode: ContextMode,
    failure: Option<ColloquyError>,
    completed: bool,
}

impl ResponseStream {
    pub(crate) fn new(
        inner: StructuredStream,
        candidate: Option<Attachment>,
        conversation: SharedConversation,
        events: EventEmitter,
        mode: ContextMode,
    ) -> Self {
        Self {
            inner: Some(inner),
            assembler: StreamingResponseAssembler::new(candidate),
            conversation,
            events,
            mode,
            failure: None,
            completed: false,
        }
    }

    /// Context mode the prompt was built in
    pub fn mode(&self) -> ContextMode {
        self.mode
    }

    /// Attachment metadata fetched for this turn, if any
    pub fn attachment_candidate(&self) -> Option<&Attachment> {
        self.assembler.candidate()
    }

    /// State of the assembly so far
    pub fn assembly(&self) -> &PartialAssembly {
        self.assembler.assembly()
    }

    /// Drain the stream, finalize the message and append it.
    ///
    /// # Errors
    ///
    /// [`ColloquyError::Stream`] if the backend failed mid-stream and
    /// [`ColloquyError::Finalization`] if the output was truncated or the last
    /// increment does not make a valid message. The conversation is unchanged
    /// in both cases.
    pub async fn finish(mut self) -> Result<Message> {
        while self.next().await.is_some() {}
        self.completed = true;

        if let Some(error) = self.failure.take() {
            self.assembler.reset();
            tracing::warn!(mode = %self.mode, "Response stream failed: {}", error);
            return Err(error);
        }

        let message = self.assembler.finalize().inspect_err(|failure| {
            tracing::warn!(
                mode = %self.mode,
                malformed = self.assembler.assembly().malformed(),
                "Response finalization failed: {}",
                failure
            );
        })?;

        let appended = {
            let mut conversation = self.conversation.write().await;
            conversation.append(message).clone()
        };

        tracing::info!(
            mode = %self.mode,
            message_id = %appended.id(),
            attachment = appended.attachment().is_some(),
            "Response appended"
        );
        self.events
            .message_appended(appended.id(), appended.role())
            .await;

        Ok(appended)
    }

    /// Stop generating and discard all partial state
    pub fn cancel(self) {
        // Drop does the work
    }
}

impl Stream for ResponseStream {
    type Item = PartialMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(increment))) => {
                    if let Some(snapshot) = this.assembler.accept(increment) {
                        tracing::trace!(sequence = snapshot.sequence, "Response snapshot");
                        return Poll::Ready(Some(snapshot));
                    }
                }
                Poll::Ready(Some(Err(ColloquyError::Truncated(reason)))) => {
                    this.inner = None;
                    this.assembler.mark_truncated(reason);
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(error))) => {
                    this.inner = None;
                    this.failure = Some(match error {
                        ColloquyError::Stream(_) => error,
                        other => ColloquyError::Stream(other.to_string()),
                    });
                    return Poll::Ready(None);
                }
                Poll::Ready(None) => {
                    this.inner = None;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if !self.completed {
            let snapshots = self.assembler.assembly().accepted();
            self.assembler.reset();
            tracing::debug!(snapshots, "Response stream cancelled, partial state discarded");
            self.events.stream_cancelled(snapshots);
        }
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("mode", &self.mode)
            .field("assembly", self.assembler.assembly())
            .field("exhausted", &self.inner.is_none())
            .finish()
    }
}
