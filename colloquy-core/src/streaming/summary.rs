//! Running summary generation

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::context::{ContextMode, ContextSelector};
use crate::conversation::SharedConversation;
use crate::error::{ColloquyError, Result};
use crate::events::EventEmitter;
use crate::llm::{LLMProvider, LLMRequest, TextStream};
use crate::prompt::PromptBuilder;

use super::assembler::FinalizationFailure;

/// Openers that describe the conversation instead of naming its topic
const META_PREFIXES: &[&str] = &[
    "The conversation is about",
    "This conversation is about",
    "The conversation covers",
    "The discussion covers",
    "The discussion is about",
    "Summary:",
];

const MAX_SENTENCES: usize = 2;

/// Clean model output into a topic-first summary of at most two sentences.
///
/// Returns an empty string when nothing usable is left.
pub fn normalize_summary(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut text = collapsed.trim_matches(['"', '\'']).trim();

    'strip: loop {
        for prefix in META_PREFIXES {
            if text
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            {
                text = text[prefix.len()..].trim_start_matches([' ', ':', ',', '-']);
                continue 'strip;
            }
        }
        break;
    }

    let text = first_sentences(text, MAX_SENTENCES);
    capitalize(text.trim())
}

/// Prefix of `text` holding at most `limit` sentences
fn first_sentences(text: &str, limit: usize) -> &str {
    let mut ended = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
            if at_boundary {
                ended += 1;
                if ended == limit {
                    return &text[..i + c.len_utf8()];
                }
            }
        }
    }
    text
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Opens summary streams for a conversation
#[derive(Clone)]
pub struct SummaryUpdater {
    backend: Arc<dyn LLMProvider>,
    prompts: PromptBuilder,
    selector: ContextSelector,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
}

impl SummaryUpdater {
    pub fn new(backend: Arc<dyn LLMProvider>, prompts: PromptBuilder, selector: ContextSelector) -> Self {
        Self {
            backend,
            prompts,
            selector,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Sampling options forwarded with every summary request
    pub fn with_generation_options(mut self, temperature: Option<f32>, max_tokens: Option<usize>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Build the summary prompt for `mode` and start generating.
    ///
    /// Full mode resummarises the whole history; summary mode merges the
    /// latest message into the previous summary.
    pub async fn update(
        &self,
        mode: ContextMode,
        conversation: &SharedConversation,
        events: EventEmitter,
    ) -> Result<SummaryStream> {
        let prompt = {
            let conversation = conversation.read().await;
            self.prompts.build_summary_prompt(mode, &conversation)
        };
        let prompt_tokens = self.selector.check_prompt(&prompt)?;

        let request = LLMRequest {
            system_prompt: Some(self.prompts.system_instructions().to_string()),
            prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(mode = %mode, tokens = prompt_tokens, "Requesting summary");
        events.generation_started("summary", mode, prompt_tokens).await;

        let inner = self.backend.stream_text(&request).await?;
        Ok(SummaryStream::new(inner, conversation.clone(), events, mode))
    }
}

/// A summary being generated.
///
/// Yields the cumulative text received so far. The conversation summary is
/// only replaced by a successful [`finish`](Self::finish).
pub struct SummaryStream {
    inner: Option<TextStream>,
    text: String,
    conversation: SharedConversation,
    events: EventEmitter,
    mode: ContextMode,
    snapshots: u64,
    failure: Option<ColloquyError>,
    completed: bool,
}

impl SummaryStream {
    fn new(
        inner: TextStream,
        conversation: SharedConversation,
        events: EventEmitter,
        mode: ContextMode,
    ) -> Self {
        Self {
            inner: Some(inner),
            text: String::new(),
            conversation,
            events,
            mode,
            snapshots: 0,
            failure: None,
            completed: false,
        }
    }

    pub fn mode(&self) -> ContextMode {
        self.mode
    }

    /// Raw text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Drain the stream, normalize the text and replace the summary.
    ///
    /// Returns the new summary. On any failure the previous summary stays.
    pub async fn finish(mut self) -> Result<String> {
        while self.next().await.is_some() {}
        self.completed = true;

        if let Some(error) = self.failure.take() {
            tracing::warn!(mode = %self.mode, "Summary stream failed: {}", error);
            return Err(error);
        }

        let summary = normalize_summary(&self.text);
        if summary.is_empty() {
            tracing::warn!(mode = %self.mode, raw = %self.text, "Summary came back empty");
            return Err(FinalizationFailure::EmptySummary.into());
        }

        self.conversation.write().await.replace_summary(summary.clone());
        tracing::info!(mode = %self.mode, "Summary updated");
        self.events.summary_updated(&summary).await;

        Ok(summary)
    }

    /// Stop generating; the current summary is kept
    pub fn cancel(self) {}
}

impl Stream for SummaryStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(delta))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    this.text.push_str(&delta);
                    this.snapshots += 1;
                    return Poll::Ready(Some(this.text.clone()));
                }
                Poll::Ready(Some(Err(error))) => {
                    this.inner = None;
                    this.failure = Some(match error {
                        ColloquyError::Stream(_) => error,
                        ColloquyError::Truncated(reason) => {
                            FinalizationFailure::Truncated(reason).into()
                        }
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

impl Drop for SummaryStream {
    fn drop(&mut self) {
        if !self.completed {
            self.text.clear();
            tracing::debug!(snapshots = self.snapshots, "Summary stream cancelled");
            self.events.stream_cancelled(self.snapshots);
        }
    }
}

impl std::fmt::Debug for SummaryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryStream")
            .field("mode", &self.mode)
            .field("text", &self.text)
            .field("exhausted", &self.inner.is_none())
            .finish()
    }
}
