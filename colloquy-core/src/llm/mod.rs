//! Generative backend abstraction
//!
//! The engine talks to a language model only through [`LLMProvider`]. A
//! provider reports whether it can serve requests, can be warmed up ahead of
//! the first turn, and streams either plain text deltas or cumulative
//! structured snapshots.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;

use crate::error::{ColloquyError, Result};
use crate::parsing::JsonParser;

/// Stream of text deltas
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Stream of cumulative structured snapshots; each item supersedes the last
pub type StructuredStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Whether a backend can serve requests right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// Not ready, with a human readable reason
    Unavailable(String),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Available => f.write_str("available"),
            Availability::Unavailable(reason) => write!(f, "unavailable ({})", reason),
        }
    }
}

/// Request to an LLM provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMRequest {
    /// Session-level instructions, sent as the system message
    pub system_prompt: Option<String>,

    /// Task prompt for this call
    pub prompt: String,

    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
}

impl LLMRequest {
    /// Create a simple request from a single prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Create a request with system prompt
    pub fn with_system_prompt(
        system_prompt: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            ..Self::from_prompt(prompt)
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Copy of this request whose prompt also asks for JSON matching `schema`
    pub fn with_schema_instructions(&self, schema: &Value) -> Self {
        let mut request = self.clone();
        request.prompt = format!(
            "{}\n\nRespond only with a JSON object matching this schema:\n{}",
            self.prompt, schema
        );
        request
    }
}

/// Model information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

/// Trait for generative backends.
///
/// Implementations only need [`stream_text`](LLMProvider::stream_text);
/// structured output falls back to parsing the accumulated text with the
/// repairing [`JsonParser`].
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Check whether the backend can serve requests
    async fn availability(&self) -> Availability;

    /// Load the model ahead of the first request. Best effort.
    async fn prewarm(&self) -> Result<()> {
        Ok(())
    }

    /// Stream plain text deltas for a request
    async fn stream_text(&self, request: &LLMRequest) -> Result<TextStream>;

    /// Stream cumulative JSON snapshots for a request.
    ///
    /// Every item is the best reading of all output received so far, so a
    /// consumer only ever needs the latest one.
    async fn stream_structured(
        &self,
        request: &LLMRequest,
        schema: &Value,
    ) -> Result<StructuredStream> {
        let text = self
            .stream_text(&request.with_schema_instructions(schema))
            .await?;
        Ok(structured_snapshots(text))
    }

    /// Get model information
    fn model_info(&self) -> ModelInfo;
}

/// Turn text deltas into cumulative JSON snapshots.
///
/// Deltas that do not change the parsed value are skipped. Errors are passed
/// through in place. When the text ends without a complete JSON value the
/// stream yields a final [`ColloquyError::Truncated`], so a repaired prefix
/// is never mistaken for the whole answer.
pub fn structured_snapshots(text: TextStream) -> StructuredStream {
    let parser = JsonParser::new();
    let stream = text
        .map(Some)
        .chain(futures::stream::once(futures::future::ready(None)))
        .scan(
            (String::new(), None::<Value>, false),
            move |(buffer, last, failed), chunk| {
                let item = match chunk {
                    Some(Ok(delta)) => {
                        buffer.push_str(&delta);
                        match parser.parse_partial(buffer) {
                            Ok(value) if last.as_ref() != Some(&value) => {
                                *last = Some(value.clone());
                                Some(Ok(value))
                            }
                            _ => None,
                        }
                    }
                    Some(Err(e)) => {
                        *failed = true;
                        Some(Err(e))
                    }
                    None if *failed || buffer.trim().is_empty() => None,
                    None => JsonParser::strict().parse(buffer).err().map(|e| {
                        tracing::debug!(len = buffer.len(), "Structured output incomplete: {}", e);
                        Err(ColloquyError::Truncated(
                            "output ended before the JSON value was complete".to_string(),
                        ))
                    }),
                };
                futures::future::ready(Some(item))
            },
        )
        .filter_map(futures::future::ready);
    Box::pin(stream)
}

/// One parsed unit of a provider's wire stream
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WireChunk {
    /// Text carried by this chunk, if any
    pub content: Option<String>,
    /// Whether the backend marked the response as finished
    pub done: bool,
    /// The backend's reason for stopping, when it gives one
    pub stop_reason: Option<String>,
}

impl WireChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn finished(stop_reason: Option<String>) -> Self {
        Self {
            content: None,
            done: true,
            stop_reason,
        }
    }
}

enum Completion {
    Open,
    Closing(Option<ColloquyError>),
    Closed,
}

/// Text deltas from a provider's wire stream.
///
/// The stream ends at the first finished chunk. A `length` stop reason, or a
/// connection that closes before any finished chunk, ends it with
/// [`ColloquyError::Truncated`] instead.
pub fn completion_checked<S>(chunks: S) -> TextStream
where
    S: Stream<Item = Result<WireChunk>> + Send + 'static,
{
    let stream = futures::stream::unfold(
        (Box::pin(chunks), Completion::Open),
        |(mut chunks, state)| async move {
            match state {
                Completion::Closed => return None,
                Completion::Closing(error) => {
                    return error.map(|e| (Err(e), (chunks, Completion::Closed)));
                }
                Completion::Open => {}
            }

            loop {
                let chunk = match chunks.next().await {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => return Some((Err(e), (chunks, Completion::Open))),
                    None => {
                        let error = ColloquyError::Truncated(
                            "stream closed before the backend finished".to_string(),
                        );
                        return Some((Err(error), (chunks, Completion::Closed)));
                    }
                };

                let next = if chunk.done {
                    Completion::Closing(truncation(chunk.stop_reason.as_deref()))
                } else {
                    Completion::Open
                };

                match (chunk.content.filter(|c| !c.is_empty()), next) {
                    (Some(text), next) => return Some((Ok(text), (chunks, next))),
                    (None, Completion::Closing(Some(e))) => {
                        return Some((Err(e), (chunks, Completion::Closed)));
                    }
                    (None, Completion::Closing(None)) => return None,
                    (None, _) => continue,
                }
            }
        },
    );
    Box::pin(stream)
}

fn truncation(stop_reason: Option<&str>) -> Option<ColloquyError> {
    match stop_reason {
        Some("length") => Some(ColloquyError::Truncated(
            "backend stopped at its output token limit".to_string(),
        )),
        _ => None,
    }
}

pub mod factory;
pub mod providers;

pub use factory::LLMProviderFactory;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ColloquyError;
    use serde_json::json;

    fn deltas(parts: &[&str]) -> TextStream {
        let items: Vec<Result<String>> = parts.iter().map(|p| Ok(p.to_string())).collect();
        Box::pin(futures::stream::iter(items))
    }

    #[test]
    fn test_request_builders() {
        let request = LLMRequest::with_system_prompt("Be brief", "Hello")
            .with_temperature(5.0)
            .with_max_tokens(256);

        assert_eq!(request.system_prompt.as_deref(), Some("Be brief"));
        assert_eq!(request.prompt, "Hello");
        assert_eq!(request.temperature, Some(2.0));
        assert_eq!(request.max_tokens, Some(256));
    }

    #[test]
    fn test_schema_instructions_keep_original_prompt() {
        let request = LLMRequest::from_prompt("Respond.");
        let instructed = request.with_schema_instructions(&json!({"type": "object"}));
        assert!(instructed.prompt.starts_with("Respond.\n\n"));
        assert!(instructed.prompt.contains(r#"{"type":"object"}"#));
        assert_eq!(request.prompt, "Respond.");
    }

    #[test]
    fn test_availability_display() {
        assert!(Availability::Available.is_available());
        let down = Availability::Unavailable("model not loaded".into());
        assert!(!down.is_available());
        assert_eq!(down.to_string(), "unavailable (model not loaded)");
    }

    #[tokio::test]
    async fn test_structured_snapshots_accumulate() {
        let stream = structured_snapshots(deltas(&[
            "```json\n",
            "{\"role\": \"assi",
            "stant\", \"con",
            "tent\": \"Hel",
            "lo\"}",
            "\n```",
        ]));
        let snapshots: Vec<Value> = stream.map(|r| r.unwrap()).collect().await;

        assert_eq!(
            snapshots,
            vec![
                json!({"role": "assi"}),
                json!({"role": "assistant"}),
                json!({"role": "assistant", "content": "Hel"}),
                json!({"role": "assistant", "content": "Hello"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_structured_snapshots_pass_errors_through() {
        let items: Vec<Result<String>> = vec![
            Ok("{\"content\": \"a".into()),
            Err(ColloquyError::Stream("connection reset".into())),
        ];
        let mut stream = structured_snapshots(Box::pin(futures::stream::iter(items)));

        assert_eq!(stream.next().await.unwrap().unwrap(), json!({"content": "a"}));
        assert!(matches!(
            stream.next().await,
            Some(Err(ColloquyError::Stream(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_structured_snapshots_report_unfinished_json() {
        let stream = structured_snapshots(deltas(&[
            "{\"role\": \"assistant\", ",
            "\"content\": \"The three steps are: first",
        ]));
        let items: Vec<Result<Value>> = stream.collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(
            items[1].as_ref().unwrap(),
            &json!({"role": "assistant", "content": "The three steps are: first"})
        );
        assert!(matches!(items[2], Err(ColloquyError::Truncated(_))));
    }

    #[tokio::test]
    async fn test_structured_snapshots_empty_text_ends_quietly() {
        let stream = structured_snapshots(deltas(&[]));
        let items: Vec<Result<Value>> = stream.collect().await;
        assert!(items.is_empty());
    }

    fn wire(chunks: Vec<Result<WireChunk>>) -> TextStream {
        completion_checked(futures::stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_completion_checked_stops_at_finish() {
        let stream = wire(vec![
            Ok(WireChunk::delta("Hel")),
            Ok(WireChunk {
                content: Some("lo".into()),
                done: true,
                stop_reason: Some("stop".into()),
            }),
            Ok(WireChunk::delta("ignored")),
        ]);
        let items: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_completion_checked_reports_length_stop() {
        let stream = wire(vec![
            Ok(WireChunk::delta("Once upon")),
            Ok(WireChunk::finished(Some("length".into()))),
        ]);
        let items: Vec<Result<String>> = stream.collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "Once upon");
        assert!(matches!(items[1], Err(ColloquyError::Truncated(_))));
    }

    #[tokio::test]
    async fn test_completion_checked_reports_early_close() {
        let stream = wire(vec![Ok(WireChunk::delta("Once upon"))]);
        let items: Vec<Result<String>> = stream.collect().await;

        assert_eq!(items.len(), 2);
        assert!(matches!(
            &items[1],
            Err(ColloquyError::Truncated(msg)) if msg.contains("closed")
        ));
    }
}
