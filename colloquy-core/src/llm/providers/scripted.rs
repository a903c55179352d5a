//! Deterministic provider that replays scripted output
//!
//! Used by tests and offline demos. Every request is recorded so callers can
//! assert on exactly what the engine sent.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{ColloquyError, Result};
use crate::llm::{Availability, LLMProvider, LLMRequest, ModelInfo, StructuredStream, TextStream};

/// Which entry point a recorded request came through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Text,
    Structured,
}

/// A request as the provider received it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub kind: RequestKind,
    pub request: LLMRequest,
    pub schema: Option<Value>,
}

/// One scripted stream: items followed by an optional mid-stream failure
#[derive(Debug, Clone)]
struct Script<T> {
    items: Vec<T>,
    failure: Option<String>,
}

impl<T: Send + 'static> Script<T> {
    fn into_stream(self) -> std::pin::Pin<Box<dyn futures::Stream<Item = Result<T>> + Send>> {
        let mut items: Vec<Result<T>> = self.items.into_iter().map(Ok).collect();
        if let Some(message) = self.failure {
            items.push(Err(ColloquyError::Stream(message)));
        }
        Box::pin(futures::stream::iter(items))
    }
}

/// Provider that replays queued scripts in order
pub struct ScriptedProvider {
    availability: Mutex<Availability>,
    structured: Mutex<VecDeque<Script<Value>>>,
    text: Mutex<VecDeque<Script<String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    prewarm_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    /// An available provider with nothing queued
    pub fn new() -> Self {
        Self {
            availability: Mutex::new(Availability::Available),
            structured: Mutex::new(VecDeque::new()),
            text: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            prewarm_calls: AtomicUsize::new(0),
        }
    }

    /// An unavailable provider
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let provider = Self::new();
        provider.set_availability(Availability::Unavailable(reason.into()));
        provider
    }

    /// Queue a structured stream of cumulative snapshots
    pub fn with_structured_response(self, snapshots: Vec<Value>) -> Self {
        self.push_structured(snapshots, None);
        self
    }

    /// Queue a structured stream that fails after its snapshots
    pub fn with_structured_failure(self, snapshots: Vec<Value>, error: impl Into<String>) -> Self {
        self.push_structured(snapshots, Some(error.into()));
        self
    }

    /// Queue a text stream of deltas
    pub fn with_text_response<S: Into<String>>(self, deltas: impl IntoIterator<Item = S>) -> Self {
        self.push_text(deltas, None);
        self
    }

    /// Queue a text stream that fails after its deltas
    pub fn with_text_failure<S: Into<String>>(
        self,
        deltas: impl IntoIterator<Item = S>,
        error: impl Into<String>,
    ) -> Self {
        self.push_text(deltas, Some(error.into()));
        self
    }

    pub fn push_structured(&self, snapshots: Vec<Value>, failure: Option<String>) {
        lock(&self.structured).push_back(Script {
            items: snapshots,
            failure,
        });
    }

    pub fn push_text<S: Into<String>>(
        &self,
        deltas: impl IntoIterator<Item = S>,
        failure: Option<String>,
    ) {
        lock(&self.text).push_back(Script {
            items: deltas.into_iter().map(Into::into).collect(),
            failure,
        });
    }

    pub fn set_availability(&self, availability: Availability) {
        *lock(&self.availability) = availability;
    }

    /// Every request received so far, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn prewarm_count(&self) -> usize {
        self.prewarm_calls.load(Ordering::SeqCst)
    }

    fn record(&self, kind: RequestKind, request: &LLMRequest, schema: Option<&Value>) {
        lock(&self.requests).push(RecordedRequest {
            kind,
            request: request.clone(),
            schema: schema.cloned(),
        });
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn availability(&self) -> Availability {
        lock(&self.availability).clone()
    }

    async fn prewarm(&self) -> Result<()> {
        self.prewarm_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stream_text(&self, request: &LLMRequest) -> Result<TextStream> {
        self.record(RequestKind::Text, request, None);
        let script = lock(&self.text)
            .pop_front()
            .ok_or_else(|| ColloquyError::Backend("No scripted text response left".to_string()))?;
        Ok(script.into_stream())
    }

    async fn stream_structured(
        &self,
        request: &LLMRequest,
        schema: &Value,
    ) -> Result<StructuredStream> {
        self.record(RequestKind::Structured, request, Some(schema));
        let script = lock(&self.structured).pop_front().ok_or_else(|| {
            ColloquyError::Backend("No scripted structured response left".to_string())
        })?;
        Ok(script.into_stream())
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model_name: "scripted".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_replays_scripts_in_order() {
        let provider = ScriptedProvider::new()
            .with_text_response(["a", "b"])
            .with_text_response(["c"]);

        let first: Vec<String> = provider
            .stream_text(&LLMRequest::from_prompt("1"))
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        let second: Vec<String> = provider
            .stream_text(&LLMRequest::from_prompt("2"))
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(second, vec!["c"]);
        assert!(provider
            .stream_text(&LLMRequest::from_prompt("3"))
            .await
            .is_err());
        assert_eq!(provider.request_count(), 3);
    }

    #[tokio::test]
    async fn test_records_structured_requests() {
        let provider =
            ScriptedProvider::new().with_structured_failure(vec![json!({"role": "assistant"})], "reset");
        let schema = json!({"type": "object"});

        let items: Vec<Result<Value>> = provider
            .stream_structured(&LLMRequest::from_prompt("go"), &schema)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ColloquyError::Stream(_))));

        let recorded = provider.requests();
        assert_eq!(recorded[0].kind, RequestKind::Structured);
        assert_eq!(recorded[0].schema.as_ref(), Some(&schema));
        assert_eq!(recorded[0].request.prompt, "go");
    }

    #[tokio::test]
    async fn test_availability_and_prewarm() {
        let provider = ScriptedProvider::unavailable("loading");
        assert_eq!(
            provider.availability().await,
            Availability::Unavailable("loading".into())
        );
        provider.set_availability(Availability::Available);
        assert!(provider.availability().await.is_available());

        provider.prewarm().await.unwrap();
        assert_eq!(provider.prewarm_count(), 1);
    }
}
