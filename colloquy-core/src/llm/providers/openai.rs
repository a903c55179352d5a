//! OpenAI-compatible chat completions provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::error::{ColloquyError, Result};
use crate::llm::{
    completion_checked, structured_snapshots, Availability, LLMProvider, LLMRequest, ModelInfo,
    StructuredStream, TextStream, WireChunk,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI LLM provider (and any API speaking the same protocol).
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "gpt-4o-mini")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Create with a custom base URL (for Azure OpenAI or compatible APIs).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from environment variables.
    ///
    /// Reads from:
    /// - `OPENAI_API_KEY` - API key (required)
    /// - `OPENAI_MODEL` - Model name (optional, defaults to "gpt-4o-mini")
    /// - `OPENAI_BASE_URL` - Custom base URL (optional)
    ///
    /// # Errors
    ///
    /// Returns an error if OPENAI_API_KEY is not set.
    pub fn from_env(model: Option<impl Into<String>>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ColloquyError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let model = model
            .map(|m| m.into())
            .or_else(|| std::env::var("OPENAI_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self::with_base_url(api_key, model, base_url))
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn open_stream(&self, body: &ChatRequest) -> Result<TextStream> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ColloquyError::Backend(format!("Failed to send request to OpenAI: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if let Ok(error) = serde_json::from_str::<ErrorEnvelope>(&text) {
                return Err(ColloquyError::Backend(format!(
                    "OpenAI API error ({}): {}",
                    error.error.error_type.unwrap_or_else(|| status.to_string()),
                    error.error.message
                )));
            }

            return Err(ColloquyError::Backend(format!(
                "OpenAI API error ({}): {}",
                status, text
            )));
        }

        let bytes_stream = response.bytes_stream();
        let reader = tokio_util::io::StreamReader::new(
            bytes_stream.map(|r| r.map_err(std::io::Error::other)),
        );
        let lines = LinesStream::new(tokio::io::BufReader::new(reader).lines());

        let chunks = lines
            .map(|line| match line {
                Ok(line) => parse_sse_line(&line),
                Err(e) => Some(Err(ColloquyError::Stream(format!(
                    "Stream read error: {}",
                    e
                )))),
            })
            .filter_map(|item| item);

        Ok(completion_checked(chunks))
    }

    fn chat_request(&self, request: &LLMRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: None,
            stream: true,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Read one server-sent-events line.
///
/// Comments, blank lines and chunks with neither text nor a finish reason
/// yield `None`. `[DONE]` counts as finished.
fn parse_sse_line(line: &str) -> Option<Result<WireChunk>> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(Ok(WireChunk::finished(None)));
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let choice = chunk.choices.into_iter().next()?;
            let content = choice
                .delta
                .and_then(|delta| delta.content)
                .filter(|content| !content.is_empty());
            let done = choice.finish_reason.is_some();
            (content.is_some() || done).then(|| {
                Ok(WireChunk {
                    content,
                    done,
                    stop_reason: choice.finish_reason,
                })
            })
        }
        Err(_) => match serde_json::from_str::<ErrorEnvelope>(data) {
            Ok(error) => Some(Err(ColloquyError::Stream(error.error.message))),
            Err(e) => Some(Err(ColloquyError::Stream(format!(
                "Failed to parse stream chunk: {}",
                e
            )))),
        },
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn availability(&self) -> Availability {
        let url = format!("{}/models", self.base_url);
        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(response) if response.status().is_success() => Availability::Available,
            Ok(response) => Availability::Unavailable(format!(
                "OpenAI API returned {}",
                response.status()
            )),
            Err(e) => Availability::Unavailable(format!("OpenAI API unreachable: {}", e)),
        }
    }

    async fn stream_text(&self, request: &LLMRequest) -> Result<TextStream> {
        self.open_stream(&self.chat_request(request)).await
    }

    async fn stream_structured(
        &self,
        request: &LLMRequest,
        schema: &Value,
    ) -> Result<StructuredStream> {
        let mut body = self.chat_request(&request.with_schema_instructions(schema));
        body.response_format = Some(serde_json::json!({ "type": "json_object" }));

        let text = self.open_stream(&body).await?;
        Ok(structured_snapshots(text))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai".to_string(),
            model_name: self.model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(chunks: &[&str]) -> String {
        let mut body = String::new();
        for chunk in chunks {
            let event = json!({"choices": [{"delta": {"content": chunk}}]});
            body.push_str(&format!("data: {}\n\n", event));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn test_openai_provider_creation() {
        let provider = OpenAIProvider::new("test-key", "gpt-4o");
        assert_eq!(provider.model(), "gpt-4o");
        assert_eq!(provider.base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_openai_provider_custom_base_url() {
        let provider =
            OpenAIProvider::with_base_url("test-key", "gpt-4", "https://custom.openai.azure.com/");
        assert_eq!(provider.base_url(), "https://custom.openai.azure.com");
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(
            parse_sse_line("data: [DONE]").unwrap().unwrap(),
            WireChunk::finished(None)
        );
        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line("").is_none());
        assert!(parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).is_none());
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#)
                .unwrap()
                .unwrap(),
            WireChunk::delta("Hi")
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{},"finish_reason":"length"}]}"#)
                .unwrap()
                .unwrap(),
            WireChunk::finished(Some("length".into()))
        );
        assert!(matches!(
            parse_sse_line(r#"data: {"error":{"message":"overloaded","type":"server_error"}}"#),
            Some(Err(ColloquyError::Stream(msg))) if msg == "overloaded"
        ));
    }

    #[test]
    fn test_chat_request_shape() {
        let provider = OpenAIProvider::new("k", "m");
        let body = provider.chat_request(&LLMRequest::with_system_prompt("sys", "hello"));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "m",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hello"}
                ],
                "stream": true
            })
        );
    }

    #[tokio::test]
    async fn test_availability() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::with_base_url("test-key", "gpt-4o", server.uri());
        assert_eq!(provider.availability().await, Availability::Available);

        let provider = OpenAIProvider::with_base_url("wrong-key", "gpt-4o", server.uri());
        assert!(!provider.availability().await.is_available());
    }

    #[tokio::test]
    async fn test_stream_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse(&["Hel", "lo", "!"])),
            )
            .mount(&server)
            .await;

        let provider = OpenAIProvider::with_base_url("test-key", "gpt-4o", server.uri());
        let stream = provider
            .stream_text(&LLMRequest::from_prompt("Say hello"))
            .await
            .unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["Hel", "lo", "!"]);
    }

    #[tokio::test]
    async fn test_stream_structured_requests_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(
                json!({"response_format": {"type": "json_object"}}),
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse(&[
                        "{\"role\": \"assistant\", ",
                        "\"content\": \"Hi",
                        " there\"}",
                    ])),
            )
            .mount(&server)
            .await;

        let provider = OpenAIProvider::with_base_url("test-key", "gpt-4o", server.uri());
        let stream = provider
            .stream_structured(&LLMRequest::from_prompt("Greet"), &json!({"type": "object"}))
            .await
            .unwrap();
        let snapshots: Vec<Value> = stream.map(|s| s.unwrap()).collect().await;
        assert_eq!(
            snapshots.last().unwrap(),
            &json!({"role": "assistant", "content": "Hi there"})
        );
    }

    #[tokio::test]
    async fn test_error_status_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached", "type": "rate_limit_error"}
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::with_base_url("test-key", "gpt-4o", server.uri());
        let result = provider.stream_text(&LLMRequest::from_prompt("hi")).await;
        match result {
            Err(ColloquyError::Backend(msg)) => {
                assert!(msg.contains("rate_limit_error"));
                assert!(msg.contains("Rate limit reached"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_length_finish_is_truncation() {
        let server = MockServer::start().await;
        let body = format!(
            "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
            json!({"choices": [{"delta": {"content": "The three steps are: first"}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "length"}]}),
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let provider = OpenAIProvider::with_base_url("test-key", "gpt-4o", server.uri());
        let stream = provider
            .stream_text(&LLMRequest::from_prompt("List the steps"))
            .await
            .unwrap();
        let items: Vec<Result<String>> = stream.collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "The three steps are: first");
        assert!(matches!(&items[1], Err(ColloquyError::Truncated(_))));
    }

    #[tokio::test]
    async fn test_missing_done_is_truncation() {
        let server = MockServer::start().await;
        let body = format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": "partial"}}]})
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::with_base_url("test-key", "gpt-4o", server.uri());
        let stream = provider
            .stream_text(&LLMRequest::from_prompt("hi"))
            .await
            .unwrap();
        let items: Vec<Result<String>> = stream.collect().await;

        assert!(matches!(items.last(), Some(Err(ColloquyError::Truncated(_)))));
    }

    #[test]
    fn test_model_info() {
        let provider = OpenAIProvider::new("test-key", "gpt-4o-mini");
        let info = provider.model_info();
        assert_eq!(info.provider, "openai");
        assert_eq!(info.model_name, "gpt-4o-mini");
    }
}
