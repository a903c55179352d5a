//! Ollama provider (local models over `/api/chat`)

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

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "qwen3:14b";

/// Ollama LLM provider (local, free, runs on your machine).
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider.
    ///
    /// # Arguments
    ///
    /// * `model` - Model name (e.g., "qwen3:14b")
    /// * `base_url` - Base URL for Ollama API (defaults to "http://localhost:11434")
    pub fn new(model: impl Into<String>, base_url: Option<impl Into<String>>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            base_url: base_url
                .map(|u| u.into())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    /// Create from environment variables.
    ///
    /// Reads from:
    /// - `OLLAMA_MODEL` - Model name (optional, defaults to "qwen3:14b")
    /// - `OLLAMA_BASE_URL` - Base URL (optional, defaults to "http://localhost:11434")
    pub fn from_env(model: Option<impl Into<String>>) -> Self {
        let model = model
            .map(|m| m.into())
            .or_else(|| std::env::var("OLLAMA_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url = std::env::var("OLLAMA_BASE_URL").ok();

        Self::new(model, base_url)
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn open_stream(&self, body: &ChatRequest) -> Result<TextStream> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            ColloquyError::Backend(format!(
                "Failed to send request to Ollama: {}. Make sure Ollama is running.",
                e
            ))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ColloquyError::Backend(format!(
                "Ollama API error ({}): {}",
                status, text
            )));
        }

        let reader = tokio_util::io::StreamReader::new(
            response
                .bytes_stream()
                .map(|r| r.map_err(std::io::Error::other)),
        );
        let lines = LinesStream::new(tokio::io::BufReader::new(reader).lines());

        // One JSON object per line; the last one carries `done: true`
        let chunks = lines
            .map(|line| match line {
                Ok(line) => parse_ndjson_line(&line),
                Err(e) => Some(Err(ColloquyError::Stream(format!(
                    "Stream read error: {}",
                    e
                )))),
            })
            .filter_map(|item| item);

        Ok(completion_checked(chunks))
    }

    fn chat_request(&self, request: &LLMRequest, format: Option<Value>) -> ChatRequest {
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

        let options = (request.temperature.is_some() || request.max_tokens.is_some()).then(|| {
            ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            }
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            format,
            options,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

fn parse_ndjson_line(line: &str) -> Option<Result<WireChunk>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<ChatChunk>(line) {
        Ok(ChatChunk {
            error: Some(error), ..
        }) => Some(Err(ColloquyError::Stream(error))),
        Ok(chunk) => {
            let content = chunk
                .message
                .map(|m| m.content)
                .filter(|content| !content.is_empty());
            (content.is_some() || chunk.done).then(|| {
                Ok(WireChunk {
                    content,
                    done: chunk.done,
                    stop_reason: chunk.done_reason,
                })
            })
        }
        Err(e) => Some(Err(ColloquyError::Stream(format!(
            "Failed to parse stream chunk: {}",
            e
        )))),
    }
}

/// Whether a local tag names the configured model (`llama3` matches `llama3:latest`)
fn tag_matches(tag: &str, model: &str) -> bool {
    tag == model || (!model.contains(':') && tag.strip_suffix(":latest") == Some(model))
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn availability(&self) -> Availability {
        let url = format!("{}/api/tags", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                return Availability::Unavailable(format!(
                    "Ollama returned {}",
                    response.status()
                ));
            }
            Err(e) => return Availability::Unavailable(format!("Ollama unreachable: {}", e)),
        };

        match response.json::<TagsResponse>().await {
            Ok(tags) if tags.models.iter().any(|t| tag_matches(&t.name, &self.model)) => {
                Availability::Available
            }
            Ok(_) => Availability::Unavailable(format!(
                "model '{}' has not been pulled",
                self.model
            )),
            Err(e) => Availability::Unavailable(format!("Invalid Ollama tags response: {}", e)),
        }
    }

    /// Loads the model into memory by sending a request with no prompt
    async fn prewarm(&self) -> Result<()> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({ "model": self.model });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ColloquyError::Backend(format!("Ollama prewarm failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ColloquyError::Backend(format!(
                "Ollama prewarm failed ({})",
                response.status()
            )));
        }
        Ok(())
    }

    async fn stream_text(&self, request: &LLMRequest) -> Result<TextStream> {
        self.open_stream(&self.chat_request(request, None)).await
    }

    /// Uses Ollama's structured outputs: the schema goes in `format`
    async fn stream_structured(
        &self,
        request: &LLMRequest,
        schema: &Value,
    ) -> Result<StructuredStream> {
        let body = self.chat_request(&request.with_schema_instructions(schema), Some(schema.clone()));
        let text = self.open_stream(&body).await?;
        Ok(structured_snapshots(text))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "ollama".to_string(),
            model_name: self.model.clone(),
        }
    }
}
