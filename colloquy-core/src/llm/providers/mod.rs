//! LLM provider implementations

#[cfg(feature = "llm-ollama")]
pub mod ollama;

#[cfg(feature = "llm-ollama")]
pub use ollama::OllamaProvider;

#[cfg(feature = "llm-openai")]
pub mod openai;

#[cfg(feature = "llm-openai")]
pub use openai::OpenAIProvider;

pub mod scripted;

pub use scripted::{RecordedRequest, RequestKind, ScriptedProvider};
