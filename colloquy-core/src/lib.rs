//! # Colloquy - Bounded-context conversational sessions
//!
//! Colloquy manages one conversation with a streaming language-model backend
//! whose context window is bounded:
//! - Word-based token estimation and full-history vs. summary context selection
//! - Prompt construction for response and summary tasks
//! - Web page analysis folded into responses as attachments
//! - Streaming assembly of structured output into finalized messages
//! - A running, topic-first conversation summary
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colloquy_core::prelude::*;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let backend = LLMProviderFactory::create(&LLMProviderConfig {
//!         provider: ProviderKind::Ollama,
//!         model: "qwen3:14b".to_string(),
//!         api_key: None,
//!         base_url: None,
//!     })?;
//!
//!     let engine = ChatSessionEngine::builder()
//!         .backend(backend)
//!         .build()
//!         .await?;
//!
//!     engine.send_message(Role::User, "What is https://www.rust-lang.org ?", None).await;
//!
//!     if let Some(mut stream) = engine.respond_to().await? {
//!         while let Some(snapshot) = stream.next().await {
//!             println!("{}", snapshot.content.unwrap_or_default());
//!         }
//!         stream.finish().await?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `llm-openai`: OpenAI-compatible chat completions backend (default)
//! - `llm-ollama`: Ollama backend (default)

pub mod config;
pub mod context;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod events;
pub mod llm;
pub mod parsing;
pub mod prompt;
pub mod streaming;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        ColloquyConfig, LLMProviderConfig, ProviderKind, SessionConfig, StoreBackend,
        StoreConfig, ToolConfig,
    };
    pub use crate::context::{
        ContextConfig, ContextEstimate, ContextMode, ContextSelector, TokenBudgetEstimator,
        TokenEstimate,
    };
    pub use crate::conversation::{
        Attachment, Conversation, ConversationStore, InMemoryConversationStore,
        JsonFileConversationStore, Message, Role, SharedConversation,
    };
    pub use crate::engine::{ChatSessionEngine, ChatSessionEngineBuilder};
    pub use crate::error::{ColloquyError, Result};
    pub use crate::events::{event_channel, EventReceiver, EventSender, SessionEvent};
    pub use crate::llm::{Availability, LLMProvider, LLMProviderFactory, LLMRequest, ModelInfo};
    pub use crate::parsing::{JsonParser, ParseError};
    pub use crate::prompt::PromptBuilder;
    pub use crate::streaming::{
        FinalizationFailure, PartialAssembly, PartialAttachment, PartialMessage, ResponseStream,
        SummaryStream,
    };
    pub use crate::tools::{
        detect_url, HttpWebAnalyser, StaticWebAnalyser, ToolError, ToolInvoker, WebAnalyser,
        WebPageMetadata,
    };
}
