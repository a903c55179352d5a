//! Chat session engine
//!
//! [`ChatSessionEngine`] owns one conversation and drives every backend call
//! made for it. A turn runs in a fixed order: availability gate, context
//! selection, optional web page analysis, prompt construction, hard-limit
//! check, and only then the backend request.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{ColloquyConfig, SessionConfig};
use crate::context::{ContextEstimate, ContextSelector};
use crate::conversation::{Attachment, Conversation, Message, Role, SharedConversation};
use crate::error::{ColloquyError, Result};
use crate::events::{EventEmitter, EventSender};
use crate::llm::{Availability, LLMProvider, LLMRequest, ModelInfo};
use crate::prompt::PromptBuilder;
use crate::streaming::{ResponseStream, SummaryStream, SummaryUpdater};
use crate::tools::{detect_url, HttpWebAnalyser, ToolInvoker, WebAnalyser, WebPageMetadata};

/// Orchestrates one conversation against one backend
pub struct ChatSessionEngine {
    backend: Arc<dyn LLMProvider>,
    conversation: SharedConversation,
    selector: ContextSelector,
    prompts: PromptBuilder,
    tools: Option<ToolInvoker>,
    summaries: SummaryUpdater,
    events: EventEmitter,
    session: SessionConfig,
}

impl ChatSessionEngine {
    /// Create a new engine builder
    pub fn builder() -> ChatSessionEngineBuilder {
        ChatSessionEngineBuilder::new()
    }

    /// Warm the backend up in the background.
    ///
    /// Returns immediately. Failures are logged and otherwise ignored; outside
    /// a tokio runtime this does nothing.
    pub fn prewarm(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No tokio runtime, skipping backend prewarm");
            return;
        };

        let backend = self.backend.clone();
        handle.spawn(async move {
            match backend.prewarm().await {
                Ok(()) => tracing::debug!("Backend prewarmed"),
                Err(e) => tracing::debug!("Backend prewarm failed: {}", e),
            }
        });
    }

    /// Start generating the assistant's reply to the conversation.
    ///
    /// Returns `Ok(None)` when the backend is unavailable, before any prompt
    /// is built or tool is called.
    ///
    /// # Errors
    ///
    /// [`ColloquyError::ContextOverflow`] if the rendered prompt exceeds the
    /// hard token limit, or the backend's error if the request is rejected.
    pub async fn respond_to(&self) -> Result<Option<ResponseStream>> {
        if !self.gate().await {
            return Ok(None);
        }

        let snapshot = self.snapshot().await;
        let estimate = self.selector.select(&snapshot);

        let candidate = match snapshot.last_message() {
            Some(last) if last.role() == Role::User => self.fetch_attachment(last).await,
            _ => None,
        };

        let prompt = self
            .prompts
            .build_response_prompt(estimate.mode, &snapshot, candidate.as_ref());
        let prompt_tokens = self.selector.check_prompt(&prompt)?;
        let schema = self.prompts.message_schema(candidate.is_some());

        tracing::info!(
            mode = %estimate.mode,
            tokens = estimate.estimated_token_count,
            prompt_tokens,
            attachment = candidate.is_some(),
            "Requesting response"
        );
        self.events
            .generation_started("response", estimate.mode, prompt_tokens)
            .await;

        let inner = self
            .backend
            .stream_structured(&self.request(prompt), &schema)
            .await?;

        Ok(Some(ResponseStream::new(
            inner,
            candidate.map(Attachment::from),
            self.conversation.clone(),
            self.events.clone(),
            estimate.mode,
        )))
    }

    /// Start generating a new running summary.
    ///
    /// Returns `Ok(None)` when the backend is unavailable.
    pub async fn summarize(&self) -> Result<Option<SummaryStream>> {
        if !self.gate().await {
            return Ok(None);
        }

        let estimate = self.context_estimate().await;
        let stream = self
            .summaries
            .update(estimate.mode, &self.conversation, self.events.clone())
            .await?;
        Ok(Some(stream))
    }

    /// Append a message authored outside the backend
    pub async fn send_message(
        &self,
        role: Role,
        content: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> Message {
        let appended = {
            let mut conversation = self.conversation.write().await;
            conversation
                .append(Message::new(role, content, attachment))
                .clone()
        };

        tracing::debug!(role = %role, message_id = %appended.id(), "Message appended");
        self.events
            .message_appended(appended.id(), appended.role())
            .await;
        appended
    }

    /// Append a system message
    pub async fn inject_system_message(&self, content: impl Into<String>) -> Message {
        self.send_message(Role::System, content, None).await
    }

    /// Append an assistant message with a preview of `url`.
    ///
    /// The attachment is set only when the page is fetched successfully.
    /// An invalid URL or a failed fetch still appends the message, without
    /// an attachment.
    pub async fn respond_with_web_page_analysis(
        &self,
        content: impl Into<String>,
        url: &str,
    ) -> Message {
        let attachment = match (&self.tools, url::Url::parse(url)) {
            (Some(invoker), Ok(url)) => {
                self.events
                    .tool_call_started(invoker.analyser_name(), url.as_str())
                    .await;
                let started = Instant::now();
                let result = invoker.analyse(&url).await;
                self.events
                    .tool_call_completed(
                        invoker.analyser_name(),
                        result.is_ok(),
                        started.elapsed(),
                    )
                    .await;

                match result {
                    Ok(meta) => Some(Attachment::from(meta)),
                    Err(e) => {
                        tracing::warn!(url = %url, "Web page analysis failed: {}", e);
                        None
                    }
                }
            }
            (None, _) => {
                tracing::debug!("Web analysis disabled, sending without attachment");
                None
            }
            (_, Err(e)) => {
                tracing::warn!(url, "Not a valid URL: {}", e);
                None
            }
        };

        self.send_message(Role::Assistant, content, attachment).await
    }

    /// Current size estimate and the mode the next call would use
    pub async fn context_estimate(&self) -> ContextEstimate {
        let conversation = self.conversation.read().await;
        self.selector.select(&conversation)
    }

    /// Shared handle to the conversation
    pub fn conversation(&self) -> SharedConversation {
        self.conversation.clone()
    }

    /// Consistent copy of the conversation
    pub async fn snapshot(&self) -> Conversation {
        self.conversation.read().await.clone()
    }

    pub async fn availability(&self) -> Availability {
        self.backend.availability().await
    }

    pub fn model_info(&self) -> ModelInfo {
        self.backend.model_info()
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    async fn gate(&self) -> bool {
        match self.backend.availability().await {
            Availability::Available => true,
            Availability::Unavailable(reason) => {
                tracing::info!(reason = %reason, "Backend unavailable, skipping generation");
                self.events.backend_unavailable(&reason).await;
                false
            }
        }
    }

    async fn fetch_attachment(&self, message: &Message) -> Option<WebPageMetadata> {
        let invoker = self.tools.as_ref()?;
        let url = detect_url(message.content())?;

        self.events
            .tool_call_started(invoker.analyser_name(), url.as_str())
            .await;
        let started = Instant::now();
        let result = invoker.maybe_invoke(message).await;
        self.events
            .tool_call_completed(
                invoker.analyser_name(),
                result.is_some(),
                started.elapsed(),
            )
            .await;
        result
    }

    fn request(&self, prompt: String) -> LLMRequest {
        LLMRequest {
            system_prompt: Some(self.prompts.system_instructions().to_string()),
            prompt,
            temperature: self.session.temperature,
            max_tokens: self.session.max_response_tokens,
        }
    }
}

impl std::fmt::Debug for ChatSessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSessionEngine")
            .field("backend", &self.backend.model_info())
            .field("selector", &self.selector)
            .field("tools", &self.tools.is_some())
            .finish()
    }
}

/// Builder for [`ChatSessionEngine`]
pub struct ChatSessionEngineBuilder {
    backend: Option<Arc<dyn LLMProvider>>,
    web_analyser: Option<Arc<dyn WebAnalyser>>,
    conversation: Option<SharedConversation>,
    config: ColloquyConfig,
    event_sender: Option<EventSender>,
}

impl ChatSessionEngineBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            web_analyser: None,
            conversation: None,
            config: ColloquyConfig::default(),
            event_sender: None,
        }
    }

    /// Set the generative backend (required)
    pub fn backend(mut self, backend: Arc<dyn LLMProvider>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the web analyser. Without one, an HTTP analyser is built from the
    /// tool configuration.
    pub fn web_analyser(mut self, analyser: Arc<dyn WebAnalyser>) -> Self {
        self.web_analyser = Some(analyser);
        self
    }

    /// Continue an existing conversation
    pub fn conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = Some(conversation.into_shared());
        self
    }

    /// Use a conversation handle shared with other readers
    pub fn shared_conversation(mut self, conversation: SharedConversation) -> Self {
        self.conversation = Some(conversation);
        self
    }

    pub fn config(mut self, config: ColloquyConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribe to session events
    pub fn event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    /// Build the engine
    ///
    /// # Errors
    ///
    /// Returns an error if no backend was set, the configuration is invalid,
    /// or the HTTP analyser cannot be created.
    pub async fn build(self) -> Result<ChatSessionEngine> {
        let backend = self.backend.ok_or_else(|| {
            ColloquyError::Configuration("ChatSessionEngine requires a backend".to_string())
        })?;
        self.config.validate()?;

        let ColloquyConfig {
            context,
            session,
            tools: tool_config,
            ..
        } = self.config;

        let tools = if tool_config.web_analysis {
            let analyser: Arc<dyn WebAnalyser> = match self.web_analyser {
                Some(analyser) => analyser,
                None => Arc::new(
                    HttpWebAnalyser::new(tool_config.timeout, tool_config.user_agent.clone())
                        .map_err(|e| ColloquyError::Configuration(e.to_string()))?,
                ),
            };
            Some(ToolInvoker::new(analyser, tool_config.timeout))
        } else {
            None
        };

        let conversation = self
            .conversation
            .unwrap_or_else(|| Conversation::new().into_shared());
        let conversation_id = conversation.read().await.id();

        let selector = ContextSelector::new(&context);
        let prompts = match &session.system_instructions {
            Some(instructions) => PromptBuilder::new().with_system_instructions(instructions.clone()),
            None => PromptBuilder::new(),
        };
        let summaries = SummaryUpdater::new(backend.clone(), prompts.clone(), selector.clone())
            .with_generation_options(session.temperature, session.max_response_tokens);

        let engine = ChatSessionEngine {
            backend,
            conversation,
            selector,
            prompts,
            tools,
            summaries,
            events: EventEmitter::new(self.event_sender, conversation_id),
            session,
        };

        tracing::info!(
            conversation_id = %conversation_id,
            model = %engine.backend.model_info().model_name,
            web_analysis = engine.tools.is_some(),
            "Chat session engine ready"
        );

        if engine.session.prewarm {
            engine.prewarm();
        }
        Ok(engine)
    }
}

impl Default for ChatSessionEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::ScriptedProvider;
    use crate::tools::StaticWebAnalyser;
    use serde_json::json;

    async fn engine(provider: Arc<ScriptedProvider>) -> ChatSessionEngine {
        ChatSessionEngine::builder()
            .backend(provider)
            .web_analyser(Arc::new(StaticWebAnalyser::new()))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_requires_backend() {
        let result = ChatSessionEngine::builder().build().await;
        assert!(matches!(result, Err(ColloquyError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_send_and_inject_messages() {
        let engine = engine(Arc::new(ScriptedProvider::new())).await;

        engine.send_message(Role::User, "Hi", None).await;
        engine.inject_system_message("Be concise.").await;

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.messages()[1].role(), Role::System);
        assert!(snapshot.messages()[1].attachment().is_none());
    }

    #[tokio::test]
    async fn test_prewarm_runs_in_background() {
        let provider = Arc::new(ScriptedProvider::new());
        let engine = engine(provider.clone()).await;

        engine.prewarm();
        // The builder prewarms once as well
        for _ in 0..10 {
            if provider.prewarm_count() >= 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(provider.prewarm_count(), 2);
    }

    #[tokio::test]
    async fn test_respond_to_appends_on_finish() {
        let provider = Arc::new(ScriptedProvider::new().with_structured_response(vec![
            json!({"role": "assistant"}),
            json!({"role": "assistant", "content": "Hello!"}),
        ]));
        let engine = engine(provider.clone()).await;
        engine.send_message(Role::User, "Hi", None).await;

        let stream = engine.respond_to().await.unwrap().unwrap();
        let message = stream.finish().await.unwrap();

        assert_eq!(message.content(), "Hello!");
        assert_eq!(engine.snapshot().await.len(), 2);

        let request = &provider.requests()[0].request;
        assert!(request.prompt.contains("Role: user\nContent: Hi"));
        assert!(request
            .system_prompt
            .as_deref()
            .is_some_and(|s| s.starts_with("You're a helpful chatbot.")));
    }

    #[tokio::test]
    async fn test_overflowing_prompt_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new());
        let mut config = ColloquyConfig::default();
        config.context = config.context.with_max_tokens(40).with_safe_token_limit(20);

        let engine = ChatSessionEngine::builder()
            .backend(provider.clone())
            .web_analyser(Arc::new(StaticWebAnalyser::new()))
            .config(config)
            .build()
            .await
            .unwrap();
        engine
            .send_message(Role::User, vec!["word"; 60].join(" "), None)
            .await;

        assert!(matches!(
            engine.respond_to().await,
            Err(ColloquyError::ContextOverflow { limit: 40, .. })
        ));
        assert_eq!(provider.request_count(), 0);
    }
}
