//! Prompt construction for responses and summaries
//!
//! Every backend call is rendered from the conversation by [`PromptBuilder`].
//! Which material goes in depends on the [`ContextMode`] chosen for the turn:
//! full mode embeds the canonical history, summary mode embeds only the running
//! summary and the latest message.

use serde_json::{json, Value};

use crate::context::ContextMode;
use crate::conversation::Conversation;
use crate::tools::WebPageMetadata;

/// Stand-in when summary mode runs before any summary exists
pub const NO_SUMMARY: &str = "No summary available";

/// Stand-in when the conversation has no messages
pub const NO_MESSAGE: &str = "No message available";

const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "You're a helpful chatbot. The user will send you messages, and you'll respond to them.\n\
Be short, it's a chat application.\n\
You can also summarize the conversation when asked to.\n\
Each message will have a role, either user, assistant or system for initial conversation configuration.";

const RESPOND_INSTRUCTION: &str = "Respond with the assistant role to the user last message.";

const TOPIC_FIRST: &str = "Start directly with the topic itself.";

const NO_META_PREFIX: &str = "DO NOT start with phrases like \"The conversation is about\" or \"The discussion covers\".";

/// Renders backend prompts. Pure: the same inputs always give the same text.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_instructions: String,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
        }
    }

    /// Replace the session-level instructions
    pub fn with_system_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.system_instructions = instructions.into();
        self
    }

    /// Instructions sent as the system message of every request
    pub fn system_instructions(&self) -> &str {
        &self.system_instructions
    }

    /// Prompt asking for the assistant's next message.
    ///
    /// `tool_result` is the web analyser's output for the latest user message.
    /// When present the model is asked to echo it as the `attachment` object;
    /// when absent the model is told not to emit one.
    pub fn build_response_prompt(
        &self,
        mode: ContextMode,
        conversation: &Conversation,
        tool_result: Option<&WebPageMetadata>,
    ) -> String {
        let context = match mode {
            ContextMode::Full => format!(
                "Here is the conversation history:\n{}",
                conversation.canonical_history()
            ),
            ContextMode::Summary => format!(
                "Here is the conversation summary:\n{}\nAnd the last message from the user:\n{}",
                conversation.summary().unwrap_or(NO_SUMMARY),
                last_content(conversation)
            ),
        };

        format!(
            "{}\n{}\n{}",
            context,
            RESPOND_INSTRUCTION,
            attachment_instructions(tool_result)
        )
    }

    /// Prompt asking for a new running summary.
    ///
    /// Full mode summarises the whole history from scratch. Summary mode
    /// merges the latest message into the previous summary.
    pub fn build_summary_prompt(&self, mode: ContextMode, conversation: &Conversation) -> String {
        match mode {
            ContextMode::Full => format!(
                "Write a 1-2 sentence summary of what was discussed.\n\
                 {TOPIC_FIRST}\n\
                 Example: \"Swift programming techniques and best practices for error handling.\"\n\
                 {NO_META_PREFIX}\n\
                 \n\
                 Conversation to summarize:\n\
                 {}",
                conversation.canonical_history()
            ),
            ContextMode::Summary => format!(
                "Update the summary to include new information, keeping it to 1-2 sentences.\n\
                 {TOPIC_FIRST}\n\
                 {NO_META_PREFIX}\n\
                 \n\
                 Previous summary:\n\
                 {}\n\
                 \n\
                 Latest message:\n\
                 {}",
                conversation.summary().unwrap_or(NO_SUMMARY),
                last_content(conversation)
            ),
        }
    }

    /// JSON schema of the structured message the backend must produce
    pub fn message_schema(&self, with_attachment: bool) -> Value {
        let mut properties = json!({
            "role": {
                "type": "string",
                "enum": ["user", "assistant", "system"]
            },
            "content": {
                "type": "string",
                "description": "The message text"
            }
        });

        if with_attachment {
            properties["attachment"] = json!({
                "type": "object",
                "description": "Metadata of the web page the user linked",
                "properties": {
                    "title": {"type": "string"},
                    "description": {"type": "string"},
                    "thumbnail": {"type": "string"}
                },
                "required": ["title", "description", "thumbnail"]
            });
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": ["role", "content"]
        })
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn last_content(conversation: &Conversation) -> &str {
    conversation
        .last_message()
        .map(|m| m.content())
        .unwrap_or(NO_MESSAGE)
}

fn attachment_instructions(tool_result: Option<&WebPageMetadata>) -> String {
    match tool_result {
        Some(meta) => format!(
            "The user's message links to a web page that has already been analysed:\n\
             Title: {}\n\
             Description: {}\n\
             Thumbnail: {}\n\
             Add an \"attachment\" object to the message with exactly these title, description and thumbnail values.",
            meta.title, meta.description, meta.thumbnail
        ),
        None => "Don't include an \"attachment\" property in the response.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Message, Role};

    fn conversation() -> Conversation {
        let mut conversation = Conversation::new();
        conversation.append(Message::new(Role::User, "Hi", None));
        conversation.append(Message::new(Role::Assistant, "Hello! How can I help?", None));
        conversation.append(Message::new(Role::User, "Tell me about Rust", None));
        conversation
    }

    fn metadata() -> WebPageMetadata {
        WebPageMetadata {
            title: "Rust".into(),
            thumbnail: "https://www.rust-lang.org/static/images/rust-logo-blk.svg".into(),
            description: "A language empowering everyone".into(),
        }
    }

    #[test]
    fn test_full_response_prompt_embeds_history() {
        let builder = PromptBuilder::new();
        let prompt = builder.build_response_prompt(ContextMode::Full, &conversation(), None);

        assert!(prompt.starts_with(
            "Here is the conversation history:\nRole: user\nContent: Hi\n\nRole: assistant\n"
        ));
        assert!(prompt.contains("Content: Tell me about Rust\nRespond with the assistant role"));
        assert!(prompt.ends_with("Don't include an \"attachment\" property in the response."));
    }

    #[test]
    fn test_summary_response_prompt_uses_summary_and_last_message() {
        let builder = PromptBuilder::new();
        let mut conversation = conversation();
        conversation.replace_summary("Greetings and an introduction to Rust.");

        let prompt = builder.build_response_prompt(ContextMode::Summary, &conversation, None);
        assert!(prompt.contains(
            "Here is the conversation summary:\nGreetings and an introduction to Rust.\n\
             And the last message from the user:\nTell me about Rust\n"
        ));
        assert!(!prompt.contains("Role: assistant"));
    }

    #[test]
    fn test_summary_mode_sentinels() {
        let builder = PromptBuilder::new();
        let empty = Conversation::new();

        let prompt = builder.build_response_prompt(ContextMode::Summary, &empty, None);
        assert!(prompt.contains(NO_SUMMARY));
        assert!(prompt.contains(NO_MESSAGE));

        let prompt = builder.build_summary_prompt(ContextMode::Summary, &empty);
        assert!(prompt.contains("Previous summary:\nNo summary available\n\nLatest message:\nNo message available"));
    }

    #[test]
    fn test_tool_result_is_listed() {
        let builder = PromptBuilder::new();
        let meta = metadata();
        let prompt = builder.build_response_prompt(ContextMode::Full, &conversation(), Some(&meta));

        assert!(prompt.contains("Title: Rust\n"));
        assert!(prompt.contains("Description: A language empowering everyone\n"));
        assert!(prompt.contains("Thumbnail: https://www.rust-lang.org/static/images/rust-logo-blk.svg\n"));
        assert!(prompt.contains("\"attachment\" object"));
        assert!(!prompt.contains("Don't include"));
    }

    #[test]
    fn test_full_summary_prompt() {
        let builder = PromptBuilder::new();
        let prompt = builder.build_summary_prompt(ContextMode::Full, &conversation());

        assert!(prompt.starts_with("Write a 1-2 sentence summary of what was discussed.\n"));
        assert!(prompt.contains(
            "Example: \"Swift programming techniques and best practices for error handling.\""
        ));
        assert!(prompt.contains("DO NOT start with phrases like \"The conversation is about\""));
        assert!(prompt.contains("Conversation to summarize:\nRole: user\nContent: Hi"));
    }

    #[test]
    fn test_incremental_summary_prompt() {
        let builder = PromptBuilder::new();
        let mut conversation = conversation();
        conversation.replace_summary("Greetings.");

        let prompt = builder.build_summary_prompt(ContextMode::Summary, &conversation);
        assert!(prompt.starts_with("Update the summary to include new information"));
        assert!(prompt.contains("Previous summary:\nGreetings.\n\nLatest message:\nTell me about Rust"));
        assert!(!prompt.contains("Conversation to summarize"));
    }

    #[test]
    fn test_prompts_are_deterministic() {
        let builder = PromptBuilder::new();
        let conversation = conversation();
        assert_eq!(
            builder.build_response_prompt(ContextMode::Full, &conversation, None),
            builder.build_response_prompt(ContextMode::Full, &conversation, None)
        );
    }

    #[test]
    fn test_message_schema() {
        let builder = PromptBuilder::new();
        let plain = builder.message_schema(false);
        assert!(plain["properties"].get("attachment").is_none());
        assert_eq!(plain["required"], json!(["role", "content"]));

        let with_attachment = builder.message_schema(true);
        assert_eq!(
            with_attachment["properties"]["attachment"]["required"],
            json!(["title", "description", "thumbnail"])
        );
    }

    #[test]
    fn test_custom_system_instructions() {
        let builder = PromptBuilder::new().with_system_instructions("Answer in French.");
        assert_eq!(builder.system_instructions(), "Answer in French.");
        assert!(PromptBuilder::new()
            .system_instructions()
            .starts_with("You're a helpful chatbot."));
    }
}
