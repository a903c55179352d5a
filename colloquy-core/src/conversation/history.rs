//! Conversation record and canonical history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::message::Message;

/// Conversation guarded by its per-conversation critical section.
///
/// The engine is the only writer; display code takes read locks.
pub type SharedConversation = Arc<RwLock<Conversation>>;

/// An append-only message log plus a rolling summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: Uuid,
    created_at: DateTime<Utc>,
    messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            messages: Vec::new(),
            summary: None,
        }
    }

    /// Create a conversation with an existing summary
    pub fn with_summary(summary: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.summary = Some(summary.into());
        conversation
    }

    /// Wrap into a shared handle
    pub fn into_shared(self) -> SharedConversation {
        Arc::new(RwLock::new(self))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Messages in insertion order (which is also timestamp order)
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Timestamp of the most recent message, or creation time when empty
    pub fn last_message_timestamp(&self) -> DateTime<Utc> {
        self.messages
            .last()
            .map(|m| m.timestamp())
            .unwrap_or(self.created_at)
    }

    /// Append a message, keeping timestamps non-decreasing.
    ///
    /// Returns the message as stored.
    pub fn append(&mut self, message: Message) -> &Message {
        let message = match self.messages.last() {
            Some(last) => message.not_before(last.timestamp()),
            None => message,
        };
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Replace the summary in a single assignment
    pub fn replace_summary(&mut self, summary: impl Into<String>) {
        self.summary = Some(summary.into());
    }

    /// Deterministic serialization of all messages.
    ///
    /// Each message renders as `Role: <role>\nContent: <content>`; messages are
    /// separated by a blank line.
    pub fn canonical_history(&self) -> String {
        self.messages
            .iter()
            .map(Message::to_history_entry)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Serialize to JSON for persistence
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
