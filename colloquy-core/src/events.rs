//! Session Event Protocol
//!
//! The engine reports every change to its conversation, and the steps of each
//! turn, on an optional `tokio::sync::mpsc` channel. A presentation layer
//! subscribes instead of polling the conversation.
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy_core::events::{event_channel, SessionEvent};
//!
//! let (tx, mut rx) = event_channel(100);
//!
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         if let SessionEvent::MessageAppended { role, .. } = event {
//!             println!("new {} message", role);
//!         }
//!     }
//! });
//!
//! let engine = ChatSessionEngine::builder()
//!     .backend(provider)
//!     .event_sender(tx)
//!     .build()?;
//! ```
//!
//! Events are sent with back-pressure: a subscriber must keep draining its
//! receiver or the engine waits on a full channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::context::ContextMode;
use crate::conversation::Role;

/// Events emitted while a session runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A message was appended to the conversation
    MessageAppended {
        conversation_id: Uuid,
        message_id: Uuid,
        role: Role,
        timestamp: DateTime<Utc>,
    },

    /// The running summary was replaced
    SummaryUpdated {
        conversation_id: Uuid,
        summary: String,
        timestamp: DateTime<Utc>,
    },

    /// A backend request was issued
    GenerationStarted {
        conversation_id: Uuid,
        /// `response` or `summary`
        task: String,
        mode: ContextMode,
        /// Estimate of the rendered prompt
        prompt_tokens: usize,
        timestamp: DateTime<Utc>,
    },

    /// A generation operation was skipped because the backend is not ready
    BackendUnavailable {
        conversation_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The web analyser was called for a URL
    ToolCallStarted {
        conversation_id: Uuid,
        tool_name: String,
        url: String,
        timestamp: DateTime<Utc>,
    },

    /// The web analyser returned (or gave up)
    ToolCallCompleted {
        conversation_id: Uuid,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A stream was cancelled or dropped before it was finished
    StreamCancelled {
        conversation_id: Uuid,
        /// Snapshots delivered before cancellation
        snapshots: u64,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::MessageAppended { .. } => "message_appended",
            SessionEvent::SummaryUpdated { .. } => "summary_updated",
            SessionEvent::GenerationStarted { .. } => "generation_started",
            SessionEvent::BackendUnavailable { .. } => "backend_unavailable",
            SessionEvent::ToolCallStarted { .. } => "tool_call_started",
            SessionEvent::ToolCallCompleted { .. } => "tool_call_completed",
            SessionEvent::StreamCancelled { .. } => "stream_cancelled",
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        match self {
            SessionEvent::MessageAppended { conversation_id, .. }
            | SessionEvent::SummaryUpdated { conversation_id, .. }
            | SessionEvent::GenerationStarted { conversation_id, .. }
            | SessionEvent::BackendUnavailable { conversation_id, .. }
            | SessionEvent::ToolCallStarted { conversation_id, .. }
            | SessionEvent::ToolCallCompleted { conversation_id, .. }
            | SessionEvent::StreamCancelled { conversation_id, .. } => *conversation_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::MessageAppended { timestamp, .. }
            | SessionEvent::SummaryUpdated { timestamp, .. }
            | SessionEvent::GenerationStarted { timestamp, .. }
            | SessionEvent::BackendUnavailable { timestamp, .. }
            | SessionEvent::ToolCallStarted { timestamp, .. }
            | SessionEvent::ToolCallCompleted { timestamp, .. }
            | SessionEvent::StreamCancelled { timestamp, .. } => *timestamp,
        }
    }
}

/// Sender half of the session event channel
pub type EventSender = mpsc::Sender<SessionEvent>;

/// Receiver half of the session event channel
pub type EventReceiver = mpsc::Receiver<SessionEvent>;

/// Create a new event channel with the specified buffer size
pub fn event_channel(buffer_size: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(buffer_size)
}

/// Emits events for one conversation. A no-op without a sender.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: Option<EventSender>,
    conversation_id: Uuid,
}

impl EventEmitter {
    pub fn new(sender: Option<EventSender>, conversation_id: Uuid) -> Self {
        Self {
            sender,
            conversation_id,
        }
    }

    /// Emitter that drops every event
    pub fn disabled() -> Self {
        Self::new(None, Uuid::nil())
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    async fn send(&self, event: SessionEvent) {
        if let Some(sender) = &self.sender {
            // A closed receiver only means nobody is listening any more
            let _ = sender.send(event).await;
        }
    }

    pub async fn message_appended(&self, message_id: Uuid, role: Role) {
        self.send(SessionEvent::MessageAppended {
            conversation_id: self.conversation_id,
            message_id,
            role,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn summary_updated(&self, summary: &str) {
        self.send(SessionEvent::SummaryUpdated {
            conversation_id: self.conversation_id,
            summary: summary.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn generation_started(&self, task: &str, mode: ContextMode, prompt_tokens: usize) {
        self.send(SessionEvent::GenerationStarted {
            conversation_id: self.conversation_id,
            task: task.to_string(),
            mode,
            prompt_tokens,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn backend_unavailable(&self, reason: &str) {
        self.send(SessionEvent::BackendUnavailable {
            conversation_id: self.conversation_id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn tool_call_started(&self, tool_name: &str, url: &str) {
        self.send(SessionEvent::ToolCallStarted {
            conversation_id: self.conversation_id,
            tool_name: tool_name.to_string(),
            url: url.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Report a finished tool call; durations past `u64::MAX` ms saturate
    pub async fn tool_call_completed(&self, tool_name: &str, success: bool, elapsed: Duration) {
        self.send(SessionEvent::ToolCallCompleted {
            conversation_id: self.conversation_id,
            tool_name: tool_name.to_string(),
            success,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Report a cancelled stream without waiting; used from `Drop`
    pub fn stream_cancelled(&self, snapshots: u64) {
        if let Some(sender) = &self.sender {
            let event = SessionEvent::StreamCancelled {
                conversation_id: self.conversation_id,
                snapshots,
                timestamp: Utc::now(),
            };
            if sender.try_send(event).is_err() {
                tracing::debug!("Event channel full or closed, dropping stream_cancelled");
            }
        }
    }
}
