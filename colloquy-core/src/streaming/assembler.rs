//! Assembly of streamed structured increments into one message

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::conversation::{Attachment, Message, Role};

/// Why a finished stream could not become a message or summary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FinalizationFailure {
    #[error("stream ended without producing any output")]
    EmptyStream,

    #[error("terminal increment was malformed")]
    MalformedTerminal,

    #[error("final payload has no complete role")]
    MissingRole,

    #[error("final payload has no content")]
    MissingContent,

    /// Names the attachment fields that never arrived
    #[error("attachment is missing {0}")]
    IncompleteAttachment(String),

    #[error("summary is empty")]
    EmptySummary,

    /// The backend stopped before its output was complete
    #[error("output was truncated: {0}")]
    Truncated(String),
}

/// Attachment as seen mid-stream; fields fill in as the model emits them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartialAttachment {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
}

impl PartialAttachment {
    /// Field names still absent
    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.is_none() {
            missing.push("title");
        }
        if self.description.is_none() {
            missing.push("description");
        }
        if self.thumbnail.is_none() {
            missing.push("thumbnail");
        }
        missing
    }
}

/// Live snapshot of the message being generated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialMessage {
    /// Position among accepted snapshots, starting at 0
    pub sequence: u64,
    pub role: Option<Role>,
    pub content: Option<String>,
    pub attachment: Option<PartialAttachment>,
}

/// Per-stream state
#[derive(Debug, Clone, Default)]
pub struct PartialAssembly {
    latest: Option<PartialMessage>,
    next_sequence: u64,
    received: u64,
    malformed: u64,
    terminal_malformed: bool,
    truncated: Option<String>,
    finalized: bool,
}

impl PartialAssembly {
    /// Most recent accepted snapshot
    pub fn latest(&self) -> Option<&PartialMessage> {
        self.latest.as_ref()
    }

    /// Snapshots accepted so far
    pub fn accepted(&self) -> u64 {
        self.next_sequence
    }

    /// Increments received, valid or not
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Increments dropped as malformed
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Why the output is known to be incomplete, if it is
    pub fn truncation(&self) -> Option<&str> {
        self.truncated.as_deref()
    }
}

/// Increment fields after validation
struct Increment {
    role: Option<Role>,
    content: Option<String>,
    attachment: Option<PartialAttachment>,
}

/// Turns an ordered sequence of cumulative JSON payloads into snapshots and
/// a final message.
///
/// The attachment candidate is whatever the web analyser returned for this
/// turn. Attachment values in snapshots and in the final message always come
/// from it; the model only decides whether an attachment is present.
#[derive(Debug)]
pub struct StreamingResponseAssembler {
    candidate: Option<Attachment>,
    assembly: PartialAssembly,
}

impl StreamingResponseAssembler {
    pub fn new(candidate: Option<Attachment>) -> Self {
        Self {
            candidate,
            assembly: PartialAssembly::default(),
        }
    }

    pub fn assembly(&self) -> &PartialAssembly {
        &self.assembly
    }

    pub fn candidate(&self) -> Option<&Attachment> {
        self.candidate.as_ref()
    }

    /// Accept the next increment.
    ///
    /// Returns the snapshot to show, or `None` if the increment was malformed
    /// and dropped.
    pub fn accept(&mut self, increment: Value) -> Option<PartialMessage> {
        if self.assembly.finalized {
            tracing::warn!("Increment received after finalization, ignoring");
            return None;
        }
        self.assembly.received += 1;

        match validate(increment) {
            Ok(increment) => {
                let snapshot = PartialMessage {
                    sequence: self.assembly.next_sequence,
                    role: increment.role,
                    content: increment.content,
                    attachment: self.resolve_attachment(increment.attachment),
                };
                self.assembly.next_sequence += 1;
                self.assembly.terminal_malformed = false;
                self.assembly.latest = Some(snapshot.clone());
                Some(snapshot)
            }
            Err(reason) => {
                self.assembly.malformed += 1;
                self.assembly.terminal_malformed = true;
                tracing::warn!(
                    received = self.assembly.received,
                    malformed = self.assembly.malformed,
                    "Dropping malformed increment: {}",
                    reason
                );
                None
            }
        }
    }

    /// Record that the backend stopped before the output was complete.
    ///
    /// The last snapshot may still look valid, but it will not finalize.
    pub fn mark_truncated(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(
            received = self.assembly.received,
            "Response output truncated: {}",
            reason
        );
        self.assembly.truncated = Some(reason);
    }

    /// Produce the final message from the last increment.
    ///
    /// The assembler is spent afterwards, whatever the outcome.
    pub fn finalize(&mut self) -> Result<Message, FinalizationFailure> {
        self.assembly.finalized = true;

        if let Some(reason) = self.assembly.truncated.take() {
            return Err(FinalizationFailure::Truncated(reason));
        }
        if self.assembly.received == 0 {
            return Err(FinalizationFailure::EmptyStream);
        }
        if self.assembly.terminal_malformed {
            return Err(FinalizationFailure::MalformedTerminal);
        }
        let last = self
            .assembly
            .latest
            .take()
            .ok_or(FinalizationFailure::MalformedTerminal)?;

        let role = last.role.ok_or(FinalizationFailure::MissingRole)?;
        let content = last.content.ok_or(FinalizationFailure::MissingContent)?;

        let attachment = match last.attachment {
            Some(partial) => {
                let missing = partial.missing();
                if !missing.is_empty() {
                    return Err(FinalizationFailure::IncompleteAttachment(missing.join(", ")));
                }
                self.candidate.clone()
            }
            None => None,
        };

        Ok(Message::new(role, content, attachment))
    }

    /// Drop all partial state
    pub fn reset(&mut self) {
        self.assembly = PartialAssembly::default();
    }

    /// Apply attachment provenance to what the model emitted
    fn resolve_attachment(&self, emitted: Option<PartialAttachment>) -> Option<PartialAttachment> {
        let emitted = emitted?;
        let Some(candidate) = &self.candidate else {
            tracing::debug!("Stripping attachment emitted without a fetched page");
            return None;
        };
        Some(PartialAttachment {
            title: emitted.title.map(|_| candidate.title.clone()),
            description: emitted.description.map(|_| candidate.description.clone()),
            thumbnail: emitted.thumbnail.map(|_| candidate.thumbnail.clone()),
        })
    }
}

fn validate(increment: Value) -> Result<Increment, String> {
    let mut fields = match increment {
        Value::Object(fields) => fields,
        other => return Err(format!("expected an object, got {}", kind(&other))),
    };

    let role = match fields.remove("role") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => parse_role(&s)?,
        Some(other) => return Err(format!("role must be a string, got {}", kind(&other))),
    };

    let content = match fields.remove("content") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => return Err(format!("content must be a string, got {}", kind(&other))),
    };

    let attachment = match fields.remove("attachment") {
        None | Some(Value::Null) => None,
        Some(Value::Object(obj)) => Some(validate_attachment(obj)?),
        Some(other) => {
            return Err(format!("attachment must be an object, got {}", kind(&other)));
        }
    };

    Ok(Increment {
        role,
        content,
        attachment,
    })
}

/// A known role, `None` for a prefix of one still streaming in
fn parse_role(s: &str) -> Result<Option<Role>, String> {
    if let Ok(role) = s.parse::<Role>() {
        return Ok(Some(role));
    }
    let prefix_of_known = [Role::User, Role::Assistant, Role::System]
        .iter()
        .any(|r| r.as_str().starts_with(s));
    if prefix_of_known {
        Ok(None)
    } else {
        Err(format!("unknown role '{}'", s))
    }
}

fn validate_attachment(mut obj: Map<String, Value>) -> Result<PartialAttachment, String> {
    let mut field = |name: &str| match obj.remove(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(format!(
            "attachment.{} must be a string, got {}",
            name,
            kind(&other)
        )),
    };

    Ok(PartialAttachment {
        title: field("title")?,
        description: field("description")?,
        thumbnail: field("thumbnail")?,
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
