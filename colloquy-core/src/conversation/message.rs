//! Conversation messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::tools::WebPageMetadata;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Lowercase wire name, as used in the canonical history string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Web page preview attached to a message.
///
/// All three fields are required, so a message either carries a complete
/// attachment or none at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub title: String,
    pub description: String,
    pub thumbnail: String,
}

impl From<WebPageMetadata> for Attachment {
    fn from(meta: WebPageMetadata) -> Self {
        Self {
            title: meta.title,
            description: meta.description,
            thumbnail: meta.thumbnail,
        }
    }
}

/// A single immutable message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attachment: Option<Attachment>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(role: Role, content: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self::at(role, content, attachment, Utc::now())
    }

    /// Create a message with an explicit timestamp
    pub fn at(
        role: Role,
        content: impl Into<String>,
        attachment: Option<Attachment>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp,
            attachment,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Canonical `Role: ...\nContent: ...` rendering used for history and estimation
    pub fn to_history_entry(&self) -> String {
        format!("Role: {}\nContent: {}", self.role, self.content)
    }

    /// Copy of this message re-stamped no earlier than `floor`
    pub(crate) fn not_before(mut self, floor: DateTime<Utc>) -> Self {
        if self.timestamp < floor {
            self.timestamp = floor;
        }
        self
    }
}
