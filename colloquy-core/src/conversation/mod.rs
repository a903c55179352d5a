//! Conversation Records
//!
//! Messages, the conversation they belong to, and the stores that persist them.
//!
//! # Example
//!
//! ```rust
//! use colloquy_core::conversation::{Conversation, Message, Role};
//!
//! let mut conversation = Conversation::new();
//! conversation.append(Message::new(Role::User, "Hi", None));
//!
//! assert_eq!(conversation.canonical_history(), "Role: user\nContent: Hi");
//! ```

mod history;
mod message;
mod store;

pub use history::{Conversation, SharedConversation};
pub use message::{Attachment, Message, Role};
pub use store::{ConversationStore, InMemoryConversationStore, JsonFileConversationStore};
