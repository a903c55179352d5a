//! Context Budget - Deciding what fits in the window
//!
//! The backend has a fixed context window. Before every turn the conversation's
//! canonical history is estimated with a word-based heuristic, and the turn is
//! sent either the full history or the running summary plus the latest message.
//!
//! # Example
//!
//! ```rust
//! use colloquy_core::context::{ContextConfig, ContextMode, ContextSelector};
//! use colloquy_core::conversation::{Conversation, Message, Role};
//!
//! let mut conversation = Conversation::new();
//! conversation.append(Message::new(Role::User, "Hi", None));
//!
//! let selector = ContextSelector::new(&ContextConfig::default());
//! let estimate = selector.select(&conversation);
//! assert_eq!(estimate.mode, ContextMode::Full);
//! ```

mod config;
mod estimator;
mod selector;

pub use config::ContextConfig;
pub use estimator::{count_words, TokenBudgetEstimator, TokenEstimate};
pub use selector::{ContextEstimate, ContextMode, ContextSelector};
