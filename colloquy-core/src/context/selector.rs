//! Context mode selection

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::conversation::Conversation;
use crate::error::{ColloquyError, Result};

use super::config::ContextConfig;
use super::estimator::TokenBudgetEstimator;

/// What the next backend call is given as context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// The full canonical history
    Full,
    /// The running summary plus the latest message
    Summary,
}

impl fmt::Display for ContextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextMode::Full => f.write_str("full"),
            ContextMode::Summary => f.write_str("summary"),
        }
    }
}

/// Per-turn estimate of the conversation size and the chosen mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEstimate {
    pub word_count: usize,
    pub estimated_token_count: usize,
    pub mode: ContextMode,
}

/// Chooses between full-history and summary context
#[derive(Debug, Clone)]
pub struct ContextSelector {
    estimator: TokenBudgetEstimator,
    safe_token_limit: usize,
    max_tokens: usize,
}

impl ContextSelector {
    /// Create a selector from configuration
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            estimator: TokenBudgetEstimator::with_words_per_token(config.words_per_token),
            safe_token_limit: config.safe_token_limit,
            max_tokens: config.max_tokens,
        }
    }

    pub fn estimator(&self) -> &TokenBudgetEstimator {
        &self.estimator
    }

    pub fn safe_token_limit(&self) -> usize {
        self.safe_token_limit
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Estimate the canonical history and pick a mode.
    ///
    /// Summary mode is chosen when the estimate is at or above the safe limit.
    pub fn select(&self, conversation: &Conversation) -> ContextEstimate {
        let estimate = self.estimator.estimate(&conversation.canonical_history());
        let mode = if estimate.estimated_token_count < self.safe_token_limit {
            ContextMode::Full
        } else {
            ContextMode::Summary
        };

        ContextEstimate {
            word_count: estimate.word_count,
            estimated_token_count: estimate.estimated_token_count,
            mode,
        }
    }

    /// Estimate a rendered prompt against the hard limit.
    ///
    /// Returns the estimate, or [`ColloquyError::ContextOverflow`] when it
    /// exceeds `max_tokens`. Prompts are never truncated to fit.
    pub fn check_prompt(&self, prompt: &str) -> Result<usize> {
        let estimated = self.estimator.estimate(prompt).estimated_token_count;
        if estimated > self.max_tokens {
            return Err(ColloquyError::ContextOverflow {
                estimated,
                limit: self.max_tokens,
            });
        }
        Ok(estimated)
    }
}

impl Default for ContextSelector {
    fn default() -> Self {
        Self::new(&ContextConfig::default())
    }
}
