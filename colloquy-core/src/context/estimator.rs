//! Word-based token estimation

use serde::{Deserialize, Serialize};

/// Word and token counts for a block of text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub word_count: usize,
    pub estimated_token_count: usize,
}

/// Approximates token usage from whitespace-separated words.
///
/// This is a heuristic, not a tokenizer: it only has to be deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBudgetEstimator {
    words_per_token: f64,
}

/// Ratio for English prose; handled in integer arithmetic
const DEFAULT_WORDS_PER_TOKEN: f64 = 0.75;

impl TokenBudgetEstimator {
    /// Estimator with the default 0.75 words-per-token ratio
    pub fn new() -> Self {
        Self {
            words_per_token: DEFAULT_WORDS_PER_TOKEN,
        }
    }

    /// Estimator with a custom ratio
    pub fn with_words_per_token(words_per_token: f64) -> Self {
        Self { words_per_token }
    }

    pub fn words_per_token(&self) -> f64 {
        self.words_per_token
    }

    /// Count words and derive `floor(words / ratio)`
    pub fn estimate(&self, text: &str) -> TokenEstimate {
        let word_count = count_words(text);
        TokenEstimate {
            word_count,
            estimated_token_count: self.tokens_for(word_count),
        }
    }

    fn tokens_for(&self, word_count: usize) -> usize {
        if self.words_per_token == DEFAULT_WORDS_PER_TOKEN {
            // n / 0.75 == n * 4 / 3, exact in integers
            word_count * 4 / 3
        } else {
            (word_count as f64 / self.words_per_token).floor() as usize
        }
    }
}

impl Default for TokenBudgetEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Words are maximal runs of non-whitespace characters (spaces and newlines both split)
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}
