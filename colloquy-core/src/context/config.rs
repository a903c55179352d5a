//! Context Budget Configuration

use serde::{Deserialize, Serialize};

/// Token thresholds governing context selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Hard limit of the backend context window
    pub max_tokens: usize,

    /// Estimated history size at which the engine switches to summary mode
    pub safe_token_limit: usize,

    /// Words per token used by the estimator (0.75 for English prose)
    pub words_per_token: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            safe_token_limit: 3500,
            words_per_token: 0.75,
        }
    }
}

impl ContextConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hard token limit
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the summary-mode threshold
    pub fn with_safe_token_limit(mut self, limit: usize) -> Self {
        self.safe_token_limit = limit;
        self
    }

    /// Set the word-to-token ratio
    pub fn with_words_per_token(mut self, ratio: f64) -> Self {
        self.words_per_token = ratio;
        self
    }

    /// Check the thresholds are usable
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.max_tokens == 0 || self.safe_token_limit == 0 {
            return Err(crate::error::ColloquyError::Configuration(
                "Token limits must be greater than zero".to_string(),
            ));
        }
        if self.safe_token_limit > self.max_tokens {
            return Err(crate::error::ColloquyError::Configuration(format!(
                "safe_token_limit ({}) must not exceed max_tokens ({})",
                self.safe_token_limit, self.max_tokens
            )));
        }
        if !(self.words_per_token.is_finite() && self.words_per_token > 0.0) {
            return Err(crate::error::ColloquyError::Configuration(format!(
                "words_per_token must be positive, got {}",
                self.words_per_token
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ContextConfig::default();
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.safe_token_limit, 3500);
        assert_eq!(config.words_per_token, 0.75);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ContextConfig::new()
            .with_max_tokens(8192)
            .with_safe_token_limit(7000)
            .with_words_per_token(0.5);

        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.safe_token_limit, 7000);
        assert_eq!(config.words_per_token, 0.5);
    }

    #[test]
    fn test_validation_rejects_inverted_limits() {
        let config = ContextConfig::new().with_safe_token_limit(5000);
        assert!(config.validate().is_err());

        let config = ContextConfig::new().with_words_per_token(0.0);
        assert!(config.validate().is_err());

        let config = ContextConfig::new().with_max_tokens(0);
        assert!(config.validate().is_err());
    }
}
