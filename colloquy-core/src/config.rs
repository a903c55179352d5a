//! Configuration types for Colloquy

use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::ContextConfig;
use crate::error::{ColloquyError, Result};

/// Main configuration for a chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ColloquyConfig {
    /// Token budget and mode thresholds
    pub context: ContextConfig,

    /// Session behaviour
    pub session: SessionConfig,

    /// Web analyser settings
    pub tools: ToolConfig,

    /// LLM provider configuration (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LLMProviderConfig>,

    /// Conversation persistence
    pub store: StoreConfig,
}

/// Session behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Replaces the built-in chatbot instructions when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instructions: Option<String>,

    /// Sampling temperature passed to the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Cap on generated tokens per response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<usize>,

    /// Capacity of the session event channel
    pub event_buffer: usize,

    /// Warm the backend up when the engine is created
    pub prewarm: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_instructions: None,
            temperature: None,
            max_response_tokens: None,
            event_buffer: 100,
            prewarm: true,
        }
    }
}

/// Web analyser settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Fetch metadata for URLs in user messages
    pub web_analysis: bool,

    /// Deadline for one page fetch
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// User agent sent with page fetches
    pub user_agent: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            web_analysis: true,
            timeout: Duration::from_secs(15),
            user_agent: format!("colloquy/{}", crate::VERSION),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMProviderConfig {
    /// Provider type
    pub provider: ProviderKind,

    /// Model name (empty means the provider default)
    #[serde(default)]
    pub model: String,

    /// API key (if needed, prefer env vars)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL (for custom endpoints, e.g., Ollama)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Ollama,
}

/// Where conversations are kept between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Directory for the JSON backend; defaults to the platform data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Json,
            directory: None,
        }
    }
}

impl StoreConfig {
    /// Configured directory, or `<data dir>/colloquy/conversations`
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("colloquy")
                .join("conversations")
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Json,
}

impl ColloquyConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `colloquy.toml` in the working directory
    /// 3. The file named by `COLLOQUY_CONFIG_PATH`, if set
    /// 4. `COLLOQUY_` environment variables, nested with `__`
    ///    (`COLLOQUY_CONTEXT__SAFE_TOKEN_LIMIT=3000`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self> {
        use figment::providers::{Env, Format, Toml};

        let mut figment = Figment::new().merge(Toml::file("colloquy.toml"));

        if let Ok(path) = std::env::var("COLLOQUY_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed("COLLOQUY_")
                .ignore(&["CONFIG_PATH"])
                .split("__"),
        );

        Self::extract(figment)
    }

    /// Load configuration from a specific file path.
    ///
    /// TOML, YAML and JSON are recognised by extension; anything else is read
    /// as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use figment::providers::{Format, Json, Toml, Yaml};

        let path = path.as_ref();
        if !path.exists() {
            return Err(ColloquyError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
            Some("json") => Figment::new().merge(Json::file(path)),
            _ => Figment::new().merge(Toml::file(path)),
        };

        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: ColloquyConfig = figment.extract().map_err(|e| {
            ColloquyError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.context.validate()?;

        if self.tools.timeout.is_zero() {
            return Err(ColloquyError::Configuration(
                "tools.timeout must be greater than zero".to_string(),
            ));
        }
        if self.session.event_buffer == 0 {
            return Err(ColloquyError::Configuration(
                "session.event_buffer must be greater than zero".to_string(),
            ));
        }
        if let Some(t) = self.session.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ColloquyError::Configuration(format!(
                    "session.temperature must be within 0.0..=2.0, got {}",
                    t
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::{Format, Toml};
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ColloquyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context.safe_token_limit, 3500);
        assert_eq!(config.tools.timeout, Duration::from_secs(15));
        assert_eq!(config.store.backend, StoreBackend::Json);
        assert!(config.llm.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [context]
            safe_token_limit = 3000

            [tools]
            timeout = "5s"

            [llm]
            provider = "ollama"
            model = "llama3"
            "#,
        ));
        let config = ColloquyConfig::extract(figment).unwrap();

        assert_eq!(config.context.safe_token_limit, 3000);
        assert_eq!(config.context.max_tokens, 4096);
        assert_eq!(config.tools.timeout, Duration::from_secs(5));
        assert!(config.tools.web_analysis);
        let llm = config.llm.unwrap();
        assert_eq!(llm.provider, ProviderKind::Ollama);
        assert_eq!(llm.model, "llama3");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let figment = Figment::new().merge(Toml::string(
            "[context]\nsafe_token_limit = 9000\n",
        ));
        assert!(matches!(
            ColloquyConfig::extract(figment),
            Err(ColloquyError::Configuration(_))
        ));

        let figment = Figment::new().merge(Toml::string("[tools]\ntimeout = \"0s\"\n"));
        assert!(ColloquyConfig::extract(figment).is_err());

        let mut config = ColloquyConfig::default();
        config.session.temperature = Some(3.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[store]\nbackend = \"memory\"\n[session]\nprewarm = false").unwrap();

        let config = ColloquyConfig::from_file(file.path()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(!config.session.prewarm);

        assert!(ColloquyConfig::from_file("/nonexistent/colloquy.toml").is_err());
    }

    #[test]
    fn test_store_directory_override() {
        let store = StoreConfig {
            backend: StoreBackend::Json,
            directory: Some(PathBuf::from("/tmp/chats")),
        };
        assert_eq!(store.resolved_directory(), PathBuf::from("/tmp/chats"));
        assert!(StoreConfig::default()
            .resolved_directory()
            .ends_with("colloquy/conversations"));
    }
}
