//! URL detection and tool invocation ahead of response generation

use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::conversation::{Message, Role};

use super::error::ToolError;
use super::web_analyser::{WebAnalyser, WebPageMetadata};

/// Characters that commonly wrap a URL in prose but are not part of it
const WRAPPING_PUNCTUATION: &[char] = &[
    '(', ')', '[', ']', '{', '}', '<', '>', '"', '\'', '`', ',', '.', ';', ':', '!', '?',
];

/// First absolute http(s) URL in `text`, if any.
///
/// Tokens are split on whitespace and stripped of wrapping punctuation before
/// parsing, so `"see (https://example.com)."` yields `https://example.com/`.
pub fn detect_url(text: &str) -> Option<Url> {
    text.split_whitespace().find_map(|token| {
        let start = token.find("http://").or_else(|| token.find("https://"))?;
        let candidate = token[start..].trim_end_matches(WRAPPING_PUNCTUATION);
        let url = Url::parse(candidate).ok()?;
        match url.scheme() {
            "http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Some(url),
            _ => None,
        }
    })
}

/// Runs the web analyser when the latest user message references a URL
#[derive(Clone)]
pub struct ToolInvoker {
    analyser: Arc<dyn WebAnalyser>,
    timeout: Duration,
}

impl ToolInvoker {
    /// Create an invoker with a per-call deadline
    pub fn new(analyser: Arc<dyn WebAnalyser>, timeout: Duration) -> Self {
        Self { analyser, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn analyser_name(&self) -> &str {
        self.analyser.name()
    }

    /// Fetch attachment metadata for the message's URL.
    ///
    /// Returns `None` when the message is not from the user, contains no URL,
    /// or the analysis fails. Failures are logged, never returned.
    pub async fn maybe_invoke(&self, message: &Message) -> Option<WebPageMetadata> {
        if message.role() != Role::User {
            return None;
        }
        let url = detect_url(message.content())?;

        match self.analyse(&url).await {
            Ok(meta) => {
                tracing::debug!(
                    tool = self.analyser.name(),
                    url = %url,
                    title = %meta.title,
                    "Attachment candidate fetched"
                );
                Some(meta)
            }
            Err(e) => {
                tracing::warn!(
                    tool = self.analyser.name(),
                    url = %url,
                    "Web analysis failed, continuing without attachment: {}",
                    e
                );
                None
            }
        }
    }

    /// Analyse a URL directly, bounded by the invoker timeout
    pub async fn analyse(&self, url: &Url) -> Result<WebPageMetadata, ToolError> {
        match tokio::time::timeout(self.timeout, self.analyser.analyse(url)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::StaticWebAnalyser;

    fn metadata() -> WebPageMetadata {
        WebPageMetadata {
            title: "Example Domain".into(),
            thumbnail: "https://example.com/favicon.ico".into(),
            description: "Illustrative examples".into(),
        }
    }

    #[test]
    fn test_detect_url_in_prose() {
        let url = detect_url("Can you look at (https://example.com/docs?page=2).").unwrap();
        assert_eq!(url.as_str(), "https://example.com/docs?page=2");

        let url = detect_url("link:https://rust-lang.org, thanks").unwrap();
        assert_eq!(url.host_str(), Some("rust-lang.org"));
    }

    #[test]
    fn test_detect_url_rejects_non_urls() {
        assert!(detect_url("no links here").is_none());
        assert!(detect_url("ftp://example.com/file").is_none());
        assert!(detect_url("https://").is_none());
        assert!(detect_url("").is_none());
    }

    #[test]
    fn test_detect_url_takes_first() {
        let url = detect_url("http://a.example and https://b.example").unwrap();
        assert_eq!(url.host_str(), Some("a.example"));
    }

    #[tokio::test]
    async fn test_no_url_means_no_call() {
        let analyser = Arc::new(StaticWebAnalyser::new());
        let invoker = ToolInvoker::new(analyser.clone(), Duration::from_secs(1));

        let message = Message::new(Role::User, "Tell me a joke", None);
        assert!(invoker.maybe_invoke(&message).await.is_none());
        assert_eq!(analyser.call_count(), 0);
    }

    #[tokio::test]
    async fn test_url_fetches_metadata() {
        let analyser =
            Arc::new(StaticWebAnalyser::new().with_page("https://example.com", metadata()));
        let invoker = ToolInvoker::new(analyser.clone(), Duration::from_secs(1));

        let message = Message::new(Role::User, "What is https://example.com ?", None);
        assert_eq!(invoker.maybe_invoke(&message).await, Some(metadata()));
        assert_eq!(analyser.call_count(), 1);
    }

    #[tokio::test]
    async fn test_non_user_message_is_ignored() {
        let analyser =
            Arc::new(StaticWebAnalyser::new().with_page("https://example.com", metadata()));
        let invoker = ToolInvoker::new(analyser.clone(), Duration::from_secs(1));

        let message = Message::new(Role::Assistant, "See https://example.com", None);
        assert!(invoker.maybe_invoke(&message).await.is_none());
        assert_eq!(analyser.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let analyser = Arc::new(StaticWebAnalyser::new().with_failure(
            "https://example.com",
            ToolError::Transient("connection reset".into()),
        ));
        let invoker = ToolInvoker::new(analyser, Duration::from_secs(1));

        let message = Message::new(Role::User, "https://example.com", None);
        assert!(invoker.maybe_invoke(&message).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_swallowed() {
        let analyser = Arc::new(
            StaticWebAnalyser::new()
                .with_page("https://example.com", metadata())
                .with_delay(Duration::from_secs(30)),
        );
        let invoker = ToolInvoker::new(analyser, Duration::from_secs(2));

        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(
            invoker.analyse(&url).await,
            Err(ToolError::Timeout(Duration::from_secs(2)))
        );

        let message = Message::new(Role::User, "https://example.com", None);
        assert!(invoker.maybe_invoke(&message).await.is_none());
    }
}
