//! Web page analysis
//!
//! Fetches a page and extracts the preview metadata (title, description,
//! thumbnail) that gets attached to assistant messages.

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

use super::error::ToolError;

/// Most of a page body read before extraction; preview metadata lives in `<head>`
pub const MAX_PAGE_BYTES: usize = 1024 * 1024;

/// Preview metadata for a web page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPageMetadata {
    pub title: String,
    pub thumbnail: String,
    pub description: String,
}

/// External collaborator that turns a URL into preview metadata
#[async_trait]
pub trait WebAnalyser: Send + Sync {
    /// Tool name, as it appears in logs and prompts
    fn name(&self) -> &str {
        "web_analyser"
    }

    /// Fetch and analyse `url`
    async fn analyse(&self, url: &Url) -> Result<WebPageMetadata, ToolError>;
}

/// [`WebAnalyser`] that fetches pages over HTTP and reads their meta tags
pub struct HttpWebAnalyser {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpWebAnalyser {
    /// Create an analyser with a request timeout and user agent
    pub fn new(timeout: Duration, user_agent: impl Into<String>) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.into())
            .build()
            .map_err(|e| ToolError::Validation(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            timeout: Some(timeout),
        })
    }

    /// Create an analyser around an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }
}

#[async_trait]
impl WebAnalyser for HttpWebAnalyser {
    async fn analyse(&self, url: &Url) -> Result<WebPageMetadata, ToolError> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Timeout(self.timeout.unwrap_or_default())
            } else {
                ToolError::Transient(format!("Failed to fetch {}: {}", url, e))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ToolError::NotFound(url.to_string()));
        }
        if status.is_server_error() {
            return Err(ToolError::Transient(format!("{} answered {}", url, status)));
        }
        if !status.is_success() {
            return Err(ToolError::InvalidResponse(format!(
                "{} answered {}",
                url, status
            )));
        }

        // Redirects may have moved us; relative links resolve against the final URL
        let page_url = response.url().clone();
        let body = read_head(response).await?;

        extract_metadata(&body, &page_url)
    }
}

/// Read the body until `</head>` shows up or [`MAX_PAGE_BYTES`] is reached
async fn read_head(response: reqwest::Response) -> Result<String, ToolError> {
    const HEAD_CLOSE: &[u8] = b"</head>";

    let mut body: Vec<u8> = Vec::new();
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk =
            chunk.map_err(|e| ToolError::Transient(format!("Failed to read body: {}", e)))?;
        // A tag split across chunks is still found
        let scan_from = body.len().saturating_sub(HEAD_CLOSE.len() - 1);
        let room = MAX_PAGE_BYTES - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);

        if body[scan_from..]
            .windows(HEAD_CLOSE.len())
            .any(|w| w.eq_ignore_ascii_case(HEAD_CLOSE))
        {
            break;
        }
        if body.len() >= MAX_PAGE_BYTES {
            tracing::debug!(limit = MAX_PAGE_BYTES, "Page body cut off at size limit");
            break;
        }
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Pull preview metadata out of an HTML document
pub fn extract_metadata(html: &str, page_url: &Url) -> Result<WebPageMetadata, ToolError> {
    static META_TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());
    static LINK_TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<link\b[^>]*>").unwrap());
    static TITLE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

    let mut meta: HashMap<String, String> = HashMap::new();
    for tag in META_TAG_RE.find_iter(html) {
        let attrs = parse_attributes(tag.as_str());
        let key = attrs.get("property").or_else(|| attrs.get("name"));
        if let (Some(key), Some(content)) = (key, attrs.get("content")) {
            let content = decode_entities(content.trim());
            if !content.is_empty() {
                meta.entry(key.to_lowercase()).or_insert(content);
            }
        }
    }

    let first = |keys: &[&str]| keys.iter().find_map(|k| meta.get(*k).cloned());

    let title = first(&["og:title", "twitter:title"]).or_else(|| {
        TITLE_RE
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| decode_entities(m.as_str().trim()))
            .filter(|t| !t.is_empty())
    });

    let Some(title) = title else {
        return Err(ToolError::InvalidResponse(format!(
            "No title found at {}",
            page_url
        )));
    };

    let description = first(&["og:description", "description", "twitter:description"])
        .unwrap_or_else(|| page_url.host_str().unwrap_or_default().to_string());

    let icon = LINK_TAG_RE.find_iter(html).find_map(|tag| {
        let attrs = parse_attributes(tag.as_str());
        let rel = attrs.get("rel")?.to_lowercase();
        if rel.split_whitespace().any(|r| r == "icon") {
            attrs.get("href").cloned()
        } else {
            None
        }
    });

    let thumbnail = first(&["og:image", "twitter:image"])
        .or(icon)
        .and_then(|href| page_url.join(&href).ok())
        .or_else(|| page_url.join("/favicon.ico").ok())
        .map(|u| u.to_string())
        .unwrap_or_default();

    Ok(WebPageMetadata {
        title,
        thumbnail,
        description,
    })
}

fn parse_attributes(tag: &str) -> HashMap<String, String> {
    static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
    });

    ATTR_RE
        .captures_iter(tag)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_lowercase();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str().to_string();
            Some((name, value))
        })
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Deterministic [`WebAnalyser`] returning canned results.
///
/// Unknown URLs fail with [`ToolError::NotFound`]. Every call is recorded.
pub struct StaticWebAnalyser {
    responses: HashMap<String, Result<WebPageMetadata, ToolError>>,
    delay: Duration,
    call_count: AtomicUsize,
    call_history: Arc<RwLock<Vec<String>>>,
}

impl StaticWebAnalyser {
    /// Create an analyser that knows no pages
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            delay: Duration::ZERO,
            call_count: AtomicUsize::new(0),
            call_history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Answer `url` with `metadata`
    pub fn with_page(mut self, url: &str, metadata: WebPageMetadata) -> Self {
        self.responses.insert(normalize(url), Ok(metadata));
        self
    }

    /// Answer `url` with an error
    pub fn with_failure(mut self, url: &str, error: ToolError) -> Self {
        self.responses.insert(normalize(url), Err(error));
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of times `analyse` was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// URLs passed to `analyse`, in call order
    pub async fn calls(&self) -> Vec<String> {
        self.call_history.read().await.clone()
    }
}

impl Default for StaticWebAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl WebAnalyser for StaticWebAnalyser {
    async fn analyse(&self, url: &Url) -> Result<WebPageMetadata, ToolError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.call_history.write().await.push(url.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.responses
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| Err(ToolError::NotFound(url.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page() -> Url {
        Url::parse("https://example.com/articles/rust").unwrap()
    }

    #[test]
    fn test_extract_open_graph() {
        let html = r#"<html><head>
            <title>Fallback title</title>
            <meta property="og:title" content="Rust &amp; You">
            <meta content="Why Rust matters" property="og:description" />
            <meta property="og:image" content="/img/cover.png">
        </head></html>"#;

        let meta = extract_metadata(html, &page()).unwrap();
        assert_eq!(meta.title, "Rust & You");
        assert_eq!(meta.description, "Why Rust matters");
        assert_eq!(meta.thumbnail, "https://example.com/img/cover.png");
    }

    #[test]
    fn test_extract_falls_back_to_title_and_favicon() {
        let html = "<html><head><title> Plain page </title>\
                    <meta name='description' content='Just text'></head></html>";

        let meta = extract_metadata(html, &page()).unwrap();
        assert_eq!(meta.title, "Plain page");
        assert_eq!(meta.description, "Just text");
        assert_eq!(meta.thumbnail, "https://example.com/favicon.ico");
    }

    #[test]
    fn test_extract_uses_link_icon_and_host_description() {
        let html = r#"<title>Docs</title><link rel="shortcut icon" href="https://cdn.example.com/i.png">"#;

        let meta = extract_metadata(html, &page()).unwrap();
        assert_eq!(meta.description, "example.com");
        assert_eq!(meta.thumbnail, "https://cdn.example.com/i.png");
    }

    #[test]
    fn test_extract_without_title_fails() {
        let result = extract_metadata("<html><body>nothing</body></html>", &page());
        assert!(matches!(result, Err(ToolError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_http_analyser_fetches_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<title>Post</title><meta name="description" content="A post">"#,
            ))
            .mount(&server)
            .await;

        let analyser = HttpWebAnalyser::new(Duration::from_secs(5), "colloquy-test").unwrap();
        let url = Url::parse(&format!("{}/post", server.uri())).unwrap();
        let meta = analyser.analyse(&url).await.unwrap();

        assert_eq!(meta.title, "Post");
        assert_eq!(meta.description, "A post");
        assert_eq!(meta.thumbnail, format!("{}/favicon.ico", server.uri()));
    }

    #[tokio::test]
    async fn test_http_analyser_reads_at_most_the_size_limit() {
        let server = MockServer::start().await;
        let filler = "x".repeat(2 * MAX_PAGE_BYTES);
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<html><head><title>Big</title></head><body>{}</body></html>",
                filler
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/late-title"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<!-- {} --><title>Too late</title>", filler)),
            )
            .mount(&server)
            .await;

        let analyser = HttpWebAnalyser::new(Duration::from_secs(5), "colloquy-test").unwrap();

        let big = Url::parse(&format!("{}/big", server.uri())).unwrap();
        assert_eq!(analyser.analyse(&big).await.unwrap().title, "Big");

        let late = Url::parse(&format!("{}/late-title", server.uri())).unwrap();
        assert!(matches!(
            analyser.analyse(&late).await,
            Err(ToolError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_http_analyser_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let analyser = HttpWebAnalyser::new(Duration::from_secs(5), "colloquy-test").unwrap();

        let missing = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        assert!(matches!(
            analyser.analyse(&missing).await,
            Err(ToolError::NotFound(_))
        ));

        let broken = Url::parse(&format!("{}/broken", server.uri())).unwrap();
        assert!(matches!(
            analyser.analyse(&broken).await,
            Err(ToolError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_static_analyser_records_calls() {
        let meta = WebPageMetadata {
            title: "T".into(),
            thumbnail: "https://example.com/t.png".into(),
            description: "D".into(),
        };
        let analyser = StaticWebAnalyser::new().with_page("https://example.com", meta.clone());

        let known = Url::parse("https://example.com").unwrap();
        let unknown = Url::parse("https://unknown.example").unwrap();

        assert_eq!(analyser.analyse(&known).await.unwrap(), meta);
        assert!(analyser.analyse(&unknown).await.is_err());
        assert_eq!(analyser.call_count(), 2);
        assert_eq!(
            analyser.calls().await,
            vec!["https://example.com/".to_string(), "https://unknown.example/".to_string()]
        );
    }
}
