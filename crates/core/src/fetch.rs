// ABOUTME: Retrieves a page, extracts its title and fingerprints its normalized content.
// ABOUTME: Every failure is classified into a FetchOutcome; nothing escapes to the caller.

use std::fmt;
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::debug;

use crate::fingerprint::Fingerprint;
use crate::select::{extract_content, SelectorOutcome};

/// Maximum accepted body size (10 MB).
pub const MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Browser-like identification; some sites refuse unknown agents.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Source of page fingerprints. Implemented over HTTP by [`Fetcher`].
pub trait PageSource: Send + Sync {
    fn fetch(&self, url: &str, selector: Option<&str>) -> FetchResult;
}

/// Network failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    Timeout,
    Connect,
    /// Any non-2xx response.
    Status(u16),
    TooLarge,
    Body,
    Request,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid URL"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Connect => write!(f, "connection failed"),
            FailureKind::Status(code) => write!(f, "HTTP status {}", code),
            FailureKind::TooLarge => write!(f, "content too large"),
            FailureKind::Body => write!(f, "failed to read body"),
            FailureKind::Request => write!(f, "request failed"),
        }
    }
}

/// A classified fetch failure with a human-readable cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_connect() {
            FailureKind::Connect
        } else if let Some(status) = err.status() {
            FailureKind::Status(status.as_u16())
        } else if err.is_body() || err.is_decode() {
            FailureKind::Body
        } else {
            FailureKind::Request
        };

        let detail = match kind {
            FailureKind::Timeout => format!("timed out after {:?}", timeout),
            _ => error_chain(err),
        };
        Self::new(kind, detail)
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for FetchFailure {}

/// Joins an error with its sources; reqwest keeps the useful part
/// (DNS failure, refused connection) in the chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

/// Tagged result of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success {
        fingerprint: Fingerprint,
        /// How the site's selector applied, when it has one.
        selector: Option<SelectorOutcome>,
    },
    Failed(FetchFailure),
}

/// Outcome plus the page title, when one was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub outcome: FetchOutcome,
    pub title: Option<String>,
}

impl FetchResult {
    pub fn failed(failure: FetchFailure) -> Self {
        Self {
            outcome: FetchOutcome::Failed(failure),
            title: None,
        }
    }

    /// Builds a successful result from a page body.
    pub fn from_html(html: &str, selector: Option<&str>) -> Self {
        let (content, selector) = extract_content(html, selector);
        Self {
            outcome: FetchOutcome::Success {
                fingerprint: Fingerprint::of(&content),
                selector,
            },
            title: page_title(html),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Success { .. })
    }
}

/// Text of the first `<title>` element, trimmed. Empty titles count as absent.
pub fn page_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);
    let element = document.select(&selector).next()?;
    let text: String = element.text().collect();
    let trimmed = crate::normalize::collapse_whitespace(&text);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Decode body bytes to a String using charset from content-type header or detection.
fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    if let Some(ct) = content_type {
        if let Some(charset) = extract_charset(ct) {
            if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
                let (decoded, _, _) = encoding.decode(body);
                return decoded.into_owned();
            }
        }
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(body, true);
    let encoding = detector.guess(None, true);
    let (decoded, _, _) = encoding.decode(body);
    decoded.into_owned()
}

/// Extract charset value from Content-Type header.
fn extract_charset(content_type: &str) -> Option<String> {
    let lower = content_type.to_lowercase();
    for part in lower.split(';') {
        let trimmed = part.trim();
        if let Some(charset) = trimmed.strip_prefix("charset=") {
            let charset = charset.trim_matches('"').trim_matches('\'');
            return Some(charset.to_string());
        }
    }
    None
}

/// Options for the HTTP fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Builder for [`Fetcher`].
#[derive(Debug, Clone, Default)]
pub struct FetcherBuilder {
    opts: FetchOptions,
}

impl FetcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.timeout = timeout;
        self
    }

    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.opts.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<Fetcher, reqwest::Error> {
        Fetcher::new(self.opts)
    }
}

/// Blocking HTTP page source.
#[derive(Debug, Clone)]
pub struct Fetcher {
    opts: FetchOptions,
    http_client: reqwest::blocking::Client,
}

impl Fetcher {
    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::new()
    }

    pub fn new(opts: FetchOptions) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::blocking::Client::builder()
            .user_agent(&opts.user_agent)
            .timeout(opts.timeout)
            .connect_timeout(opts.timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;
        Ok(Self { opts, http_client })
    }

    pub fn options(&self) -> &FetchOptions {
        &self.opts
    }

    /// GETs `url` and returns the decoded body.
    pub fn fetch_body(&self, url: &str) -> Result<String, FetchFailure> {
        let parsed = url::Url::parse(url)
            .map_err(|e| FetchFailure::new(FailureKind::InvalidUrl, e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchFailure::new(
                FailureKind::InvalidUrl,
                "scheme must be http or https",
            ));
        }

        let response = self
            .http_client
            .get(parsed)
            .send()
            .map_err(|e| FetchFailure::from_reqwest(&e, self.opts.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("");
            return Err(FetchFailure::new(
                FailureKind::Status(status.as_u16()),
                format!("{} {} for url ({})", status.as_u16(), reason, url),
            ));
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_CONTENT_LENGTH {
                return Err(FetchFailure::new(
                    FailureKind::TooLarge,
                    format!("{} bytes exceeds {} byte limit", len, MAX_CONTENT_LENGTH),
                ));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_lowercase());

        let body = response
            .bytes()
            .map_err(|e| FetchFailure::from_reqwest(&e, self.opts.timeout))?;

        if body.len() > MAX_CONTENT_LENGTH {
            return Err(FetchFailure::new(
                FailureKind::TooLarge,
                format!("{} bytes exceeds {} byte limit", body.len(), MAX_CONTENT_LENGTH),
            ));
        }

        Ok(decode_body(&body, content_type.as_deref()))
    }
}

impl PageSource for Fetcher {
    fn fetch(&self, url: &str, selector: Option<&str>) -> FetchResult {
        match self.fetch_body(url) {
            Ok(html) => {
                debug!(url, bytes = html.len(), "fetched page");
                FetchResult::from_html(&html, selector)
            }
            Err(failure) => {
                debug!(url, error = %failure, "fetch failed");
                FetchResult::failed(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_fetcher() -> Fetcher {
        Fetcher::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_fetch_ok_extracts_title_and_fingerprint() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/page");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body("<html><head><title> My Page </title></head><body><p>Hello</p></body></html>");
        });

        let result = test_fetcher().fetch(&server.url("/page"), None);
        mock.assert();

        assert_eq!(result.title.as_deref(), Some("My Page"));
        match result.outcome {
            FetchOutcome::Success { fingerprint, selector } => {
                assert_eq!(fingerprint, Fingerprint::of("My Page Hello"));
                assert!(selector.is_none());
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_fetch_sends_browser_user_agent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/ua")
                .header("user-agent", DEFAULT_USER_AGENT);
            then.status(200).body("<p>ok</p>");
        });

        let result = test_fetcher().fetch(&server.url("/ua"), None);
        mock.assert();
        assert!(result.is_success());
    }

    #[test]
    fn test_fetch_with_selector() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/sel");
            then.status(200)
                .body("<body><div id='ad'>ad 123</div><main>Stable</main></body>");
        });

        let result = test_fetcher().fetch(&server.url("/sel"), Some("main"));
        match result.outcome {
            FetchOutcome::Success { fingerprint, selector } => {
                assert_eq!(fingerprint, Fingerprint::of("Stable"));
                assert_eq!(selector, Some(SelectorOutcome::Matched(1)));
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert!(result.title.is_none());
    }

    #[test]
    fn test_fetch_non_2xx_is_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404).body("not found");
        });

        let result = test_fetcher().fetch(&server.url("/missing"), None);
        mock.assert();

        match result.outcome {
            FetchOutcome::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::Status(404));
                assert!(failure.detail.contains("404"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(result.title.is_none());
    }

    #[test]
    fn test_fetch_timeout_is_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200)
                .delay(Duration::from_millis(1500))
                .body("late");
        });

        let fetcher = Fetcher::builder()
            .timeout(Duration::from_millis(300))
            .build()
            .unwrap();
        let result = fetcher.fetch(&server.url("/slow"), None);
        match result.outcome {
            FetchOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::Timeout),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_fetch_connection_refused_is_error() {
        // port 9 (discard) is essentially never listening on loopback
        let result = test_fetcher().fetch("http://127.0.0.1:9/", None);
        assert!(!result.is_success());
    }

    #[test]
    fn test_fetch_rejects_non_http_scheme() {
        let result = test_fetcher().fetch("ftp://example.com/file", None);
        match result.outcome {
            FetchOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::InvalidUrl),
            other => panic!("expected invalid url, got {:?}", other),
        }
    }

    #[test]
    fn test_page_title() {
        assert_eq!(
            page_title("<html><head><title>Hi\n there</title></head></html>"),
            Some("Hi there".to_string())
        );
        assert_eq!(page_title("<title>   </title>"), None);
        assert_eq!(page_title("<p>no title</p>"), None);
    }

    #[test]
    fn test_decode_iso_8859_1_from_header() {
        let body: &[u8] = &[0x63, 0x61, 0x66, 0xe9];
        assert_eq!(decode_body(body, Some("text/html; charset=ISO-8859-1")), "café");
    }

    #[test]
    fn test_extract_charset() {
        assert_eq!(
            extract_charset("text/html; charset=\"utf-8\""),
            Some("utf-8".to_string())
        );
        assert_eq!(extract_charset("text/html"), None);
    }
}
