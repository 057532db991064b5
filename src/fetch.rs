//! HTTP transport
//!
//! The controller only depends on the [`Fetcher`] trait. [`HttpFetcher`] is
//! the production implementation on top of `reqwest`; tests substitute an
//! in-memory site.
//!
//! Fetchers never follow redirects themselves. A 3xx answer comes back as a
//! [`FetchResponse`] carrying its `Location`, and the controller decides
//! whether the target is still inside the scope.

use std::time::Duration;

use url::Url;

use crate::FetchError;

/// User agents rotated through when none are configured
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
];

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// A successful (2xx) response, or a redirect to follow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// The address that answered
    pub url: Url,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Raw `Location` header of a 3xx answer
    pub location: Option<String>,
}

impl FetchResponse {
    /// A 2xx answer from `url`
    pub fn ok(url: Url, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url,
            status: 200,
            content_type: content_type.into(),
            body: body.into(),
            location: None,
        }
    }

    /// A 3xx answer from `url` pointing at `location`
    pub fn redirect(url: Url, status: u16, location: impl Into<String>) -> Self {
        Self {
            url,
            status,
            content_type: String::new(),
            body: Vec::new(),
            location: Some(location.into()),
        }
    }

    /// Whether the body should be parsed and rewritten as HTML
    ///
    /// Without a `Content-Type` the body itself decides: it is HTML when it
    /// opens with a doctype or an `<html>` tag.
    pub fn is_html(&self) -> bool {
        let mime = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime.is_empty() {
            return looks_like_html(&self.body);
        }
        mime == "text/html" || mime == "application/xhtml+xml"
    }
}

fn looks_like_html(body: &[u8]) -> bool {
    let body = body.strip_prefix(b"\xef\xbb\xbf").unwrap_or(body);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let head = &body[start..];
    [&b"<!doctype html"[..], b"<html"]
        .iter()
        .any(|marker| head.len() >= marker.len() && head[..marker.len()].eq_ignore_ascii_case(marker))
}

/// Capability to retrieve one URL
///
/// Implementations carry their own timeout, return 3xx answers with a
/// `Location` as [`FetchResponse::redirect`] and report other non-success
/// statuses as [`FetchError::Http`].
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, user_agent: &str) -> Result<FetchResponse, FetchError>;
}

/// Chooses the user agent for a request
///
/// Must be a pure function of the request index.
pub trait UserAgentStrategy: Send + Sync {
    fn user_agent(&self, request_index: u64) -> &str;
}

/// Round-robin over a fixed list of user agents
#[derive(Debug, Clone)]
pub struct RotatingUserAgents {
    agents: Vec<String>,
}

impl RotatingUserAgents {
    /// Create a rotation, falling back to [`DEFAULT_USER_AGENTS`] when empty
    pub fn new(agents: Vec<String>) -> Self {
        if agents.is_empty() {
            return Self::default();
        }
        Self { agents }
    }
}

impl Default for RotatingUserAgents {
    fn default() -> Self {
        Self {
            agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl UserAgentStrategy for RotatingUserAgents {
    fn user_agent(&self, request_index: u64) -> &str {
        let slot = (request_index % self.agents.len() as u64) as usize;
        &self.agents[slot]
    }
}

/// `reqwest`-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::none())
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(classify)?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, user_agent: &str) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, user_agent)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header(reqwest::header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        if status.is_redirection()
            && let Some(location) = header(reqwest::header::LOCATION)
        {
            return Ok(FetchResponse::redirect(url.clone(), status.as_u16(), location));
        }
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        let content_type = header(reqwest::header::CONTENT_TYPE).unwrap_or_default();
        let body = response.bytes().await.map_err(classify)?;

        Ok(FetchResponse {
            url: url.clone(),
            status: status.as_u16(),
            content_type,
            body: body.to_vec(),
            location: None,
        })
    }
}

fn classify(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = error.status() {
        FetchError::Http(status.as_u16())
    } else {
        FetchError::Network(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(content_type: &str, body: &str) -> FetchResponse {
        FetchResponse::ok(Url::parse("https://example.com/").unwrap(), content_type, body)
    }

    #[test]
    fn test_html_content_types() {
        assert!(page("text/html; charset=utf-8", "").is_html());
        assert!(page("Application/XHTML+XML", "").is_html());
        assert!(!page("text/css", "<html>").is_html());
    }

    #[test]
    fn test_missing_content_type_sniffs_body() {
        assert!(page("", "\u{feff}\n  <!DOCTYPE html><p>x</p>").is_html());
        assert!(page("", "<HTML lang=en>").is_html());
        assert!(!page("", "body { color: red }").is_html());
        assert!(!page("", "").is_html());
    }

    #[test]
    fn test_rotation_falls_back_to_defaults() {
        let agents = RotatingUserAgents::new(Vec::new());
        assert_eq!(agents.user_agent(0), DEFAULT_USER_AGENTS[0]);
        assert_eq!(agents.user_agent(4), DEFAULT_USER_AGENTS[1]);
    }
}
