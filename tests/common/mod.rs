#![allow(dead_code)]

use sitemirror::*;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Duration;

enum MockPage {
    Body { content_type: String, body: Vec<u8> },
    Status(u16),
    Redirect { status: u16, location: String },
}

/// In-memory website standing in for the HTTP transport
pub struct MockSite {
    pages: HashMap<String, MockPage>,
    hits: Mutex<HashMap<String, usize>>,
    user_agents: Mutex<Vec<String>>,
    latency: Duration,
    hang_on: Option<String>,
    /// Notified when a request for the `hang_on` URL starts
    pub hung: Notify,
}

impl MockSite {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            hits: Mutex::new(HashMap::new()),
            user_agents: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            hang_on: None,
            hung: Notify::new(),
        }
    }

    pub fn html(self, url: &str, body: &str) -> Self {
        self.file(url, "text/html; charset=utf-8", body.as_bytes())
    }

    pub fn file(mut self, url: &str, content_type: &str, body: &[u8]) -> Self {
        self.pages.insert(
            url.to_string(),
            MockPage::Body {
                content_type: content_type.to_string(),
                body: body.to_vec(),
            },
        );
        self
    }

    pub fn status(mut self, url: &str, status: u16) -> Self {
        self.pages.insert(url.to_string(), MockPage::Status(status));
        self
    }

    /// Answer requests for `url` with a 301 to `location`, taken as written
    pub fn redirect(mut self, url: &str, location: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            MockPage::Redirect {
                status: 301,
                location: location.to_string(),
            },
        );
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Requests for `url` never complete
    pub fn hang_on(mut self, url: &str) -> Self {
        self.hang_on = Some(url.to_string());
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn all_hits(&self) -> HashMap<String, usize> {
        self.hits.lock().unwrap().clone()
    }

    pub fn user_agents(&self) -> Vec<String> {
        self.user_agents.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Fetcher for MockSite {
    async fn fetch(&self, url: &::url::Url, user_agent: &str) -> Result<FetchResponse, FetchError> {
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;
        self.user_agents.lock().unwrap().push(user_agent.to_string());

        if self.hang_on.as_deref() == Some(url.as_str()) {
            self.hung.notify_one();
            std::future::pending::<()>().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.pages.get(url.as_str()) {
            Some(MockPage::Body { content_type, body }) => {
                Ok(FetchResponse::ok(url.clone(), content_type.clone(), body.clone()))
            }
            Some(MockPage::Status(status)) => Err(FetchError::Http(*status)),
            Some(MockPage::Redirect { status, location }) => {
                Ok(FetchResponse::redirect(url.clone(), *status, location.clone()))
            }
            None => Err(FetchError::Http(404)),
        }
    }
}

/// Every file under `root`, keyed by its `/`-separated relative path
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(dir: &Path, prefix: &str, files: &mut BTreeMap<String, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            if entry.file_type().unwrap().is_dir() {
                walk(&entry.path(), &relative, files);
            } else {
                files.insert(relative, std::fs::read(entry.path()).unwrap());
            }
        }
    }

    let mut files = BTreeMap::new();
    walk(root, "", &mut files);
    files
}

/// The blog used by the end-to-end scenarios
pub fn blog_site() -> MockSite {
    MockSite::new()
        .html(
            "https://example.com/blog/",
            r#"<html><head><title>My Blog</title></head><body>
<a href="post1">First post</a>
<a href="/blog/post2/">Second post</a>
<a href="https://other.com/">Elsewhere</a>
<a href="/about">About</a>
<a href="missing">Broken</a>
</body></html>"#,
        )
        .html(
            "https://example.com/blog/post1/",
            r#"<html><head><title>Post 1</title></head><body>
<img src="../shared/logo.png">
<a href="../">Home</a>
</body></html>"#,
        )
        .html(
            "https://example.com/blog/post2/",
            r#"<html><head><title>Post 2</title></head><body>
<a href="../post1/#comments">Back</a>
</body></html>"#,
        )
        .file("https://example.com/blog/shared/logo.png", "image/png", b"\x89PNG\r\n\x1a\nlogo")
        .status("https://example.com/blog/missing/", 404)
}
