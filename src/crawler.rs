//! Mirroring controller
//!
//! This module drives a mirroring run:
//! - **Frontier**: a FIFO of discovered, not yet fetched URLs
//! - **Deduplication**: the visitation store, owned by the controller task
//! - **Politeness**: a shared rate limiter spacing every physical request
//! - **Graceful cancellation**: interrupted URLs go back to Pending
//! - **Observability**: observers and a live statistics channel
//!
//! # Examples
//!
//! ## Basic Usage
//!
//! ```ignore
//! use sitemirror::Controller;
//! use tokio_util::sync::CancellationToken;
//!
//! let controller = Controller::builder("https://example.com/blog/")
//!     .output_dir("mirror")
//!     .delay(Duration::from_millis(500))
//!     .build()?;
//!
//! let summary = controller.run(CancellationToken::new()).await?;
//! println!("Mirrored {} pages", summary.pages_done);
//! ```
//!
//! ## Resuming
//!
//! ```ignore
//! let records = sitemirror::load_records(Path::new("mirror")).await?;
//! let controller = Controller::builder("https://example.com/blog/")
//!     .output_dir("mirror")
//!     .resume(records)
//!     .build()?;
//! ```
//!
//! # Concurrency
//!
//! The controller task alone touches the visitation store, the frontier and
//! the path registry. Workers fetch, rewrite and write pages, then report
//! back over a channel, so checking and marking a URL as known is a single
//! step with no lock involved.

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use futures_util::StreamExt;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::sleep_until,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    CrawlStats, CrawlSummary, FailedUrl, FailureKind, FetchError, FetchResponse, Fetcher,
    FsMetadataSink, FsPageSink, HttpFetcher, Layout, LinkRewriter, LocalPath, MetadataSink,
    MirrorError, MirrorObserver, NormalizedUrl, ObserverRegistry, PageOutcome, PageSink, PathError,
    PathMapper, RotatingUserAgents, Scope, SourceDocument, StatsTracker, UrlError, UrlNormalizer,
    UserAgentStrategy, VisitRecord, VisitState, VisitationStore,
};

/// Errors that can occur during controller configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The scope URL is not an absolute http(s) URL
    #[error("Invalid scope URL: {0}")]
    InvalidScopeUrl(#[source] UrlError),

    /// Concurrency must be greater than 0
    #[error("Concurrency must be greater than 0, got {0}")]
    InvalidConcurrency(usize),

    /// Request timeout must be greater than 0
    #[error("Request timeout must be greater than 0")]
    InvalidTimeout,

    /// The delay must be a finite, non-negative number of seconds
    #[error("Invalid delay: {0} seconds")]
    InvalidDelay(f64),

    /// An explicitly configured user agent list was empty
    #[error("User agent list must not be empty")]
    EmptyUserAgents,

    /// The output directory cannot be created
    #[error("Output directory '{}' is not writable: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Transport(#[source] FetchError),
}

/// Trait for implementing rate limiting strategies
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until the next request is allowed
    async fn acquire(&self);
}

/// Spaces consecutive requests at least `delay` apart
///
/// Slots are handed out in call order across every worker sharing the
/// limiter, so parallelism never shortens the gap between two requests.
pub struct DelayLimiter {
    delay: Duration,
    next_slot: Mutex<Option<tokio::time::Instant>>,
}

impl DelayLimiter {
    /// Create a new DelayLimiter
    ///
    /// # Arguments
    /// * `delay` - Minimum duration between the start of two requests
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait::async_trait]
impl RateLimiter for DelayLimiter {
    async fn acquire(&self) {
        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = tokio::time::Instant::now();
            let slot = match *next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            *next_slot = Some(slot + self.delay);
            slot
        };
        sleep_until(slot).await;
    }
}

// Configuration defaults
pub const DEFAULT_OUTPUT_DIR: &str = "downloaded_pages";
const DEFAULT_DELAY_MS: u64 = 1000;
const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;

/// Validated configuration for a mirroring run
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub(crate) scope_url: String,
    pub(crate) output_dir: PathBuf,
    pub(crate) delay: Duration,
    /// Rejected delay value, reported by `validate`
    pub(crate) invalid_delay: Option<f64>,
    pub(crate) layout: Layout,
    pub(crate) user_agents: Option<Vec<String>>,
    pub(crate) concurrency: usize,
    pub(crate) timeout: Duration,
    pub(crate) extra_attributes: Vec<(String, String)>,
}

impl MirrorConfig {
    fn new(scope_url: String) -> Self {
        Self {
            scope_url,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            invalid_delay: None,
            layout: Layout::Structured,
            user_agents: None,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            extra_attributes: Vec::new(),
        }
    }

    /// Validate the configuration and resolve the scope root
    pub fn validate(&self) -> Result<NormalizedUrl, ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(0));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        if let Some(secs) = self.invalid_delay {
            return Err(ConfigError::InvalidDelay(secs));
        }
        if self.user_agents.as_ref().is_some_and(Vec::is_empty) {
            return Err(ConfigError::EmptyUserAgents);
        }
        UrlNormalizer::normalize(&self.scope_url, None).map_err(ConfigError::InvalidScopeUrl)
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// One URL handed to a worker
struct FetchJob {
    url: NormalizedUrl,
    local_path: LocalPath,
    user_agent: String,
}

struct MirroredPage {
    outcome: PageOutcome,
    discovered: Vec<NormalizedUrl>,
}

enum CycleResult {
    Mirrored(MirroredPage),
    Failed(FailureKind),
    Interrupted,
}

struct CycleReport {
    url: NormalizedUrl,
    result: CycleResult,
}

/// Everything a worker needs to process one fetch cycle
struct Worker {
    fetcher: Arc<dyn Fetcher>,
    page_sink: Arc<dyn PageSink>,
    rewriter: Arc<LinkRewriter>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl Worker {
    async fn run_cycle(&self, job: FetchJob, cancel: &CancellationToken) -> CycleResult {
        // Only waiting and fetching are interruptible; once bytes are in hand
        // the page is written to completion.
        let response = tokio::select! {
            _ = cancel.cancelled() => return CycleResult::Interrupted,
            response = self.fetch_page(&job) => response,
        };

        match self.store_page(&job, response).await {
            Ok(page) => CycleResult::Mirrored(page),
            Err(failure) => CycleResult::Failed(failure),
        }
    }

    /// Fetch the page of `job`, falling back to the slash-less address
    ///
    /// Directory URLs are requested in their canonical form first. A server
    /// that only publishes `/about` answers 404 to `/about/`, so that case is
    /// retried once without the trailing slash.
    async fn fetch_page(&self, job: &FetchJob) -> Result<FetchResponse, FailureKind> {
        let result = self.follow_redirects(job, job.url.as_url().clone()).await;
        match (result, job.url.without_trailing_slash()) {
            (Err(FailureKind::Http { status: 404 }), Some(bare)) => {
                tracing::debug!(url = %job.url, retry = %bare, "Retrying without trailing slash");
                self.follow_redirects(job, bare).await
            }
            (result, _) => result,
        }
    }

    /// Request `target`, following redirects while they stay inside the scope
    ///
    /// Every hop is a separate request and waits for the rate limiter.
    async fn follow_redirects(&self, job: &FetchJob, mut target: Url) -> Result<FetchResponse, FailureKind> {
        for _ in 0..=MAX_REDIRECTS {
            self.rate_limiter.acquire().await;
            let response = self.fetcher.fetch(&target, &job.user_agent).await?;
            let Some(location) = response.location.clone() else {
                return Ok(response);
            };

            let next = UrlNormalizer::absolute(&location, Some(&response.url)).map_err(|error| {
                FailureKind::Network {
                    message: format!("unusable redirect from {}: {}", response.url, error),
                }
            })?;
            let in_scope = UrlNormalizer::normalize(next.as_str(), None)
                .is_ok_and(|url| self.rewriter.mapper().scope().contains(&url));
            if !in_scope {
                tracing::warn!(url = %job.url, location = %next, "Redirect leaves the scope, not following");
                return Err(FailureKind::RedirectOutOfScope {
                    location: next.to_string(),
                });
            }

            tracing::debug!(url = %job.url, from = %response.url, to = %next, status = response.status, "Following redirect");
            target = next;
        }
        Err(FailureKind::TooManyRedirects)
    }

    async fn store_page(
        &self,
        job: &FetchJob,
        response: Result<FetchResponse, FailureKind>,
    ) -> Result<MirroredPage, FailureKind> {
        let response = response?;
        let is_html = response.is_html();
        let FetchResponse {
            url: served_from,
            status,
            content_type,
            body,
            ..
        } = response;

        let (content, discovered, title) = if is_html {
            let mut document = SourceDocument::parse(body);
            let title = document.title();
            let rewritten = self.rewriter.rewrite_served(&job.url, &served_from, &mut document)?;
            tracing::debug!(
                url = %job.url,
                rewritten = rewritten.rewritten,
                discovered = rewritten.discovered.len(),
                "Rewrote page links"
            );
            (rewritten.content, rewritten.discovered, title)
        } else {
            (body, Vec::new(), None)
        };

        self.page_sink.write(&job.local_path, &content).await?;

        Ok(MirroredPage {
            outcome: PageOutcome {
                status,
                content_type,
                bytes: content.len() as u64,
                local_path: job.local_path.to_string(),
                title,
            },
            discovered,
        })
    }
}

/// Mirroring controller, one instance per run
///
/// Owns the visitation store, the frontier and the registry of claimed local
/// paths.
pub struct Controller {
    config: MirrorConfig,
    scope: NormalizedUrl,
    rewriter: Arc<LinkRewriter>,
    fetcher: Arc<dyn Fetcher>,
    page_sink: Arc<dyn PageSink>,
    metadata_sink: Box<dyn MetadataSink>,
    user_agents: Arc<dyn UserAgentStrategy>,
    rate_limiter: Arc<dyn RateLimiter>,
    observers: Arc<ObserverRegistry>,
    stats: Arc<StatsTracker>,
    store: VisitationStore,
    frontier: VecDeque<NormalizedUrl>,
    claimed: HashMap<LocalPath, String>,
    /// Directories created by claimed paths, keyed as entries of their parent
    directories: HashMap<LocalPath, String>,
    requests: u64,
}

impl Controller {
    /// Create a controller builder for the given scope URL
    pub fn builder(scope_url: impl Into<String>) -> ControllerBuilder {
        ControllerBuilder::new(scope_url)
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// The normalized scope root
    pub fn scope(&self) -> &NormalizedUrl {
        &self.scope
    }

    /// Get a snapshot of current crawl statistics
    pub fn stats(&self) -> CrawlStats {
        self.stats.snapshot()
    }

    /// Subscribe to real-time statistics updates
    ///
    /// The channel closes once [`Controller::run`] returns.
    pub fn subscribe_stats(&self) -> watch::Receiver<CrawlStats> {
        self.stats.subscribe()
    }

    /// Mirror the scope until the frontier is exhausted or `cancel` fires
    ///
    /// Per-URL failures are recorded and do not stop the run. The returned
    /// error is reserved for metadata that could not be persisted.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<CrawlSummary, MirrorError> {
        let started = Instant::now();
        tracing::info!(scope = %self.scope, output = %self.config.output_dir.display(), "Starting mirror");

        self.seed().await;

        let concurrency = self.config.concurrency;
        let (job_tx, job_rx) = mpsc::channel::<FetchJob>(concurrency);
        let (report_tx, mut report_rx) = mpsc::channel::<CycleReport>(concurrency);
        let workers = self.launch_workers(job_rx, report_tx, cancel.clone());

        let mut in_flight = 0usize;
        loop {
            while in_flight < concurrency && !cancel.is_cancelled() {
                let Some(job) = self.next_job().await else {
                    break;
                };
                if job_tx.send(job).await.is_err() {
                    tracing::error!("Worker pool stopped unexpectedly");
                    break;
                }
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            let Some(report) = report_rx.recv().await else {
                break;
            };
            in_flight -= 1;
            self.complete_cycle(report).await;
        }

        drop(job_tx);
        if let Err(error) = workers.await {
            tracing::error!(%error, "Worker pool failed");
        }

        for url in self.store.revert_in_flight() {
            tracing::debug!(%url, "Reverted unfinished URL to pending");
        }

        let unfinished: Vec<VisitRecord> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|record| !record.state.is_terminal())
            .collect();
        for record in &unfinished {
            self.record_metadata(record).await;
        }

        let summary = self.summary(started.elapsed(), cancel.is_cancelled());
        let index = self.metadata_sink.finalize(&summary).await?;
        tracing::info!(
            done = summary.pages_done,
            failed = summary.pages_failed,
            pending = summary.pages_pending,
            bytes = summary.total_bytes,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            index = %index.path,
            "Mirror finished"
        );

        self.observers.notify_crawl_complete(&summary).await;
        Ok(summary)
    }

    /// Queue the scope root, or the pending URLs of a resumed run
    async fn seed(&mut self) {
        if self.store.is_empty() {
            self.store.mark_pending(&self.scope);
        }

        for record in self.store.snapshot() {
            match record.state {
                VisitState::Pending | VisitState::InFlight => {
                    self.stats.url_queued();
                    self.observers.notify_url_queued(&record.url).await;
                    self.frontier.push_back(record.url);
                }
                VisitState::Done => {
                    if let Err(error) = self.claim_path(&record.url) {
                        tracing::warn!(url = %record.url, %error, "Resumed page no longer maps cleanly");
                    }
                    self.record_metadata(&record).await;
                }
                VisitState::Failed => self.record_metadata(&record).await,
            }
        }
    }

    /// Pop the next URL that can be dispatched
    async fn next_job(&mut self) -> Option<FetchJob> {
        while let Some(url) = self.frontier.pop_front() {
            if let Err(error) = self.store.mark_in_flight(&url) {
                tracing::warn!(%url, %error, "Skipping frontier entry");
                continue;
            }

            match self.claim_path(&url) {
                Ok(local_path) => {
                    let user_agent = self.user_agents.user_agent(self.requests).to_string();
                    self.requests += 1;
                    return Some(FetchJob {
                        url,
                        local_path,
                        user_agent,
                    });
                }
                Err(error) => self.fail(&url, error.into()).await,
            }
        }
        None
    }

    /// Reserve the local path of `url`, refusing paths owned by another URL
    ///
    /// A path also clashes when one of its directories is already a claimed
    /// file, or when it names a file where a claimed path needs a directory.
    fn claim_path(&mut self, url: &NormalizedUrl) -> Result<LocalPath, PathError> {
        let local_path = self.rewriter.mapper().to_local_path(url)?;
        let owner = match self.claimed.get(&local_path) {
            Some(owner) if owner == url.as_str() => return Ok(local_path),
            Some(owner) => Some(owner),
            None => self.directories.get(&local_path).or_else(|| {
                local_path
                    .directory_entries()
                    .find_map(|entry| self.claimed.get(&entry))
            }),
        };
        if let Some(owner) = owner {
            return Err(PathError::Collision {
                url: url.to_string(),
                path: local_path.to_string(),
                owner: owner.clone(),
            });
        }

        for entry in local_path.directory_entries() {
            self.directories.entry(entry).or_insert_with(|| url.to_string());
        }
        self.claimed.insert(local_path.clone(), url.to_string());
        Ok(local_path)
    }

    async fn complete_cycle(&mut self, report: CycleReport) {
        let CycleReport { url, result } = report;
        match result {
            CycleResult::Mirrored(page) => {
                let record = match self.store.mark_done(&url, page.outcome) {
                    Ok(record) => record.clone(),
                    Err(error) => {
                        tracing::error!(%url, %error, "Inconsistent visitation state");
                        return;
                    }
                };
                tracing::info!(
                    url = %record.url,
                    path = record.local_path.as_deref().unwrap_or_default(),
                    bytes = record.bytes,
                    "Mirrored page"
                );
                self.stats.page_mirrored(record.bytes);
                self.observers.notify_page_mirrored(&record).await;
                self.record_metadata(&record).await;

                for discovered in page.discovered {
                    self.enqueue(discovered).await;
                }
            }
            CycleResult::Failed(failure) => self.fail(&url, failure).await,
            CycleResult::Interrupted => match self.store.revert(&url) {
                Ok(()) => {
                    tracing::debug!(%url, "Fetch interrupted, URL left pending");
                    self.frontier.push_front(url);
                }
                Err(error) => tracing::error!(%url, %error, "Inconsistent visitation state"),
            },
        }
    }

    /// Mark an unseen URL pending and append it to the frontier
    async fn enqueue(&mut self, url: NormalizedUrl) {
        if !self.store.mark_pending(&url) {
            return;
        }
        self.stats.url_queued();
        self.observers.notify_url_queued(&url).await;
        self.frontier.push_back(url);
    }

    async fn fail(&mut self, url: &NormalizedUrl, failure: FailureKind) {
        let record = match self.store.mark_failed(url, failure.clone()) {
            Ok(record) => record.clone(),
            Err(error) => {
                tracing::error!(%url, %error, "Inconsistent visitation state");
                return;
            }
        };
        tracing::warn!(%url, %failure, "Failed to mirror URL");
        self.stats.page_failed();
        self.observers.notify_url_failed(url, &failure).await;
        self.record_metadata(&record).await;
    }

    async fn record_metadata(&mut self, record: &VisitRecord) {
        if let Err(error) = self.metadata_sink.record(record).await {
            tracing::warn!(url = %record.url, %error, "Failed to record metadata");
        }
    }

    fn summary(&self, elapsed: Duration, cancelled: bool) -> CrawlSummary {
        let counts = self.store.counts();
        let snapshot = self.store.snapshot();
        let total_bytes = snapshot
            .iter()
            .filter(|record| record.state == VisitState::Done)
            .map(|record| record.bytes)
            .sum();
        let failures = snapshot
            .into_iter()
            .filter_map(|record| {
                record.failure.map(|failure| FailedUrl {
                    url: record.url,
                    failure,
                })
            })
            .collect();

        CrawlSummary {
            scope: self.scope.clone(),
            pages_done: counts.done,
            pages_failed: counts.failed,
            pages_pending: counts.pending,
            total_bytes,
            elapsed,
            failures,
            cancelled,
        }
    }

    /// Launch the worker pool and return a handle to wait for completion
    fn launch_workers(
        &self,
        jobs: mpsc::Receiver<FetchJob>,
        reports: mpsc::Sender<CycleReport>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let concurrency = self.config.concurrency;
        let worker = Arc::new(Worker {
            fetcher: self.fetcher.clone(),
            page_sink: self.page_sink.clone(),
            rewriter: self.rewriter.clone(),
            rate_limiter: self.rate_limiter.clone(),
        });

        tokio::spawn(async move {
            ReceiverStream::new(jobs)
                .for_each_concurrent(concurrency, |job| {
                    let worker = worker.clone();
                    let reports = reports.clone();
                    let cancel = cancel.clone();

                    async move {
                        let url = job.url.clone();
                        let result = worker.run_cycle(job, &cancel).await;
                        if reports.send(CycleReport { url, result }).await.is_err() {
                            tracing::error!("Controller stopped before a cycle report was delivered");
                        }
                    }
                })
                .await;
        })
    }
}

/// Builder for configuring a [`Controller`]
pub struct ControllerBuilder {
    config: MirrorConfig,
    observers: Vec<Arc<dyn MirrorObserver>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    page_sink: Option<Arc<dyn PageSink>>,
    metadata_sink: Option<Box<dyn MetadataSink>>,
    user_agents: Option<Arc<dyn UserAgentStrategy>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    resume: Vec<VisitRecord>,
}

impl ControllerBuilder {
    pub fn new(scope_url: impl Into<String>) -> Self {
        Self {
            config: MirrorConfig::new(scope_url.into()),
            observers: Vec::new(),
            fetcher: None,
            page_sink: None,
            metadata_sink: None,
            user_agents: None,
            rate_limiter: None,
            resume: Vec::new(),
        }
    }

    /// Set the output root (default: `downloaded_pages`)
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Set the minimum delay between two requests (default: 1s)
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self.config.invalid_delay = None;
        self
    }

    /// Set the minimum delay between two requests in seconds
    ///
    /// Negative and non-finite values are rejected by [`ControllerBuilder::build`].
    pub fn delay_secs(mut self, secs: f64) -> Self {
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => self.delay(delay),
            Err(_) => {
                self.config.invalid_delay = Some(secs);
                self
            }
        }
    }

    /// Mirror the URL hierarchy (default), or store hash-named files in a flat directory
    pub fn preserve_structure(mut self, preserve: bool) -> Self {
        self.config.layout = if preserve {
            Layout::Structured
        } else {
            Layout::Flat
        };
        self
    }

    /// User agents rotated through per request (default: three desktop browsers)
    pub fn user_agents(mut self, agents: Vec<String>) -> Self {
        self.config.user_agents = Some(agents);
        self
    }

    /// Set the number of concurrent fetch workers (default: 1)
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the per-request timeout of the default HTTP fetcher (default: 30s)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Rewrite an extra (tag, attribute) pair besides the defaults
    pub fn rewrite_attribute(mut self, tag: &str, attr: &str) -> Self {
        self.config
            .extra_attributes
            .push((tag.to_string(), attr.to_string()));
        self
    }

    /// Register an observer to receive crawl events
    pub fn observe_with(mut self, observer: Arc<dyn MirrorObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replace the HTTP transport
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replace the filesystem page sink
    pub fn page_sink(mut self, sink: Arc<dyn PageSink>) -> Self {
        self.page_sink = Some(sink);
        self
    }

    /// Replace the filesystem metadata sink
    pub fn metadata_sink(mut self, sink: Box<dyn MetadataSink>) -> Self {
        self.metadata_sink = Some(sink);
        self
    }

    /// Replace the round-robin user agent rotation
    pub fn user_agent_strategy(mut self, strategy: Arc<dyn UserAgentStrategy>) -> Self {
        self.user_agents = Some(strategy);
        self
    }

    /// Replace the delay-based rate limiter
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Continue a previous run from its recorded visits
    pub fn resume(mut self, records: Vec<VisitRecord>) -> Self {
        self.resume = records;
        self
    }

    /// Build the Controller with the configured settings
    pub fn build(self) -> Result<Controller, ConfigError> {
        let scope = self.config.validate()?;

        std::fs::create_dir_all(&self.config.output_dir).map_err(|source| ConfigError::OutputDir {
            path: self.config.output_dir.clone(),
            source,
        })?;

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(self.config.timeout).map_err(ConfigError::Transport)?),
        };
        let page_sink = self
            .page_sink
            .unwrap_or_else(|| Arc::new(FsPageSink::new(&self.config.output_dir)));
        let metadata_sink = self
            .metadata_sink
            .unwrap_or_else(|| Box::new(FsMetadataSink::new(&self.config.output_dir)));
        let user_agents = self
            .user_agents
            .unwrap_or_else(|| match &self.config.user_agents {
                Some(agents) => Arc::new(RotatingUserAgents::new(agents.clone())),
                None => Arc::new(RotatingUserAgents::default()),
            });
        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| Arc::new(DelayLimiter::new(self.config.delay)));

        let mapper = PathMapper::new(Scope::new(scope.clone()), self.config.layout);
        let rewriter = self
            .config
            .extra_attributes
            .iter()
            .fold(LinkRewriter::new(mapper), |rewriter, (tag, attr)| {
                rewriter.with_attribute(tag, attr)
            });

        let mut registry = ObserverRegistry::new();
        for observer in self.observers {
            registry.register(observer);
        }

        let claimed = metadata_sink
            .reserved_paths()
            .into_iter()
            .map(|path| (path, "generated file".to_string()))
            .collect();

        Ok(Controller {
            config: self.config,
            scope,
            rewriter: Arc::new(rewriter),
            fetcher,
            page_sink,
            metadata_sink,
            user_agents,
            rate_limiter,
            observers: Arc::new(registry),
            stats: Arc::new(StatsTracker::new()),
            store: VisitationStore::from_records(self.resume),
            frontier: VecDeque::new(),
            claimed,
            directories: HashMap::new(),
            requests: 0,
        })
    }
}
