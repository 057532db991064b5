//! Crawl observation: event hooks, live statistics and the final summary

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::sync::watch;

use crate::{FailureKind, NormalizedUrl, VisitRecord};

/// Observer trait for receiving crawl events
///
/// Implement this trait to monitor crawl progress, collect custom metrics,
/// or implement custom reporting.
///
/// # Example
///
/// ```ignore
/// use sitemirror::{MirrorObserver, VisitRecord};
///
/// struct PrintingObserver;
///
/// #[async_trait::async_trait]
/// impl MirrorObserver for PrintingObserver {
///     async fn on_page_mirrored(&self, record: &VisitRecord) {
///         println!("Saved {}", record.url);
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait MirrorObserver: Send + Sync {
    /// Called when a URL is added to the frontier
    async fn on_url_queued(&self, _url: &NormalizedUrl) {}

    /// Called when a URL has been fetched and written
    async fn on_page_mirrored(&self, _record: &VisitRecord) {}

    /// Called when a URL could not be mirrored
    async fn on_url_failed(&self, _url: &NormalizedUrl, _failure: &FailureKind) {}

    /// Called once the run is over
    async fn on_crawl_complete(&self, _summary: &CrawlSummary) {}
}

/// Registry for managing multiple observers
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn MirrorObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer to receive crawl events
    pub fn register(&mut self, observer: Arc<dyn MirrorObserver>) {
        self.observers.push(observer);
    }

    pub async fn notify_url_queued(&self, url: &NormalizedUrl) {
        for observer in &self.observers {
            observer.on_url_queued(url).await;
        }
    }

    pub async fn notify_page_mirrored(&self, record: &VisitRecord) {
        for observer in &self.observers {
            observer.on_page_mirrored(record).await;
        }
    }

    pub async fn notify_url_failed(&self, url: &NormalizedUrl, failure: &FailureKind) {
        for observer in &self.observers {
            observer.on_url_failed(url, failure).await;
        }
    }

    pub async fn notify_crawl_complete(&self, summary: &CrawlSummary) {
        for observer in &self.observers {
            observer.on_crawl_complete(summary).await;
        }
    }
}

/// Live counters of a running crawl
#[derive(Debug, Clone)]
pub struct CrawlStats {
    /// URLs added to the frontier, seeds included
    pub urls_queued: usize,
    /// Pages fetched and written
    pub pages_mirrored: usize,
    /// URLs that ended in failure
    pub pages_failed: usize,
    /// Bytes written by the page sink
    pub bytes_written: u64,
    /// When the crawl started
    pub start_time: Instant,
    /// When these stats were last updated
    pub last_update: Instant,
}

impl CrawlStats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            urls_queued: 0,
            pages_mirrored: 0,
            pages_failed: 0,
            bytes_written: 0,
            start_time: now,
            last_update: now,
        }
    }

    /// Get elapsed time since the crawl started
    pub fn elapsed(&self) -> Duration {
        self.last_update.duration_since(self.start_time)
    }

    /// Mirrored pages per second
    pub fn pages_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.pages_mirrored as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl Default for CrawlStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe statistics tracker with real-time broadcasting
///
/// Subscribers see the channel close when the tracker is dropped at the end
/// of the run.
pub struct StatsTracker {
    urls_queued: AtomicUsize,
    pages_mirrored: AtomicUsize,
    pages_failed: AtomicUsize,
    bytes_written: AtomicU64,
    start_time: Instant,
    tx: watch::Sender<CrawlStats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CrawlStats::new());
        Self {
            urls_queued: AtomicUsize::new(0),
            pages_mirrored: AtomicUsize::new(0),
            pages_failed: AtomicUsize::new(0),
            bytes_written: AtomicU64::new(0),
            start_time: Instant::now(),
            tx,
        }
    }

    /// Subscribe to statistics updates
    pub fn subscribe(&self) -> watch::Receiver<CrawlStats> {
        self.tx.subscribe()
    }

    pub fn url_queued(&self) {
        // Relaxed: counters are informational only
        self.urls_queued.fetch_add(1, Ordering::Relaxed);
        self.broadcast();
    }

    pub fn page_mirrored(&self, bytes: u64) {
        self.pages_mirrored.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.broadcast();
    }

    pub fn page_failed(&self) {
        self.pages_failed.fetch_add(1, Ordering::Relaxed);
        self.broadcast();
    }

    fn broadcast(&self) {
        self.tx.send_replace(self.snapshot());
    }

    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> CrawlStats {
        CrawlStats {
            urls_queued: self.urls_queued.load(Ordering::Relaxed),
            pages_mirrored: self.pages_mirrored.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            start_time: self.start_time,
            last_update: Instant::now(),
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A URL that could not be mirrored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUrl {
    pub url: NormalizedUrl,
    pub failure: FailureKind,
}

/// Outcome of a finished (or cancelled) run
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub scope: NormalizedUrl,
    pub pages_done: usize,
    pub pages_failed: usize,
    /// URLs still Pending, non-zero only after cancellation
    pub pages_pending: usize,
    pub total_bytes: u64,
    #[serde(skip)]
    pub elapsed: Duration,
    /// Failed URLs in discovery order
    #[serde(skip)]
    pub failures: Vec<FailedUrl>,
    pub cancelled: bool,
}
