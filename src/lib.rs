//! Recursive site mirroring
//!
//! Starting from a root URL, a [`Controller`] fetches every page inside the
//! root's scope, rewrites in-scope links to relative local paths, and writes
//! a browsable copy of the site plus per-page metadata.

// Core modules
mod backend;
pub mod crawler;
mod error;
mod fetch;
mod normalize;
mod observer;
mod path_mapper;
mod rewriter;
mod sink;
mod visitation;

// Public exports
pub use backend::{Document, NodeId, SourceDocument};
pub use crawler::{
    ConfigError, Controller, ControllerBuilder, DEFAULT_OUTPUT_DIR, DelayLimiter, MirrorConfig,
    RateLimiter,
};
pub use error::{FetchError, MirrorError, PathError, SinkError, UrlError, VisitError};
pub use fetch::{
    DEFAULT_USER_AGENTS, FetchResponse, Fetcher, HttpFetcher, RotatingUserAgents,
    UserAgentStrategy,
};
pub use normalize::{NormalizedUrl, UrlNormalizer};
pub use observer::{
    CrawlStats, CrawlSummary, FailedUrl, MirrorObserver, ObserverRegistry, StatsTracker,
};
pub use path_mapper::{INDEX_FILE, Layout, LocalPath, PathMapper, Scope};
pub use rewriter::{DEFAULT_LINK_ATTRIBUTES, LinkRewriter, PageRewriteResult};
pub use sink::{
    FsMetadataSink, FsPageSink, INDEX_DOCUMENT, IndexDocument, METADATA_FILE, MetadataSink,
    PageSink, load_records,
};
pub use visitation::{
    FailureKind, PageOutcome, VisitCounts, VisitRecord, VisitState, VisitationStore,
};
