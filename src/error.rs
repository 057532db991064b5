//! Error types for URL handling, path mapping, fetching and persistence
//!
//! Every failure that concerns a single URL is isolated to that URL: the
//! controller records it on the URL's [`VisitRecord`](crate::VisitRecord) and
//! keeps crawling. Only configuration errors and metadata finalization
//! failures abort a run.

use std::path::PathBuf;

/// A reference that cannot be turned into a fetchable URL
///
/// These are dropped by callers and never retried.
///
/// # Examples
///
/// ```ignore
/// use sitemirror::{UrlError, UrlNormalizer};
///
/// match UrlNormalizer::normalize("mailto:someone@example.com", None) {
///     Err(UrlError::UnsupportedScheme { scheme, .. }) => assert_eq!(scheme, "mailto"),
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    /// The reference was empty or whitespace only
    #[error("Empty URL reference")]
    Empty,

    /// The reference could not be parsed or resolved
    #[error("Malformed URL '{url}': {reason}")]
    Malformed { url: String, reason: String },

    /// The reference resolved to a scheme other than http or https
    #[error("Unsupported scheme '{scheme}' in '{url}'")]
    UnsupportedScheme { url: String, scheme: String },

    /// The reference resolved to a URL without a host
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Failures of the URL to local path mapping
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The URL does not fall under the scope root
    #[error("{url} is outside the mirror scope")]
    OutOfScope { url: String },

    /// Two distinct URLs were mapped to the same local file
    #[error("{url} maps to {path}, already claimed by {owner}")]
    Collision {
        url: String,
        path: String,
        owner: String,
    },
}

/// Errors returned by a [`Fetcher`](crate::Fetcher)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connection, DNS, TLS or body transfer failure
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete within the transport timeout
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a non-success status
    #[error("HTTP error {0}")]
    Http(u16),
}

/// Errors raised by page and metadata sinks
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A filesystem operation failed
    #[error("Failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Metadata could not be encoded or decoded
    #[error("Failed to encode metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Illegal visitation state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VisitError {
    /// The URL was never discovered
    #[error("URL was never discovered: {0}")]
    Unknown(String),

    /// The requested transition is not allowed from the current state
    #[error("Cannot move {url} from {from:?} to {to:?}")]
    InvalidTransition {
        url: String,
        from: crate::VisitState,
        to: crate::VisitState,
    },
}

/// Errors that abort a whole mirroring run
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// The run was configured with invalid options
    #[error(transparent)]
    Config(#[from] crate::ConfigError),

    /// Metadata could not be persisted
    #[error(transparent)]
    Sink(#[from] SinkError),
}
