//! URL canonicalization
//!
//! Every URL the mirror touches goes through [`UrlNormalizer::normalize`], so
//! that equivalent references compare equal before they reach the visitation
//! store or the path mapper.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::UrlError;

/// An absolute http(s) URL in canonical form
///
/// Invariants:
/// - scheme is `http` or `https` and a host is present
/// - host is lowercase and the default port is stripped
/// - `.` and `..` segments are resolved
/// - no fragment, and no empty query
/// - a final path segment without an extension is treated as a directory and
///   carries a trailing slash (`/blog/post1` becomes `/blog/post1/`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedUrl(Url);

impl NormalizedUrl {
    /// The canonical URL string
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The underlying parsed URL
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    /// Explicit port, `None` when it is the scheme default
    pub fn port(&self) -> Option<u16> {
        self.0.port()
    }

    pub fn path(&self) -> &str {
        self.0.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.0.query()
    }

    /// Whether the path denotes a directory (ends with `/`)
    pub fn is_directory(&self) -> bool {
        self.0.path().ends_with('/')
    }

    /// The same URL without the trailing slash of a directory path
    ///
    /// `None` for the host root, whose slash is not optional.
    pub fn without_trailing_slash(&self) -> Option<Url> {
        let path = self.0.path();
        let trimmed = path.strip_suffix('/').filter(|p| !p.is_empty())?;
        let mut url = self.0.clone();
        url.set_path(trimmed);
        Some(url)
    }

    /// Non-empty path segments, in order
    pub fn segments(&self) -> Vec<&str> {
        self.0.path().split('/').filter(|s| !s.is_empty()).collect()
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizedUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UrlNormalizer::normalize(s, None)
    }
}

impl TryFrom<String> for NormalizedUrl {
    type Error = UrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NormalizedUrl> for String {
    fn from(url: NormalizedUrl) -> Self {
        url.0.into()
    }
}

/// Utility for canonicalizing and resolving URLs
pub struct UrlNormalizer;

impl UrlNormalizer {
    /// Resolve `raw` against `base` (if any) and canonicalize the result
    ///
    /// Relative references follow standard resolution: dot segments collapse,
    /// scheme and host are inherited, and `//host/path` keeps the base scheme.
    /// Fragments are dropped; query strings are kept as they are.
    pub fn normalize(raw: &str, base: Option<&NormalizedUrl>) -> Result<NormalizedUrl, UrlError> {
        Self::absolute(raw, base.map(NormalizedUrl::as_url)).map(Self::canonicalize)
    }

    /// Resolve `raw` against a URL that is not necessarily canonical
    ///
    /// Used with the address a page was actually served from, which may lack
    /// the trailing slash of its canonical form.
    pub fn resolve(raw: &str, base: &Url) -> Result<NormalizedUrl, UrlError> {
        Self::absolute(raw, Some(base)).map(Self::canonicalize)
    }

    /// Resolve `raw` to an absolute http(s) URL without the trailing-slash policy
    ///
    /// The fragment is dropped. This is the form to request from a server and
    /// to resolve further references against.
    pub fn absolute(raw: &str, base: Option<&Url>) -> Result<Url, UrlError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Empty);
        }

        let mut url = match base {
            Some(base) => base.join(trimmed),
            None => Url::parse(trimmed),
        }
        .map_err(|e| UrlError::Malformed {
            url: trimmed.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(UrlError::UnsupportedScheme {
                    url: url.to_string(),
                    scheme: other.to_string(),
                });
            }
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(UrlError::MissingHost(url.to_string()));
        }

        url.set_fragment(None);
        Ok(url)
    }

    fn canonicalize(mut url: Url) -> NormalizedUrl {
        if url.query() == Some("") {
            url.set_query(None);
        }

        let last = url.path().rsplit('/').next().unwrap_or_default();
        if !last.is_empty() && !has_extension(last) {
            let directory = format!("{}/", url.path());
            url.set_path(&directory);
        }

        NormalizedUrl(url)
    }
}

/// Whether a path segment looks like a file name (`name.ext`)
pub(crate) fn has_extension(segment: &str) -> bool {
    matches!(segment.rfind('.'), Some(i) if i > 0 && i + 1 < segment.len())
}

/// Split the fragment off a raw reference, returning it with its leading `#`
pub(crate) fn fragment_of(raw: &str) -> Option<&str> {
    raw.find('#').map(|i| &raw[i..]).filter(|f| f.len() > 1)
}
