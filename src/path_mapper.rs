//! Deterministic mapping from in-scope URLs to files under the output root
//!
//! The mapping only looks at the URL and the scope, never at what has been
//! fetched, so the link rewriter can compute the local path of a page that
//! has not been mirrored yet.
//!
//! # Structured layout
//!
//! Each URL path segment becomes a directory. Directory URLs (trailing `/`)
//! get an `index.html` file. Three rules keep distinct URLs apart:
//!
//! 1. a directory segment that carries an extension gets a `_dir` suffix, so
//!    `/v1.2/` never clashes with the file `/v1.2`
//! 2. a literal `index.html` file gains an underscore (`index_.html`), as does
//!    any `index_…_.html`, so `/a/index.html` never clashes with the index
//!    document of `/a/`
//! 3. a URL with a query gets `-<8 hex digits of sha256(query)>` before its
//!    extension, so `/list?page=2` and `/list?page=3` land in different files
//!
//! The rules are not a bijection. A file literally named `/v1.2_dir` maps to
//! the same name as the directory of `/v1.2/`, and a query hash can in
//! principle repeat. The controller's path registry catches both. Besides
//! exact repeats it refuses a file standing where a claimed path needs a
//! directory, and the reverse.
//!
//! # Flat layout
//!
//! Every URL becomes `<16 hex digits of sha256(url)>.<ext>` directly in the
//! output root.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};

use crate::{NormalizedUrl, PathError, normalize::has_extension};

/// File name of the document stored for directory URLs
pub const INDEX_FILE: &str = "index.html";

const DIRECTORY_SUFFIX: &str = "_dir";
const QUERY_HASH_LEN: usize = 8;
const FLAT_HASH_LEN: usize = 16;

/// A file location relative to the output root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalPath {
    dirs: Vec<String>,
    file: String,
}

impl LocalPath {
    /// Create a local path from directory segments and a file name
    pub fn new(dirs: Vec<String>, file: impl Into<String>) -> Self {
        Self {
            dirs,
            file: file.into(),
        }
    }

    /// A file directly under the output root
    pub fn root_file(file: impl Into<String>) -> Self {
        Self::new(Vec::new(), file)
    }

    pub fn dirs(&self) -> &[String] {
        &self.dirs
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Each directory of this path, as the entry it occupies in its parent
    ///
    /// `blog/post1/index.html` yields `blog` and `blog/post1`.
    pub fn directory_entries(&self) -> impl Iterator<Item = LocalPath> + '_ {
        (0..self.dirs.len()).map(|i| LocalPath::new(self.dirs[..i].to_vec(), self.dirs[i].clone()))
    }

    /// Absolute location of this file under `root`
    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(&self.dirs);
        path.push(&self.file);
        path
    }

    /// Relative URL reference to this file from a page stored at `from`
    ///
    /// Resolving the result against `from`'s location yields `self`, wherever
    /// the output tree is moved.
    pub fn relative_from(&self, from: &LocalPath) -> String {
        let common = self
            .dirs
            .iter()
            .zip(&from.dirs)
            .take_while(|(a, b)| a == b)
            .count();

        let mut parts: Vec<String> = std::iter::repeat_n("..".to_string(), from.dirs.len() - common)
            .collect();
        parts.extend(self.dirs[common..].iter().map(|d| escape_component(d)));
        parts.push(escape_component(&self.file));
        parts.join("/")
    }
}

impl fmt::Display for LocalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dir in &self.dirs {
            write!(f, "{}/", dir)?;
        }
        f.write_str(&self.file)
    }
}

/// Characters that are literal in file names but special in URL references
pub(crate) fn escape_component(component: &str) -> String {
    component
        .replace('%', "%25")
        .replace('?', "%3F")
        .replace('#', "%23")
}

/// How URLs are laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Mirror the URL path hierarchy
    #[default]
    Structured,
    /// Hash-named files in the output root
    Flat,
}

/// The set of URLs eligible for mirroring
#[derive(Debug, Clone)]
pub struct Scope {
    root: NormalizedUrl,
    prefix: String,
}

impl Scope {
    /// Scope everything under the directory of `root`
    pub fn new(root: NormalizedUrl) -> Self {
        let path = root.path();
        let prefix = match path.rfind('/') {
            Some(i) => path[..=i].to_string(),
            None => "/".to_string(),
        };
        Self { root, prefix }
    }

    pub fn root(&self) -> &NormalizedUrl {
        &self.root
    }

    /// Path prefix every in-scope URL starts with
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Same scheme, host and port as the root, and a path under its prefix
    pub fn contains(&self, url: &NormalizedUrl) -> bool {
        url.scheme() == self.root.scheme()
            && url.host() == self.root.host()
            && url.port() == self.root.port()
            && url.path().starts_with(&self.prefix)
    }
}

/// Maps normalized URLs to local paths for one scope
#[derive(Debug, Clone)]
pub struct PathMapper {
    scope: Scope,
    layout: Layout,
}

impl PathMapper {
    pub fn new(scope: Scope, layout: Layout) -> Self {
        Self { scope, layout }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Local path for `url`, or [`PathError::OutOfScope`]
    pub fn to_local_path(&self, url: &NormalizedUrl) -> Result<LocalPath, PathError> {
        if !self.scope.contains(url) {
            return Err(PathError::OutOfScope {
                url: url.to_string(),
            });
        }

        Ok(match self.layout {
            Layout::Structured => structured_path(url),
            Layout::Flat => flat_path(url),
        })
    }
}

fn structured_path(url: &NormalizedUrl) -> LocalPath {
    let segments = url.segments();
    let (dir_segments, file) = match segments.split_last() {
        Some((last, rest)) if !url.is_directory() => (rest, file_name(last)),
        _ => (segments.as_slice(), INDEX_FILE.to_string()),
    };

    let dirs = dir_segments.iter().map(|s| directory_name(s)).collect();
    let file = match url.query() {
        Some(query) => insert_before_extension(&file, &short_hash(query, QUERY_HASH_LEN)),
        None => file,
    };
    LocalPath::new(dirs, file)
}

fn flat_path(url: &NormalizedUrl) -> LocalPath {
    let extension = url
        .segments()
        .last()
        .filter(|last| !url.is_directory() && has_extension(last))
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext.to_string())
        .unwrap_or_else(|| "html".to_string());

    LocalPath::root_file(format!(
        "{}.{}",
        short_hash(url.as_str(), FLAT_HASH_LEN),
        extension
    ))
}

fn directory_name(segment: &str) -> String {
    if has_extension(segment) {
        format!("{}{}", segment, DIRECTORY_SUFFIX)
    } else {
        segment.to_string()
    }
}

fn file_name(segment: &str) -> String {
    let is_index_like = segment
        .strip_prefix("index")
        .and_then(|rest| rest.strip_suffix(".html"))
        .is_some_and(|underscores| underscores.bytes().all(|b| b == b'_'));

    if is_index_like {
        format!("{}_.html", &segment[..segment.len() - ".html".len()])
    } else {
        segment.to_string()
    }
}

fn insert_before_extension(file: &str, tag: &str) -> String {
    match file.rsplit_once('.') {
        Some((stem, ext)) if has_extension(file) => format!("{}-{}.{}", stem, tag, ext),
        _ => format!("{}-{}", file, tag),
    }
}

fn short_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(len);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_before_extension() {
        assert_eq!(insert_before_extension("index.html", "abc"), "index-abc.html");
        assert_eq!(insert_before_extension("archive.tar.gz", "abc"), "archive.tar-abc.gz");
        assert_eq!(insert_before_extension("README", "abc"), "README-abc");
    }

    #[test]
    fn test_index_like_file_names_gain_underscore() {
        assert_eq!(file_name("index.html"), "index_.html");
        assert_eq!(file_name("index_.html"), "index__.html");
        assert_eq!(file_name("index.htm"), "index.htm");
        assert_eq!(file_name("index-2.html"), "index-2.html");
    }

    #[test]
    fn test_escape_component() {
        assert_eq!(escape_component("a%20b"), "a%2520b");
        assert_eq!(escape_component("plain.html"), "plain.html");
    }

    #[test]
    fn test_short_hash_is_stable() {
        assert_eq!(short_hash("page=2", 8), short_hash("page=2", 8));
        assert_ne!(short_hash("page=2", 8), short_hash("page=3", 8));
        assert_eq!(short_hash("x", 16).len(), 16);
    }
}
