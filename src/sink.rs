//! Persistence of mirrored pages and run metadata
//!
//! Pages are written all-or-nothing: bytes go to a hidden sibling file that is
//! renamed over the final name, so an interrupted run never leaves a
//! truncated page behind.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    CrawlSummary, LocalPath, NormalizedUrl, SinkError, VisitRecord, VisitState,
    path_mapper::escape_component,
};

/// Per-record metadata written at the output root
pub const METADATA_FILE: &str = "metadata.json";

/// Listing of every mirrored page written at the output root
pub const INDEX_DOCUMENT: &str = "mirror-index.html";

/// Destination for mirrored page bytes
#[async_trait::async_trait]
pub trait PageSink: Send + Sync {
    /// Store `bytes` at `path`, creating parent directories as needed
    async fn write(&self, path: &LocalPath, bytes: &[u8]) -> Result<(), SinkError>;
}

/// Writes pages below a root directory
#[derive(Debug, Clone)]
pub struct FsPageSink {
    root: PathBuf,
}

impl FsPageSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl PageSink for FsPageSink {
    async fn write(&self, path: &LocalPath, bytes: &[u8]) -> Result<(), SinkError> {
        write_atomic(&path.to_path(&self.root), bytes).await
    }
}

/// The rendered top-level index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    pub path: LocalPath,
    pub html: String,
    /// Number of mirrored pages listed
    pub entries: usize,
}

/// Collects per-URL facts and renders the run's index
#[async_trait::async_trait]
pub trait MetadataSink: Send {
    /// Record the latest state of a URL, replacing any earlier record
    async fn record(&mut self, record: &VisitRecord) -> Result<(), SinkError>;

    /// Persist everything recorded and render the index document
    async fn finalize(&mut self, summary: &CrawlSummary) -> Result<IndexDocument, SinkError>;

    /// Files this sink writes into the output tree
    ///
    /// The controller never maps a URL onto one of these.
    fn reserved_paths(&self) -> Vec<LocalPath> {
        Vec::new()
    }
}

#[derive(Serialize, Deserialize)]
struct MetadataFile {
    scope: NormalizedUrl,
    pages_done: usize,
    pages_failed: usize,
    pages_pending: usize,
    total_bytes: u64,
    cancelled: bool,
    pages: Vec<VisitRecord>,
}

/// Writes `metadata.json` and `mirror-index.html` at the output root
///
/// Records are kept sorted by URL and carry no timestamps, so an unchanged
/// site produces identical files on every run.
#[derive(Debug)]
pub struct FsMetadataSink {
    root: PathBuf,
    records: BTreeMap<NormalizedUrl, VisitRecord>,
}

impl FsMetadataSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            records: BTreeMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl MetadataSink for FsMetadataSink {
    async fn record(&mut self, record: &VisitRecord) -> Result<(), SinkError> {
        self.records.insert(record.url.clone(), record.clone());
        Ok(())
    }

    async fn finalize(&mut self, summary: &CrawlSummary) -> Result<IndexDocument, SinkError> {
        let metadata = MetadataFile {
            scope: summary.scope.clone(),
            pages_done: summary.pages_done,
            pages_failed: summary.pages_failed,
            pages_pending: summary.pages_pending,
            total_bytes: summary.total_bytes,
            cancelled: summary.cancelled,
            pages: self.records.values().cloned().collect(),
        };
        let mut json = serde_json::to_vec_pretty(&metadata)?;
        json.push(b'\n');
        write_atomic(&self.root.join(METADATA_FILE), &json).await?;

        let mirrored: Vec<&VisitRecord> = self
            .records
            .values()
            .filter(|record| record.state == VisitState::Done)
            .collect();
        let html = render_index(summary, &mirrored);
        let path = LocalPath::root_file(INDEX_DOCUMENT);
        write_atomic(&path.to_path(&self.root), html.as_bytes()).await?;

        Ok(IndexDocument {
            path,
            html,
            entries: mirrored.len(),
        })
    }

    fn reserved_paths(&self) -> Vec<LocalPath> {
        vec![
            LocalPath::root_file(METADATA_FILE),
            LocalPath::root_file(INDEX_DOCUMENT),
        ]
    }
}

/// Records of a previous run, for resuming
///
/// Returns an empty list when the output root holds no metadata.
pub async fn load_records(root: &Path) -> Result<Vec<VisitRecord>, SinkError> {
    let path = root.join(METADATA_FILE);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let metadata: MetadataFile = serde_json::from_slice(&bytes)?;
            Ok(metadata.pages)
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(SinkError::io(path, error)),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SinkError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = path.with_file_name(format!(".{}.part", file_name));

    tokio::fs::write(&partial, bytes)
        .await
        .map_err(|e| SinkError::io(&partial, e))?;
    if let Err(error) = tokio::fs::rename(&partial, path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(SinkError::io(path, error));
    }
    Ok(())
}

fn render_index(summary: &CrawlSummary, mirrored: &[&VisitRecord]) -> String {
    let scope = escape_html(summary.scope.as_str());
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>Mirror of {}</title>\n</head>\n<body>\n", scope));
    html.push_str(&format!("<h1>Mirror of <a href=\"{0}\">{0}</a></h1>\n", scope));
    html.push_str(&format!(
        "<p>{} pages mirrored, {} failed, {} bytes.</p>\n",
        summary.pages_done, summary.pages_failed, summary.total_bytes
    ));
    html.push_str("<table>\n<tr><th>Page</th><th>Original URL</th><th>Bytes</th></tr>\n");

    for record in mirrored {
        let local = record.local_path.as_deref().unwrap_or_default();
        let label = record.title.as_deref().unwrap_or(local);
        let url = escape_html(record.url.as_str());
        html.push_str(&format!(
            "<tr><td><a href=\"{}\">{}</a></td><td><a href=\"{}\">{}</a></td><td>{}</td></tr>\n",
            escape_html(&escape_component(local)),
            escape_html(label),
            url,
            url,
            record.bytes
        ));
    }

    html.push_str("</table>\n</body>\n</html>\n");
    html
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
