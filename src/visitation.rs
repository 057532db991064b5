//! Per-URL visitation state
//!
//! The store is the only authority on whether a URL has been seen. Records
//! are appended when a URL is first discovered and never removed, so the
//! final metadata can list every URL the run touched.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FetchError, NormalizedUrl, PathError, SinkError, VisitError};

/// Lifecycle of a URL within one run
///
/// `Pending -> InFlight -> Done | Failed`. Done and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitState {
    Pending,
    InFlight,
    Done,
    Failed,
}

impl VisitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Why a URL could not be mirrored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    #[error("NetworkError({message})")]
    Network { message: String },

    #[error("Timeout")]
    Timeout,

    #[error("HTTPError({status})")]
    Http { status: u16 },

    #[error("OutOfScope")]
    OutOfScope,

    /// The server redirected to a URL outside the scope, which was not followed
    #[error("RedirectOutOfScope({location})")]
    RedirectOutOfScope { location: String },

    #[error("TooManyRedirects")]
    TooManyRedirects,

    #[error("PathCollision({path} already used by {owner})")]
    PathCollision { path: String, owner: String },

    #[error("WriteError({message})")]
    Write { message: String },
}

impl From<FetchError> for FailureKind {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Network(message) => Self::Network { message },
            FetchError::Timeout => Self::Timeout,
            FetchError::Http(status) => Self::Http { status },
        }
    }
}

impl From<PathError> for FailureKind {
    fn from(error: PathError) -> Self {
        match error {
            PathError::OutOfScope { .. } => Self::OutOfScope,
            PathError::Collision { path, owner, .. } => Self::PathCollision { path, owner },
        }
    }
}

impl From<SinkError> for FailureKind {
    fn from(error: SinkError) -> Self {
        Self::Write {
            message: error.to_string(),
        }
    }
}

/// Facts about a successfully mirrored URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    pub status: u16,
    pub content_type: String,
    pub bytes: u64,
    pub local_path: String,
    pub title: Option<String>,
}

/// Everything known about one URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub url: NormalizedUrl,
    pub state: VisitState,
    /// Not persisted, so that metadata stays identical across runs
    #[serde(skip, default = "Utc::now")]
    pub discovered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl VisitRecord {
    fn pending(url: NormalizedUrl) -> Self {
        Self {
            url,
            state: VisitState::Pending,
            discovered_at: Utc::now(),
            status: None,
            content_type: None,
            bytes: 0,
            local_path: None,
            title: None,
            failure: None,
        }
    }
}

/// Counts of records per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisitCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub done: usize,
    pub failed: usize,
}

/// Append-only record of every discovered URL
#[derive(Debug, Default)]
pub struct VisitationStore {
    index: HashMap<NormalizedUrl, usize>,
    records: Vec<VisitRecord>,
}

impl VisitationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a previous run's records
    ///
    /// Terminal records are kept as they are; anything else becomes Pending
    /// again so it is retried. Duplicate URLs keep their first record.
    pub fn from_records(records: impl IntoIterator<Item = VisitRecord>) -> Self {
        let mut store = Self::new();
        for mut record in records {
            if store.is_known(&record.url) {
                continue;
            }
            if !record.state.is_terminal() {
                record.state = VisitState::Pending;
            }
            store.index.insert(record.url.clone(), store.records.len());
            store.records.push(record);
        }
        store
    }

    pub fn is_known(&self, url: &NormalizedUrl) -> bool {
        self.index.contains_key(url)
    }

    /// Register a newly discovered URL
    ///
    /// Returns `true` if the URL was unknown. Known URLs, in any state, are
    /// left untouched.
    pub fn mark_pending(&mut self, url: &NormalizedUrl) -> bool {
        if self.is_known(url) {
            return false;
        }
        self.index.insert(url.clone(), self.records.len());
        self.records.push(VisitRecord::pending(url.clone()));
        true
    }

    pub fn mark_in_flight(&mut self, url: &NormalizedUrl) -> Result<(), VisitError> {
        self.transition(url, VisitState::Pending, VisitState::InFlight)
            .map(|_| ())
    }

    pub fn mark_done(&mut self, url: &NormalizedUrl, outcome: PageOutcome) -> Result<&VisitRecord, VisitError> {
        let record = self.transition(url, VisitState::InFlight, VisitState::Done)?;
        record.status = Some(outcome.status);
        record.content_type = Some(outcome.content_type);
        record.bytes = outcome.bytes;
        record.local_path = Some(outcome.local_path);
        record.title = outcome.title;
        Ok(record)
    }

    pub fn mark_failed(&mut self, url: &NormalizedUrl, failure: FailureKind) -> Result<&VisitRecord, VisitError> {
        let record = self.transition(url, VisitState::InFlight, VisitState::Failed)?;
        if let FailureKind::Http { status } = failure {
            record.status = Some(status);
        }
        record.failure = Some(failure);
        Ok(record)
    }

    /// Move every InFlight URL back to Pending, returning them in discovery order
    pub fn revert_in_flight(&mut self) -> Vec<NormalizedUrl> {
        self.records
            .iter_mut()
            .filter(|record| record.state == VisitState::InFlight)
            .map(|record| {
                record.state = VisitState::Pending;
                record.url.clone()
            })
            .collect()
    }

    /// Revert a single InFlight URL to Pending
    pub fn revert(&mut self, url: &NormalizedUrl) -> Result<(), VisitError> {
        self.transition(url, VisitState::InFlight, VisitState::Pending)
            .map(|_| ())
    }

    pub fn record(&self, url: &NormalizedUrl) -> Option<&VisitRecord> {
        self.index.get(url).map(|&i| &self.records[i])
    }

    /// Pending URLs in discovery order
    pub fn pending(&self) -> impl Iterator<Item = &NormalizedUrl> {
        self.records
            .iter()
            .filter(|record| record.state == VisitState::Pending)
            .map(|record| &record.url)
    }

    /// All records in discovery order
    pub fn snapshot(&self) -> Vec<VisitRecord> {
        self.records.clone()
    }

    pub fn counts(&self) -> VisitCounts {
        self.records
            .iter()
            .fold(VisitCounts::default(), |mut counts, record| {
                match record.state {
                    VisitState::Pending => counts.pending += 1,
                    VisitState::InFlight => counts.in_flight += 1,
                    VisitState::Done => counts.done += 1,
                    VisitState::Failed => counts.failed += 1,
                }
                counts
            })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn transition(
        &mut self,
        url: &NormalizedUrl,
        from: VisitState,
        to: VisitState,
    ) -> Result<&mut VisitRecord, VisitError> {
        let &index = self
            .index
            .get(url)
            .ok_or_else(|| VisitError::Unknown(url.to_string()))?;
        let record = &mut self.records[index];
        if record.state != from {
            return Err(VisitError::InvalidTransition {
                url: url.to_string(),
                from: record.state,
                to,
            });
        }
        record.state = to;
        Ok(record)
    }
}
