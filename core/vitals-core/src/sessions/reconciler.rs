//! Primary + legacy session merge.
//!
//! The reconciler keeps the last snapshot seen from each source in its own
//! cell and rebuilds the merged view from both cells on every update. No
//! ordering between the two sources is assumed: either may arrive first, more
//! than once, or never.
//!
//! Primary wins per key. Legacy only fills keys the primary store lacks; the
//! override is per record, never per field.

use serde_json::Value;
use tracing::{debug, warn};

use super::SessionMap;
use crate::snapshot::decode_entries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionSource {
    Primary,
    Legacy,
}

impl SessionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionSource::Primary => "primary",
            SessionSource::Legacy => "legacy",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceUpdate {
    Snapshot(SessionMap),
    /// The source could not be read; it contributes nothing until it recovers.
    Unavailable(String),
}

impl SourceUpdate {
    pub fn from_snapshot(source: SessionSource, snapshot: Option<Value>) -> Self {
        SourceUpdate::Snapshot(decode_entries(snapshot, source.as_str()))
    }
}

pub fn merge(primary: &SessionMap, legacy: &SessionMap) -> SessionMap {
    let mut merged = primary.clone();
    for (key, record) in legacy {
        merged.entry(key.clone()).or_insert_with(|| record.clone());
    }
    merged
}

#[derive(Debug, Clone, Default)]
struct SourceCell {
    sessions: SessionMap,
    unavailable: Option<String>,
}

impl SourceCell {
    fn store(&mut self, update: SourceUpdate) {
        match update {
            SourceUpdate::Snapshot(sessions) => {
                self.sessions = sessions;
                self.unavailable = None;
            }
            SourceUpdate::Unavailable(reason) => {
                self.sessions.clear();
                self.unavailable = Some(reason);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionReconciler {
    primary: SourceCell,
    legacy: SourceCell,
    merged: SessionMap,
}

impl SessionReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `update` in the cell for `source` and recomputes the merge.
    pub fn apply(&mut self, source: SessionSource, update: SourceUpdate) -> &SessionMap {
        if let SourceUpdate::Unavailable(reason) = &update {
            warn!(
                source = source.as_str(),
                reason = %reason,
                "Session source unavailable, treating as empty"
            );
        }

        match source {
            SessionSource::Primary => self.primary.store(update),
            SessionSource::Legacy => self.legacy.store(update),
        }

        self.merged = merge(&self.primary.sessions, &self.legacy.sessions);
        debug!(
            source = source.as_str(),
            primary = self.primary.sessions.len(),
            legacy = self.legacy.sessions.len(),
            merged = self.merged.len(),
            "Sessions reconciled"
        );
        &self.merged
    }

    pub fn merged(&self) -> &SessionMap {
        &self.merged
    }

    pub fn unavailable_reason(&self, source: SessionSource) -> Option<&str> {
        match source {
            SessionSource::Primary => self.primary.unavailable.as_deref(),
            SessionSource::Legacy => self.legacy.unavailable.as_deref(),
        }
    }

    pub fn is_degraded(&self, source: SessionSource) -> bool {
        self.unavailable_reason(source).is_some()
    }
}
