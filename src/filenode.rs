//! Relation filenode tracking
//!
//! Records the last observed filenode per stream. A table rewrite (VACUUM
//! FULL, CLUSTER, some ALTER TABLE forms) assigns a new filenode and
//! invalidates every ctid saved against the old one.

use crate::types::{Filenode, StreamDescriptor};
use std::collections::HashMap;
use std::sync::RwLock;

/// Keyed store of the last known filenode per stream
pub trait FilenodeStore: Send + Sync {
    /// Last known filenode
    fn get(&self, stream: &StreamDescriptor) -> Option<Filenode>;

    /// Record a freshly observed filenode
    fn set(&self, stream: &StreamDescriptor, filenode: Filenode);

    /// Forget the filenode, e.g. after the relation disappeared
    fn clear(&self, stream: &StreamDescriptor);

    /// Note that probing the filenode failed. Never fails itself.
    fn record_query_failure(&self, stream: &StreamDescriptor);

    /// Number of failed probes recorded for a stream
    fn query_failures(&self, stream: &StreamDescriptor) -> u32;
}

#[derive(Debug, Default)]
struct Entry {
    filenode: Option<Filenode>,
    failures: u32,
}

/// In-memory filenode store
#[derive(Debug, Default)]
pub struct FilenodeTracker {
    entries: RwLock<HashMap<StreamDescriptor, Entry>>,
}

impl FilenodeTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker seeded with known filenodes
    pub fn with_filenodes(
        filenodes: impl IntoIterator<Item = (StreamDescriptor, Filenode)>,
    ) -> Self {
        let tracker = Self::new();
        for (stream, filenode) in filenodes {
            tracker.set(&stream, filenode);
        }
        tracker
    }
}

impl FilenodeStore for FilenodeTracker {
    fn get(&self, stream: &StreamDescriptor) -> Option<Filenode> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(stream).and_then(|e| e.filenode)
    }

    fn set(&self, stream: &StreamDescriptor, filenode: Filenode) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(stream.clone()).or_default().filenode = Some(filenode);
    }

    fn clear(&self, stream: &StreamDescriptor) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(stream) {
            entry.filenode = None;
        }
    }

    fn record_query_failure(&self, stream: &StreamDescriptor) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(stream.clone()).or_default().failures += 1;
    }

    fn query_failures(&self, stream: &StreamDescriptor) -> u32 {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(stream).map_or(0, |e| e.failures)
    }
}

/// How the current filenode compares with the last known one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenodeChange {
    /// Neither known nor found (not a heap table, e.g. a view)
    NoFilenode,
    /// Nothing known yet; the probe returned one
    NewStream,
    /// Known before but the probe found none
    NotFound,
    /// Known before and the probe returned a different one
    Changed,
    /// Unchanged
    NoChange,
}

impl FilenodeChange {
    /// Classify a probe result against the last known filenode
    pub fn detect(known: Option<Filenode>, current: Option<Filenode>) -> Self {
        match (known, current) {
            (None, None) => FilenodeChange::NoFilenode,
            (None, Some(_)) => FilenodeChange::NewStream,
            (Some(_), None) => FilenodeChange::NotFound,
            (Some(a), Some(b)) if a != b => FilenodeChange::Changed,
            _ => FilenodeChange::NoChange,
        }
    }

    /// Whether saved addresses are no longer valid
    pub fn requires_resync(self) -> bool {
        matches!(self, FilenodeChange::Changed | FilenodeChange::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> StreamDescriptor {
        StreamDescriptor::new("public", "orders")
    }

    #[test]
    fn test_tracker_get_set() {
        let tracker = FilenodeTracker::new();
        assert_eq!(tracker.get(&stream()), None);

        tracker.set(&stream(), 16_384);
        assert_eq!(tracker.get(&stream()), Some(16_384));

        tracker.set(&stream(), 16_999);
        assert_eq!(tracker.get(&stream()), Some(16_999));

        tracker.clear(&stream());
        assert_eq!(tracker.get(&stream()), None);
    }

    #[test]
    fn test_tracker_records_failures_without_touching_filenode() {
        let tracker = FilenodeTracker::with_filenodes([(stream(), 1)]);
        tracker.record_query_failure(&stream());
        tracker.record_query_failure(&stream());

        assert_eq!(tracker.query_failures(&stream()), 2);
        assert_eq!(tracker.get(&stream()), Some(1));
        assert_eq!(
            tracker.query_failures(&StreamDescriptor::unqualified("other")),
            0
        );
    }

    #[test]
    fn test_detect_change() {
        assert_eq!(
            FilenodeChange::detect(None, None),
            FilenodeChange::NoFilenode
        );
        assert_eq!(
            FilenodeChange::detect(None, Some(5)),
            FilenodeChange::NewStream
        );
        assert_eq!(
            FilenodeChange::detect(Some(5), None),
            FilenodeChange::NotFound
        );
        assert_eq!(
            FilenodeChange::detect(Some(5), Some(6)),
            FilenodeChange::Changed
        );
        assert_eq!(
            FilenodeChange::detect(Some(5), Some(5)),
            FilenodeChange::NoChange
        );
    }

    #[test]
    fn test_requires_resync() {
        assert!(FilenodeChange::Changed.requires_resync());
        assert!(FilenodeChange::NotFound.requires_resync());
        assert!(!FilenodeChange::NewStream.requires_resync());
        assert!(!FilenodeChange::NoChange.requires_resync());
        assert!(!FilenodeChange::NoFilenode.requires_resync());
    }
}
