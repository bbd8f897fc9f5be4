//! Chunk planning
//!
//! Splits a table into consecutive ctid ranges sized from the relation's
//! on-disk size. The size is only an estimate taken at planning time, so
//! the last range is always left open and picks up whatever lives past the
//! estimated end when its query runs.

use super::types::{ChunkRange, Ctid};
use serde::{Deserialize, Serialize};

/// How ranges are turned into predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ScanMode {
    /// Native `ctid > a AND ctid <= b` predicates (TID range scan, PostgreSQL 14+)
    TidRange,
    /// Explicit enumeration of `page x tuple` addresses for servers without
    /// TID range scans
    Legacy {
        /// Upper bound of tuple slots enumerated per page
        max_tuples_per_page: u64,
    },
}

impl ScanMode {
    /// Whether this is the enumeration fallback
    pub fn is_legacy(&self) -> bool {
        matches!(self, ScanMode::Legacy { .. })
    }
}

/// Plans ctid ranges for a table
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    /// Server block size in bytes
    page_size: u64,
    /// Target bytes per chunk
    chunk_size_bytes: u64,
}

impl ChunkPlanner {
    /// Create a planner for the given block size and target chunk size
    pub fn new(page_size: u64, chunk_size_bytes: u64) -> Self {
        Self {
            page_size,
            chunk_size_bytes,
        }
    }

    /// Pages covered by one bounded chunk, never less than one
    pub fn pages_per_chunk(&self) -> u64 {
        (self.chunk_size_bytes / self.page_size.max(1)).max(1)
    }

    /// Plan ranges from `start` for a relation of `table_size_bytes`
    pub fn plan(&self, start: Ctid, table_size_bytes: u64) -> Vec<ChunkRange> {
        plan(
            start,
            table_size_bytes,
            self.page_size,
            self.chunk_size_bytes,
        )
    }
}

/// Produce ordered, disjoint ranges covering `(start, +inf)`.
///
/// Only the first range keeps `start.tuple`; every later range begins at
/// tuple 0 of its page. The final range is unbounded.
pub fn plan(
    start: Ctid,
    table_size_bytes: u64,
    page_size_bytes: u64,
    target_chunk_bytes: u64,
) -> Vec<ChunkRange> {
    let page_size = page_size_bytes.max(1);
    let pages_per_chunk = (target_chunk_bytes / page_size).max(1);
    let last_page_estimate = table_size_bytes / page_size;

    if start.page > last_page_estimate {
        return vec![ChunkRange::unbounded(start)];
    }

    let mut ranges = Vec::new();
    let mut lower = start;
    loop {
        let upper_page = lower.page.saturating_add(pages_per_chunk);
        if upper_page > last_page_estimate {
            ranges.push(ChunkRange::unbounded(lower));
            break;
        }
        let upper = Ctid::new(upper_page, 0);
        ranges.push(ChunkRange::bounded(lower, upper));
        lower = upper;
    }

    tracing::debug!(
        start = %start,
        last_page_estimate,
        pages_per_chunk,
        chunks = ranges.len(),
        "planned ctid chunks"
    );
    ranges
}
