//! Shared pieces of the extraction iterators

use super::types::ExtractionProgress;
use crate::config::{ParallelConfig, SyncConfig, TidRangeScan};
use crate::ctid::{ChunkPlanner, ChunkRange, Ctid, ScanMode};
use crate::decode::NullFieldPolicy;
use crate::error::{Error, Result};
use crate::filenode::{FilenodeChange, FilenodeStore};
use crate::source::{AddressedRow, CatalogProbe};
use crate::types::StreamDescriptor;
use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::{info, warn};

/// Pull-based source of addressed rows
#[async_trait]
pub trait RowIterator: Send {
    /// Next row, `None` once exhausted. After an error the iterator is done.
    async fn next_row(&mut self) -> Result<Option<AddressedRow>>;

    /// Release queries, workers and spool files. Safe to call more than once.
    async fn close(&mut self);

    /// Counters so far
    fn progress(&self) -> ExtractionProgress;
}

#[async_trait]
impl<T: RowIterator + ?Sized> RowIterator for Box<T> {
    async fn next_row(&mut self) -> Result<Option<AddressedRow>> {
        (**self).next_row().await
    }

    async fn close(&mut self) {
        (**self).close().await;
    }

    fn progress(&self) -> ExtractionProgress {
        (**self).progress()
    }
}

/// Knobs shared by both iterators
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Target bytes per chunk
    pub chunk_size_bytes: u64,
    /// Predicate compilation mode
    pub scan_mode: ScanMode,
    /// Rewrites tolerated before failing
    pub max_resyncs: u32,
    /// Decoder NULL handling
    pub null_field: NullFieldPolicy,
    /// Parallel worker pool
    pub parallel: ParallelConfig,
}

impl ExtractOptions {
    /// Options from a sync config with an already resolved scan mode
    pub fn from_config(config: &SyncConfig, scan_mode: ScanMode) -> Self {
        Self {
            chunk_size_bytes: config.chunk_size_bytes,
            scan_mode,
            max_resyncs: config.max_resyncs,
            null_field: config.null_field,
            parallel: config.parallel.clone(),
        }
    }
}

/// Decide between TID range predicates and address enumeration
pub async fn resolve_scan_mode(config: &SyncConfig, probe: &dyn CatalogProbe) -> Result<ScanMode> {
    let legacy = ScanMode::Legacy {
        max_tuples_per_page: u64::from(config.max_tuples_per_page),
    };
    let capable = match config.tid_range_scan {
        TidRangeScan::Enabled => true,
        TidRangeScan::Disabled => false,
        TidRangeScan::Auto => probe.supports_tid_range_scan().await?,
    };
    if !capable {
        warn!("TID range scans unavailable, falling back to address enumeration");
    }
    Ok(if capable { ScanMode::TidRange } else { legacy })
}

/// Plan ranges from `start` using a fresh size estimate
pub(crate) async fn plan_chunks(
    probe: &dyn CatalogProbe,
    stream: &StreamDescriptor,
    start: Ctid,
    page_size: u64,
    chunk_size_bytes: u64,
) -> Result<VecDeque<ChunkRange>> {
    let size = probe.relation_size(stream).await?;
    let ranges = ChunkPlanner::new(page_size, chunk_size_bytes).plan(start, size);
    info!(
        stream = %stream,
        start = %start,
        table_size = size,
        chunks = ranges.len(),
        "Planned ctid chunks"
    );
    Ok(ranges.into())
}

/// Probe the filenode and compare it with the last known one.
///
/// Probe failures are recorded and treated as no change. The tracker is
/// updated to the probed value.
pub(crate) async fn check_filenode(
    probe: &dyn CatalogProbe,
    filenodes: &dyn FilenodeStore,
    stream: &StreamDescriptor,
) -> FilenodeChange {
    let current = match probe.relation_filenode(stream).await {
        Ok(current) => current,
        Err(e) => {
            filenodes.record_query_failure(stream);
            warn!(stream = %stream, error = %e, "Filenode probe failed, assuming unchanged");
            return FilenodeChange::NoChange;
        }
    };

    let known = filenodes.get(stream);
    let change = FilenodeChange::detect(known, current);
    match current {
        Some(filenode) => filenodes.set(stream, filenode),
        None => filenodes.clear(stream),
    }

    if change.requires_resync() {
        warn!(
            stream = %stream,
            known = ?known,
            current = ?current,
            ?change,
            "Relation filenode changed, saved ctids are no longer valid"
        );
    }
    change
}

/// Count a resync and fail once the bound is passed
pub(crate) fn count_resync(
    stream: &StreamDescriptor,
    progress: &mut ExtractionProgress,
    max_resyncs: u32,
) -> Result<()> {
    progress.resyncs += 1;
    if progress.resyncs > max_resyncs {
        return Err(Error::TooManyResyncs {
            stream: stream.to_string(),
            resyncs: progress.resyncs,
        });
    }
    info!(stream = %stream, resyncs = progress.resyncs, "Restarting from table origin");
    Ok(())
}
