//! Execution engine module
//!
//! Main read loop and stream orchestration.
//!
//! # Overview
//!
//! The engine module provides:
//! - `CtidSync` - Triages streams and runs the initial sync of each
//! - `SequentialIterator` / `ParallelIterator` - the two extraction strategies
//! - `CheckpointingIterator` - interleaves checkpoint and terminal states
//! - Message types for output (Record, State, Log) and `MessageSink`

mod checkpoint;
mod extract;
mod parallel;
mod sequential;
mod sink;
mod types;

pub use checkpoint::{CheckpointPolicy, CheckpointingIterator};
pub use extract::{resolve_scan_mode, ExtractOptions, RowIterator};
pub use parallel::ParallelIterator;
pub use sequential::SequentialIterator;
pub use sink::{JsonLinesSink, MessageSink};
pub use types::{
    ExtractionProgress, LogMessage, Message, RecordMessage, StreamFailure, SyncReport, SyncStats,
};

use crate::config::{ConfiguredCatalog, ConfiguredStream, Extraction, IncrementalStrategy, SyncConfig};
use crate::ctid::{ChunkPlanner, ChunkQuery, Ctid, Projection};
use crate::error::Result;
use crate::filenode::{FilenodeStore, FilenodeTracker};
use crate::source::{CatalogProbe, QueryExecutor};
use crate::state::{
    restore_ctid_state, state_manager, CtidState, CtidStateManager, PersistedStates, XminState,
    XminStatus,
};
use crate::triage::classify;
use crate::types::{JsonValue, SyncMode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Runs resumable ctid initial syncs
pub struct CtidSync {
    executor: Arc<dyn QueryExecutor>,
    probe: Arc<dyn CatalogProbe>,
    config: SyncConfig,
}

/// A stream ready to be read
struct PreparedStream {
    configured: ConfiguredStream,
    state: CtidState,
}

impl CtidSync {
    /// Create a sync over a driver
    pub fn new(executor: Arc<dyn QueryExecutor>, probe: Arc<dyn CatalogProbe>) -> Self {
        Self {
            executor,
            probe,
            config: SyncConfig::default(),
        }
    }

    /// Set sync configuration
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the sync configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Read every stream of the catalog that needs an initial sync.
    ///
    /// Invalid configuration or persisted state fails before any row is read.
    /// After that a failing stream is reported and the others continue,
    /// unless `fail_fast` is set. Errors from the sink always abort.
    pub async fn read(
        &self,
        catalog: &ConfiguredCatalog,
        input_state: &PersistedStates,
        xmin_status: Option<&XminStatus>,
        sink: &mut dyn MessageSink,
    ) -> Result<SyncReport> {
        let start = Instant::now();
        self.config.validate()?;

        let categorised = classify(input_state, catalog, xmin_status)?;
        let mut report = SyncReport {
            watermark_streams: categorised.by_watermark.iter().map(|s| s.stream.clone()).collect(),
            cursor_streams: categorised.by_cursor.iter().map(|s| s.stream.clone()).collect(),
            ..SyncReport::default()
        };

        let mut prepared = Vec::with_capacity(categorised.needs_full_sync.len());
        for configured in categorised.needs_full_sync {
            let restored = restore_ctid_state(input_state, &configured.stream)?;
            let state = self.initial_state(&configured, restored, xmin_status);
            prepared.push(PreparedStream { configured, state });
        }

        if input_state.scope != self.config.state_scope && !input_state.streams.is_empty() {
            warn!(
                input = ?input_state.scope,
                configured = ?self.config.state_scope,
                "Input state scope differs from the configured one"
            );
        }

        let filenodes = Arc::new(FilenodeTracker::with_filenodes(prepared.iter().filter_map(
            |p| p.state.relation_filenode.map(|f| (p.configured.stream.clone(), f)),
        )));
        let manager = state_manager(self.config.state_scope, filenodes.clone(), input_state);
        let options = ExtractOptions::from_config(
            &self.config,
            resolve_scan_mode(&self.config, self.probe.as_ref()).await?,
        );

        info!(
            streams = prepared.len(),
            extraction = ?self.config.extraction,
            scan_mode = ?options.scan_mode,
            "Starting ctid sync"
        );

        for PreparedStream { configured, state } in prepared {
            let stream = configured.stream.clone();
            manager
                .register(&stream, configured.sync_mode, state.clone())
                .await;

            let resume = state.ctid.unwrap_or(Ctid::ZERO);
            sink.emit(Message::info(format!(
                "Starting ctid sync for {stream} after {resume}"
            )))
            .await?;

            let outcome = self
                .run_stream(
                    &configured,
                    resume,
                    state.incremental_state,
                    &options,
                    filenodes.clone(),
                    manager.clone(),
                    sink,
                    &mut report,
                )
                .await?;

            match outcome {
                Ok(()) => {
                    report.stats.add_stream();
                    report.completed_streams.push(stream);
                }
                Err(e) => {
                    error!(stream = %stream, error = %e, "Stream sync failed");
                    report.stats.add_error();
                    sink.emit(Message::error(format!("Sync of {stream} failed: {e}")))
                        .await?;
                    report.failed_streams.push(StreamFailure {
                        stream,
                        error: e.to_string(),
                    });
                    if self.config.fail_fast {
                        sink.flush().await?;
                        return Err(e);
                    }
                }
            }
        }

        sink.flush().await?;
        report.stats.set_duration(start.elapsed().as_millis() as u64);
        info!(
            completed = report.completed_streams.len(),
            failed = report.failed_streams.len(),
            records = report.stats.records_synced,
            "Ctid sync finished"
        );
        Ok(report)
    }

    /// Starting state of a stream: the restored one, or a fresh one carrying
    /// the watermark to hand off to once the initial sync completes
    fn initial_state(
        &self,
        configured: &ConfiguredStream,
        restored: Option<CtidState>,
        xmin_status: Option<&XminStatus>,
    ) -> CtidState {
        let handoff = match (configured.sync_mode, self.config.incremental) {
            (SyncMode::Incremental, IncrementalStrategy::Xmin) => {
                xmin_status.map(|status| XminState::from_status(status).to_value())
            }
            _ => None,
        };

        match restored {
            Some(mut state) => {
                // The watermark must predate the first chunk read, keep the saved one
                if state.incremental_state.is_none() {
                    state.incremental_state = handoff;
                }
                state
            }
            None => CtidState::initial(handoff),
        }
    }

    /// Read one stream. The outer error is a sink failure, the inner one a
    /// failure of the stream itself.
    #[allow(clippy::too_many_arguments)]
    async fn run_stream(
        &self,
        configured: &ConfiguredStream,
        resume: Ctid,
        handoff: Option<JsonValue>,
        options: &ExtractOptions,
        filenodes: Arc<dyn FilenodeStore>,
        manager: Arc<dyn CtidStateManager>,
        sink: &mut dyn MessageSink,
        report: &mut SyncReport,
    ) -> Result<Result<()>> {
        let stream = configured.stream.clone();
        let columns = configured.columns.clone();

        let inner: Box<dyn RowIterator> = match self.config.extraction {
            Extraction::Sequential => Box::new(SequentialIterator::new(
                stream.clone(),
                columns,
                self.executor.clone(),
                self.probe.clone(),
                filenodes,
                options.clone(),
                resume,
            )),
            Extraction::Parallel => Box::new(ParallelIterator::new(
                stream.clone(),
                columns,
                self.executor.clone(),
                self.probe.clone(),
                filenodes,
                options.clone(),
                resume,
            )),
        };
        let policy = CheckpointPolicy {
            records: self.config.checkpoint_records,
            interval: self.config.checkpoint_interval(),
        };
        let mut messages = CheckpointingIterator::new(stream, inner, manager, policy, handoff);

        let result = loop {
            match messages.next_message().await {
                Ok(Some(message)) => {
                    if let Err(e) = sink.emit(message).await {
                        messages.close().await;
                        return Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        report.stats.add_records(messages.records());
        report.stats.checkpoints += messages.checkpoints();
        report.stats.add_progress(messages.progress());
        Ok(result)
    }

    /// Chunk queries a sync of `configured` would run, starting after `start`
    pub async fn plan(&self, configured: &ConfiguredStream, start: Ctid) -> Result<Vec<ChunkQuery>> {
        let scan_mode = resolve_scan_mode(&self.config, self.probe.as_ref()).await?;
        let page_size = self.probe.block_size().await?;
        let size = self.probe.relation_size(&configured.stream).await?;
        let projection = match self.config.extraction {
            Extraction::Sequential => Projection::Columns,
            Extraction::Parallel => Projection::JsonText,
        };

        Ok(ChunkPlanner::new(page_size, self.config.chunk_size_bytes)
            .plan(start, size)
            .into_iter()
            .enumerate()
            .map(|(index, range)| {
                ChunkQuery::new(
                    &configured.stream,
                    &configured.columns,
                    range,
                    index,
                    scan_mode,
                    projection,
                )
            })
            .collect())
    }
}
