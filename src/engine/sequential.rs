//! Sequential extraction
//!
//! Walks the chunk plan one streaming query at a time. The filenode is
//! checked before every chunk; a rewrite throws the plan away and starts
//! over from table origin.

use super::extract::{check_filenode, count_resync, plan_chunks, ExtractOptions, RowIterator};
use super::types::ExtractionProgress;
use crate::ctid::{ChunkQuery, ChunkRange, Ctid, Projection};
use crate::error::Result;
use crate::filenode::FilenodeStore;
use crate::source::{AddressedRow, CatalogProbe, QueryExecutor, RowStream};
use crate::types::StreamDescriptor;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Consuming,
    Exhausted,
}

/// Reads a stream chunk by chunk through [`QueryExecutor::stream_query`]
pub struct SequentialIterator {
    stream: StreamDescriptor,
    columns: Vec<String>,
    executor: Arc<dyn QueryExecutor>,
    probe: Arc<dyn CatalogProbe>,
    filenodes: Arc<dyn FilenodeStore>,
    options: ExtractOptions,
    start: Ctid,
    phase: Phase,
    page_size: u64,
    chunks: VecDeque<ChunkRange>,
    current: Option<RowStream>,
    next_index: usize,
    progress: ExtractionProgress,
}

impl SequentialIterator {
    /// Create an iterator resuming after `start`
    pub fn new(
        stream: StreamDescriptor,
        columns: Vec<String>,
        executor: Arc<dyn QueryExecutor>,
        probe: Arc<dyn CatalogProbe>,
        filenodes: Arc<dyn FilenodeStore>,
        options: ExtractOptions,
        start: Ctid,
    ) -> Self {
        Self {
            stream,
            columns,
            executor,
            probe,
            filenodes,
            options,
            start,
            phase: Phase::Uninitialized,
            page_size: 0,
            chunks: VecDeque::new(),
            current: None,
            next_index: 0,
            progress: ExtractionProgress::default(),
        }
    }

    async fn advance(&mut self) -> Result<Option<AddressedRow>> {
        loop {
            match self.phase {
                Phase::Exhausted => return Ok(None),
                Phase::Uninitialized => {
                    self.page_size = self.probe.block_size().await?;
                    self.chunks = plan_chunks(
                        self.probe.as_ref(),
                        &self.stream,
                        self.start,
                        self.page_size,
                        self.options.chunk_size_bytes,
                    )
                    .await?;
                    self.phase = Phase::Consuming;
                }
                Phase::Consuming => {
                    if let Some(rows) = self.current.as_mut() {
                        match rows.next().await {
                            Some(row) => {
                                return AddressedRow::from_object(&self.stream, row?).map(Some)
                            }
                            None => {
                                // Drained; close before opening the next chunk
                                self.current = None;
                                continue;
                            }
                        }
                    }
                    self.open_next_chunk().await?;
                }
            }
        }
    }

    async fn open_next_chunk(&mut self) -> Result<()> {
        if self.chunks.is_empty() {
            debug!(stream = %self.stream, chunks = self.progress.chunks, "All chunks consumed");
            self.phase = Phase::Exhausted;
            return Ok(());
        }

        let change =
            check_filenode(self.probe.as_ref(), self.filenodes.as_ref(), &self.stream).await;
        if change.requires_resync() {
            count_resync(&self.stream, &mut self.progress, self.options.max_resyncs)?;
            self.chunks = plan_chunks(
                self.probe.as_ref(),
                &self.stream,
                Ctid::ZERO,
                self.page_size,
                self.options.chunk_size_bytes,
            )
            .await?;
        }

        let Some(range) = self.chunks.pop_front() else {
            self.phase = Phase::Exhausted;
            return Ok(());
        };
        let query = ChunkQuery::new(
            &self.stream,
            &self.columns,
            range,
            self.next_index,
            self.options.scan_mode,
            Projection::Columns,
        );
        debug!(stream = %self.stream, chunk = self.next_index, range = %range, "Opening chunk");
        self.next_index += 1;
        self.progress.chunks += 1;
        self.current = Some(self.executor.stream_query(&query).await?);
        Ok(())
    }
}

#[async_trait]
impl RowIterator for SequentialIterator {
    async fn next_row(&mut self) -> Result<Option<AddressedRow>> {
        match self.advance().await {
            Ok(row) => Ok(row),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        self.current = None;
        self.chunks.clear();
        self.phase = Phase::Exhausted;
    }

    fn progress(&self) -> ExtractionProgress {
        self.progress
    }
}
