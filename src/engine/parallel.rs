//! Parallel bulk extraction
//!
//! Every chunk becomes a binary COPY export written to its own spool file by
//! a worker task. Workers run concurrently (bounded by a semaphore) but the
//! consumer replays spool files strictly in chunk order, so addresses seen
//! downstream never go backwards.

use super::extract::{check_filenode, count_resync, plan_chunks, ExtractOptions, RowIterator};
use super::types::ExtractionProgress;
use crate::ctid::{ChunkQuery, ChunkRange, Ctid, Projection};
use crate::decode::CopyBinaryReader;
use crate::error::{Error, Result};
use crate::filenode::FilenodeStore;
use crate::source::{AddressedRow, CatalogProbe, QueryExecutor};
use crate::types::StreamDescriptor;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Rows decoded per blocking read of a spool file
const REPLAY_BATCH: usize = 1024;

/// A finished export waiting to be replayed
#[derive(Debug)]
struct SpooledChunk {
    index: usize,
    file: NamedTempFile,
    bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Consuming,
    Exhausted,
}

/// Outcome of one blocking read of a spool file
enum Replay {
    Rows(CopyBinaryReader<File>, Vec<Option<String>>),
    Finished(u64),
}

/// Reads a stream through concurrent bulk exports
pub struct ParallelIterator {
    stream: StreamDescriptor,
    columns: Vec<String>,
    executor: Arc<dyn QueryExecutor>,
    probe: Arc<dyn CatalogProbe>,
    filenodes: Arc<dyn FilenodeStore>,
    options: ExtractOptions,
    start: Ctid,
    phase: Phase,
    pending: VecDeque<ChunkRange>,
    next_index: usize,
    in_flight: VecDeque<JoinHandle<Result<SpooledChunk>>>,
    workers: Arc<Semaphore>,
    current: Option<CopyBinaryReader<File>>,
    replay: VecDeque<Option<String>>,
    progress: ExtractionProgress,
}

impl ParallelIterator {
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
        let workers = Arc::new(Semaphore::new(options.parallel.max_concurrent_exports.max(1)));
        Self {
            stream,
            columns,
            executor,
            probe,
            filenodes,
            options,
            start,
            phase: Phase::Uninitialized,
            pending: VecDeque::new(),
            next_index: 0,
            in_flight: VecDeque::new(),
            workers,
            current: None,
            replay: VecDeque::new(),
            progress: ExtractionProgress::default(),
        }
    }

    async fn initialize(&mut self) -> Result<()> {
        let page_size = self.probe.block_size().await?;

        // Checked once; a rewrite during the exports is not detected here
        let mut start = self.start;
        let change =
            check_filenode(self.probe.as_ref(), self.filenodes.as_ref(), &self.stream).await;
        if change.requires_resync() {
            count_resync(&self.stream, &mut self.progress, self.options.max_resyncs)?;
            start = Ctid::ZERO;
        }

        self.pending = plan_chunks(
            self.probe.as_ref(),
            &self.stream,
            start,
            page_size,
            self.options.chunk_size_bytes,
        )
        .await?;
        self.phase = Phase::Consuming;
        self.submit();
        Ok(())
    }

    /// Keep up to `max_spooled_chunks` exports queued or running
    fn submit(&mut self) {
        while self.in_flight.len() < self.options.parallel.max_spooled_chunks.max(1) {
            let Some(range) = self.pending.pop_front() else {
                break;
            };
            let query = ChunkQuery::new(
                &self.stream,
                &self.columns,
                range,
                self.next_index,
                self.options.scan_mode,
                Projection::JsonText,
            );
            self.next_index += 1;

            let handle = tokio::spawn(export_chunk(
                self.executor.clone(),
                self.workers.clone(),
                query,
                self.options.parallel.spool_dir.clone(),
            ));
            self.in_flight.push_back(handle);
        }
    }

    async fn advance(&mut self) -> Result<Option<AddressedRow>> {
        loop {
            match self.phase {
                Phase::Exhausted => return Ok(None),
                Phase::Uninitialized => self.initialize().await?,
                Phase::Consuming => {
                    if let Some(row) = self.replay.pop_front() {
                        return self.decode_row(row).map(Some);
                    }
                    if let Some(reader) = self.current.take() {
                        match tokio::task::spawn_blocking(move || replay_batch(reader)).await?? {
                            Replay::Rows(reader, rows) => {
                                self.current = Some(reader);
                                self.replay.extend(rows);
                            }
                            Replay::Finished(rows) => {
                                debug!(stream = %self.stream, rows, "Spool file consumed and deleted");
                            }
                        }
                        continue;
                    }

                    let Some(handle) = self.in_flight.pop_front() else {
                        debug!(stream = %self.stream, chunks = self.progress.chunks, "All chunks consumed");
                        self.phase = Phase::Exhausted;
                        continue;
                    };
                    let chunk = handle.await??;
                    self.submit();

                    self.progress.chunks += 1;
                    self.progress.spooled_bytes += chunk.bytes;
                    debug!(
                        stream = %self.stream,
                        chunk = chunk.index,
                        bytes = chunk.bytes,
                        "Replaying spooled chunk"
                    );

                    let policy = self.options.null_field;
                    let reader = tokio::task::spawn_blocking(move || {
                        CopyBinaryReader::from_temp_file(chunk.file, policy)
                    })
                    .await??;
                    self.current = Some(reader);
                }
            }
        }
    }

    fn decode_row(&self, row: Option<String>) -> Result<AddressedRow> {
        match row {
            Some(text) => AddressedRow::from_json_text(&self.stream, &text),
            None => Err(Error::decode(format!(
                "bulk export of stream '{}' produced a NULL row",
                self.stream
            ))),
        }
    }

    /// Abort workers and delete every spool file still held
    async fn shutdown(&mut self) {
        self.phase = Phase::Exhausted;
        self.pending.clear();
        self.replay.clear();
        self.current = None;

        let handles: Vec<_> = self.in_flight.drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            handle.abort();
        }
        // Awaiting drops the tasks' futures, and with them their spool files
        let aborted = handles.len();
        for handle in handles {
            let _ = handle.await;
        }
        info!(stream = %self.stream, aborted, "Parallel extraction shut down");
    }
}

/// Decode the next batch of rows; deletes the spool file once it is drained
fn replay_batch(mut reader: CopyBinaryReader<File>) -> Result<Replay> {
    let mut rows = Vec::with_capacity(REPLAY_BATCH);
    while rows.len() < REPLAY_BATCH {
        match reader.next_row()? {
            Some(row) => rows.push(row),
            None => break,
        }
    }
    if rows.is_empty() {
        let read = reader.rows_read();
        reader.close()?;
        return Ok(Replay::Finished(read));
    }
    Ok(Replay::Rows(reader, rows))
}

async fn export_chunk(
    executor: Arc<dyn QueryExecutor>,
    workers: Arc<Semaphore>,
    query: ChunkQuery,
    spool_dir: Option<PathBuf>,
) -> Result<SpooledChunk> {
    let stream = query.stream.to_string();
    let index = query.chunk_index;
    let _permit = workers
        .acquire_owned()
        .await
        .map_err(|e| Error::export(&stream, index, e.to_string()))?;

    let file = match &spool_dir {
        Some(dir) => tempfile::Builder::new()
            .prefix("pgctid-spool-")
            .tempfile_in(dir)?,
        None => tempfile::Builder::new().prefix("pgctid-spool-").tempfile()?,
    };
    let mut sink = tokio::fs::File::from_std(file.reopen()?);

    debug!(stream = %stream, chunk = index, range = %query.range, "Exporting chunk");
    let bytes = executor
        .bulk_export(&query, &mut sink)
        .await
        .map_err(|e| match e {
            Error::Export { .. } => e,
            other => Error::export(&stream, index, other.to_string()),
        })?;
    sink.flush().await?;

    Ok(SpooledChunk { index, file, bytes })
}

#[async_trait]
impl RowIterator for ParallelIterator {
    async fn next_row(&mut self) -> Result<Option<AddressedRow>> {
        match self.advance().await {
            Ok(row) => Ok(row),
            Err(e) => {
                self.shutdown().await;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        self.shutdown().await;
    }

    fn progress(&self) -> ExtractionProgress {
        self.progress
    }
}

impl Drop for ParallelIterator {
    fn drop(&mut self) {
        for handle in &self.in_flight {
            handle.abort();
        }
    }
}
