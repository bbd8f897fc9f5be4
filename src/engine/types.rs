//! Engine types
//!
//! Output messages, statistics, and the result of a sync run.

use crate::state::StateMessage;
use crate::types::{JsonObject, LogLevel, StreamDescriptor};
use serde::{Deserialize, Serialize};

/// A message emitted during sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Message {
    /// A row of a stream
    Record {
        /// The record
        record: RecordMessage,
    },
    /// Checkpoint or terminal state
    State {
        /// The state payload
        state: StateMessage,
    },
    /// Log message
    Log {
        /// The log entry
        log: LogMessage,
    },
}

/// One row of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    /// Stream name
    pub stream: String,
    /// Stream namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Column values
    pub data: JsonObject,
    /// Milliseconds since the epoch
    pub emitted_at: i64,
}

/// Progress notice for the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Log level
    pub level: LogLevel,
    /// Log message
    pub message: String,
}

impl Message {
    /// Create a record message stamped with the current time
    pub fn record(stream: &StreamDescriptor, data: JsonObject) -> Self {
        Self::Record {
            record: RecordMessage {
                stream: stream.name.clone(),
                namespace: stream.namespace.clone(),
                data,
                emitted_at: chrono::Utc::now().timestamp_millis(),
            },
        }
    }

    /// Create a state message
    pub fn state(state: StateMessage) -> Self {
        Self::State { state }
    }

    /// Create a log message
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            log: LogMessage {
                level,
                message: message.into(),
            },
        }
    }

    /// Create an info log
    pub fn info(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Info, message)
    }

    /// Create a warning log
    pub fn warn(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Warn, message)
    }

    /// Create an error log
    pub fn error(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Error, message)
    }

    /// Check if this is a record message
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record { .. })
    }

    /// Check if this is a state message
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State { .. })
    }

    /// Check if this is a log message
    pub fn is_log(&self) -> bool {
        matches!(self, Self::Log { .. })
    }

    /// State payload, if this is a state message
    pub fn as_state(&self) -> Option<&StateMessage> {
        match self {
            Self::State { state } => Some(state),
            _ => None,
        }
    }

    /// Record payload, if this is a record message
    pub fn as_record(&self) -> Option<&RecordMessage> {
        match self {
            Self::Record { record } => Some(record),
            _ => None,
        }
    }
}

/// Counters reported by an extraction iterator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionProgress {
    /// Chunks opened or consumed
    pub chunks: usize,
    /// Restarts from table origin after a rewrite
    pub resyncs: u32,
    /// Bytes written to spool files
    pub spooled_bytes: u64,
}

/// Statistics from a sync operation
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Total records synced
    pub records_synced: u64,
    /// Checkpoints emitted
    pub checkpoints: u64,
    /// Chunks read
    pub chunks_read: usize,
    /// Resyncs after table rewrites
    pub resyncs: u32,
    /// Bytes spooled by parallel extraction
    pub spooled_bytes: u64,
    /// Total streams synced
    pub streams_synced: usize,
    /// Errors encountered
    pub errors: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl SyncStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Add records
    pub fn add_records(&mut self, count: u64) {
        self.records_synced += count;
    }

    /// Add a checkpoint
    pub fn add_checkpoint(&mut self) {
        self.checkpoints += 1;
    }

    /// Fold in the counters of one stream's extraction
    pub fn add_progress(&mut self, progress: ExtractionProgress) {
        self.chunks_read += progress.chunks;
        self.resyncs += progress.resyncs;
        self.spooled_bytes += progress.spooled_bytes;
    }

    /// Add a stream
    pub fn add_stream(&mut self) {
        self.streams_synced += 1;
    }

    /// Add an error
    pub fn add_error(&mut self) {
        self.errors += 1;
    }

    /// Set duration
    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }
}

/// A stream whose sync attempt failed
#[derive(Debug, Clone, Serialize)]
pub struct StreamFailure {
    /// The stream
    pub stream: StreamDescriptor,
    /// Rendered error
    pub error: String,
}

/// Outcome of [`super::CtidSync::read`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Streams read to completion by this engine
    pub completed_streams: Vec<StreamDescriptor>,
    /// Streams whose sync failed
    pub failed_streams: Vec<StreamFailure>,
    /// Streams to hand to the xmin engine
    pub watermark_streams: Vec<StreamDescriptor>,
    /// Streams to hand to the cursor engine
    pub cursor_streams: Vec<StreamDescriptor>,
    /// Counters
    pub stats: SyncStats,
}

impl SyncReport {
    /// Whether every stream read by this engine succeeded
    pub fn is_success(&self) -> bool {
        self.failed_streams.is_empty()
    }
}
