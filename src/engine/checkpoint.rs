//! Checkpointing
//!
//! Interleaves STATE messages into the rows of an extraction iterator.

use super::extract::RowIterator;
use super::types::{ExtractionProgress, Message};
use crate::ctid::Ctid;
use crate::error::Result;
use crate::state::CtidStateManager;
use crate::types::{JsonValue, StreamDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// When to checkpoint
#[derive(Debug, Clone, Copy)]
pub struct CheckpointPolicy {
    /// Records since the last checkpoint
    pub records: u64,
    /// Time since the last checkpoint
    pub interval: Duration,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            records: 10_000,
            interval: Duration::from_secs(900),
        }
    }
}

/// Wraps a row iterator and emits records, checkpoints and one terminal state
pub struct CheckpointingIterator<I> {
    stream: StreamDescriptor,
    inner: I,
    state: Arc<dyn CtidStateManager>,
    policy: CheckpointPolicy,
    handoff: Option<JsonValue>,
    last_ctid: Option<Ctid>,
    resyncs_seen: u32,
    since_checkpoint: u64,
    last_checkpoint_at: Instant,
    records: u64,
    checkpoints: u64,
    done: bool,
}

impl<I: RowIterator> CheckpointingIterator<I> {
    /// Wrap `inner`; `handoff` is passed to the terminal state
    pub fn new(
        stream: StreamDescriptor,
        inner: I,
        state: Arc<dyn CtidStateManager>,
        policy: CheckpointPolicy,
        handoff: Option<JsonValue>,
    ) -> Self {
        Self {
            stream,
            inner,
            state,
            policy,
            handoff,
            last_ctid: None,
            resyncs_seen: 0,
            since_checkpoint: 0,
            last_checkpoint_at: Instant::now(),
            records: 0,
            checkpoints: 0,
            done: false,
        }
    }

    fn checkpoint_due(&self) -> bool {
        self.last_ctid.is_some()
            && self.since_checkpoint > 0
            && (self.since_checkpoint >= self.policy.records
                || self.last_checkpoint_at.elapsed() >= self.policy.interval)
    }

    /// Next message, `None` after the terminal state or an error
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        if self.done {
            return Ok(None);
        }

        if self.checkpoint_due() {
            if let Some(ctid) = self.last_ctid {
                self.since_checkpoint = 0;
                self.last_checkpoint_at = Instant::now();
                self.checkpoints += 1;
                debug!(stream = %self.stream, ctid = %ctid, records = self.records, "Checkpoint");
                let state = self.state.checkpoint(&self.stream, ctid).await;
                return Ok(Some(Message::state(state)));
            }
        }

        let next = self.inner.next_row().await;
        if next.is_ok() {
            self.forget_old_storage().await;
        }

        match next {
            Ok(Some(row)) => {
                self.last_ctid = Some(row.ctid);
                self.since_checkpoint += 1;
                self.records += 1;
                Ok(Some(Message::record(&self.stream, row.data)))
            }
            Ok(None) => {
                self.done = true;
                self.inner.close().await;
                debug!(
                    stream = %self.stream,
                    records = self.records,
                    last = ?self.last_ctid,
                    "Stream exhausted, emitting terminal state"
                );
                let state = self
                    .state
                    .terminal(&self.stream, self.last_ctid, self.handoff.take())
                    .await;
                Ok(Some(Message::state(state)))
            }
            Err(e) => {
                self.done = true;
                self.inner.close().await;
                Err(e)
            }
        }
    }

    /// Addresses seen before a rewrite do not locate rows in the new storage
    async fn forget_old_storage(&mut self) {
        let resyncs = self.inner.progress().resyncs;
        if resyncs > self.resyncs_seen {
            self.resyncs_seen = resyncs;
            self.last_ctid = None;
            debug!(stream = %self.stream, resyncs, "Resume point reset after table rewrite");
            self.state.restart(&self.stream).await;
        }
    }

    /// Close the wrapped iterator without a terminal state
    pub async fn close(&mut self) {
        self.done = true;
        self.inner.close().await;
    }

    /// Records emitted
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Checkpoints emitted, terminal state excluded
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints
    }

    /// Counters of the wrapped iterator
    pub fn progress(&self) -> ExtractionProgress {
        self.inner.progress()
    }
}
