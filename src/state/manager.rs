//! State manager implementations
//!
//! Produces checkpoint and terminal STATE messages for ctid syncs.

use super::types::{
    CtidState, GlobalState, PersistedStates, StateMessage, StateScope, StreamStateEntry,
};
use crate::ctid::Ctid;
use crate::error::Result;
use crate::filenode::FilenodeStore;
use crate::types::{JsonValue, StreamDescriptor, SyncMode};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Source of the resume point and producer of state records
#[async_trait]
pub trait CtidStateManager: Send + Sync {
    /// Register a stream about to be synced with its starting state
    async fn register(&self, stream: &StreamDescriptor, mode: SyncMode, state: CtidState);

    /// Current state of a stream
    async fn current_state(&self, stream: &StreamDescriptor) -> Option<CtidState>;

    /// Record `ctid` as the resume point and build the checkpoint message
    async fn checkpoint(&self, stream: &StreamDescriptor, ctid: Ctid) -> StateMessage;

    /// Forget the resume point after the stream restarted from table origin
    async fn restart(&self, stream: &StreamDescriptor);

    /// Build the final message once the stream is exhausted.
    ///
    /// An incremental stream with a `handoff` state emits that state, so the
    /// next run continues with the incremental strategy. Everything else emits
    /// a ctid state at `last` (or the last checkpoint if nothing newer was seen).
    async fn terminal(
        &self,
        stream: &StreamDescriptor,
        last: Option<Ctid>,
        handoff: Option<JsonValue>,
    ) -> StateMessage;
}

/// Create the manager for a scope, seeded with persisted ctid states
pub fn state_manager(
    scope: StateScope,
    filenodes: Arc<dyn FilenodeStore>,
    persisted: &PersistedStates,
) -> Arc<dyn CtidStateManager> {
    match scope {
        StateScope::PerStream => Arc::new(PerStreamStateManager::new(filenodes)),
        StateScope::Global => Arc::new(GlobalStateManager::new(
            filenodes,
            persisted.shared_state.clone(),
            persisted.streams.clone(),
        )),
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    mode: SyncMode,
    state: CtidState,
}

impl Tracked {
    fn advance(&mut self, ctid: Ctid, filenodes: &dyn FilenodeStore, stream: &StreamDescriptor) {
        self.state.ctid = Some(ctid);
        self.state.relation_filenode = filenodes.get(stream);
    }

    fn restart(&mut self, filenodes: &dyn FilenodeStore, stream: &StreamDescriptor) {
        self.state.ctid = None;
        self.state.relation_filenode = filenodes.get(stream);
    }

    /// Final state value, either the handoff or a resumable ctid state
    fn finish(
        &mut self,
        last: Option<Ctid>,
        handoff: Option<JsonValue>,
        filenodes: &dyn FilenodeStore,
        stream: &StreamDescriptor,
    ) -> JsonValue {
        if let Some(ctid) = last {
            self.advance(ctid, filenodes, stream);
        } else {
            self.state.relation_filenode = filenodes.get(stream).or(self.state.relation_filenode);
        }

        match (self.mode, handoff) {
            (SyncMode::Incremental, Some(handoff)) => handoff,
            (_, handoff) => {
                if handoff.is_some() {
                    self.state.incremental_state = handoff;
                }
                self.state.to_value()
            }
        }
    }
}

// ============================================================================
// Per-stream
// ============================================================================

/// Independent state per stream
pub struct PerStreamStateManager {
    filenodes: Arc<dyn FilenodeStore>,
    streams: RwLock<HashMap<StreamDescriptor, Tracked>>,
}

impl PerStreamStateManager {
    /// Create an empty manager
    pub fn new(filenodes: Arc<dyn FilenodeStore>) -> Self {
        Self {
            filenodes,
            streams: RwLock::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for PerStreamStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerStreamStateManager").finish_non_exhaustive()
    }
}

#[async_trait]
impl CtidStateManager for PerStreamStateManager {
    async fn register(&self, stream: &StreamDescriptor, mode: SyncMode, state: CtidState) {
        self.streams
            .write()
            .await
            .insert(stream.clone(), Tracked { mode, state });
    }

    async fn current_state(&self, stream: &StreamDescriptor) -> Option<CtidState> {
        self.streams
            .read()
            .await
            .get(stream)
            .map(|t| t.state.clone())
    }

    async fn checkpoint(&self, stream: &StreamDescriptor, ctid: Ctid) -> StateMessage {
        let mut streams = self.streams.write().await;
        let tracked = streams.entry(stream.clone()).or_insert_with(|| Tracked {
            mode: SyncMode::FullRefresh,
            state: CtidState::initial(None),
        });
        tracked.advance(ctid, self.filenodes.as_ref(), stream);
        StateMessage::stream(stream.clone(), tracked.state.to_value())
    }

    async fn restart(&self, stream: &StreamDescriptor) {
        if let Some(tracked) = self.streams.write().await.get_mut(stream) {
            tracked.restart(self.filenodes.as_ref(), stream);
        }
    }

    async fn terminal(
        &self,
        stream: &StreamDescriptor,
        last: Option<Ctid>,
        handoff: Option<JsonValue>,
    ) -> StateMessage {
        let mut streams = self.streams.write().await;
        let tracked = streams.entry(stream.clone()).or_insert_with(|| Tracked {
            mode: SyncMode::FullRefresh,
            state: CtidState::initial(None),
        });
        let value = tracked.finish(last, handoff, self.filenodes.as_ref(), stream);
        StateMessage::stream(stream.clone(), value)
    }
}

// ============================================================================
// Global
// ============================================================================

/// One shared position plus the state of every stream.
///
/// Every message carries all streams, including those this sync does not
/// touch, so the platform can replace its stored state wholesale.
pub struct GlobalStateManager {
    filenodes: Arc<dyn FilenodeStore>,
    shared_state: Option<JsonValue>,
    inner: RwLock<GlobalInner>,
}

#[derive(Default)]
struct GlobalInner {
    tracked: HashMap<StreamDescriptor, Tracked>,
    /// Serialized state per stream, ordered for stable output
    values: BTreeMap<(Option<String>, String), (StreamDescriptor, JsonValue)>,
}

impl GlobalInner {
    fn put(&mut self, stream: &StreamDescriptor, value: JsonValue) {
        self.values.insert(
            (stream.namespace.clone(), stream.name.clone()),
            (stream.clone(), value),
        );
    }
}

impl GlobalStateManager {
    /// Create a manager carrying the persisted shared position and stream states
    pub fn new(
        filenodes: Arc<dyn FilenodeStore>,
        shared_state: Option<JsonValue>,
        stream_states: HashMap<StreamDescriptor, JsonValue>,
    ) -> Self {
        let mut inner = GlobalInner::default();
        for (stream, value) in stream_states {
            inner.put(&stream, value);
        }
        Self {
            filenodes,
            shared_state,
            inner: RwLock::new(inner),
        }
    }

    fn envelope(&self, inner: &GlobalInner) -> StateMessage {
        StateMessage::Global {
            global: GlobalState {
                shared_state: self.shared_state.clone(),
                stream_states: inner
                    .values
                    .values()
                    .map(|(stream, value)| StreamStateEntry {
                        stream_descriptor: stream.clone(),
                        stream_state: Some(value.clone()),
                    })
                    .collect(),
            },
        }
    }
}

impl std::fmt::Debug for GlobalStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalStateManager")
            .field("shared_state", &self.shared_state)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CtidStateManager for GlobalStateManager {
    async fn register(&self, stream: &StreamDescriptor, mode: SyncMode, state: CtidState) {
        let mut inner = self.inner.write().await;
        inner.put(stream, state.to_value());
        inner.tracked.insert(stream.clone(), Tracked { mode, state });
    }

    async fn current_state(&self, stream: &StreamDescriptor) -> Option<CtidState> {
        self.inner
            .read()
            .await
            .tracked
            .get(stream)
            .map(|t| t.state.clone())
    }

    async fn checkpoint(&self, stream: &StreamDescriptor, ctid: Ctid) -> StateMessage {
        let mut inner = self.inner.write().await;
        let value = {
            let tracked = inner.tracked.entry(stream.clone()).or_insert_with(|| Tracked {
                mode: SyncMode::FullRefresh,
                state: CtidState::initial(None),
            });
            tracked.advance(ctid, self.filenodes.as_ref(), stream);
            tracked.state.to_value()
        };
        inner.put(stream, value);
        self.envelope(&inner)
    }

    async fn restart(&self, stream: &StreamDescriptor) {
        let mut inner = self.inner.write().await;
        let value = inner.tracked.get_mut(stream).map(|tracked| {
            tracked.restart(self.filenodes.as_ref(), stream);
            tracked.state.to_value()
        });
        if let Some(value) = value {
            inner.put(stream, value);
        }
    }

    async fn terminal(
        &self,
        stream: &StreamDescriptor,
        last: Option<Ctid>,
        handoff: Option<JsonValue>,
    ) -> StateMessage {
        let mut inner = self.inner.write().await;
        let value = {
            let tracked = inner.tracked.entry(stream.clone()).or_insert_with(|| Tracked {
                mode: SyncMode::FullRefresh,
                state: CtidState::initial(None),
            });
            tracked.finish(last, handoff, self.filenodes.as_ref(), stream)
        };
        inner.put(stream, value);
        self.envelope(&inner)
    }
}

/// Restore the ctid state of a stream from persisted input, if it has one
pub fn restore_ctid_state(
    persisted: &PersistedStates,
    stream: &StreamDescriptor,
) -> Result<Option<CtidState>> {
    match persisted.get(stream) {
        Some(value) if value.get("state_type").and_then(JsonValue::as_str) == Some("ctid") => {
            CtidState::from_value(stream, value).map(Some)
        }
        _ => Ok(None),
    }
}
