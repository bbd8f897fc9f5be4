//! State types for tracking sync progress
//!
//! These types are serialized to JSON, emitted as STATE messages, and fed
//! back on the next run.

use crate::ctid::Ctid;
use crate::error::{Error, Result};
use crate::types::{Filenode, JsonValue, StreamDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Version written into every state this crate produces
pub const STATE_VERSION: u32 = 2;

/// Key holding the state kind tag
pub const STATE_TYPE_KEY: &str = "state_type";

/// Kind tag of a persisted stream state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    /// Resumable initial sync by physical address
    Ctid,
    /// Incremental by transaction id watermark
    Xmin,
    /// Incremental by user cursor column
    Standard,
}

impl StateType {
    /// Parse a tag; unknown tags are a fatal state error
    pub fn parse(stream: &StreamDescriptor, tag: &str) -> Result<Self> {
        match tag {
            "ctid" => Ok(StateType::Ctid),
            "xmin" => Ok(StateType::Xmin),
            "standard" => Ok(StateType::Standard),
            other => Err(Error::UnknownStateType {
                stream: stream.to_string(),
                state_type: other.to_string(),
            }),
        }
    }

    /// Read the tag of a persisted state value
    pub fn of_value(stream: &StreamDescriptor, value: &JsonValue) -> Result<Self> {
        let tag = value
            .get(STATE_TYPE_KEY)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                Error::state(format!(
                    "state for stream '{stream}' has no '{STATE_TYPE_KEY}' tag"
                ))
            })?;
        Self::parse(stream, tag)
    }
}

// ============================================================================
// ctid
// ============================================================================

/// Resume point of a ctid initial sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtidState {
    /// Always `ctid`
    pub state_type: StateType,
    /// Format version
    pub version: u32,
    /// Exclusive lower bound to resume from; `None` is table origin
    pub ctid: Option<Ctid>,
    /// Filenode the address was observed under
    pub relation_filenode: Option<Filenode>,
    /// State of the incremental strategy that takes over afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental_state: Option<JsonValue>,
}

impl CtidState {
    /// Create a ctid state at the current version
    pub fn new(
        ctid: Option<Ctid>,
        relation_filenode: Option<Filenode>,
        incremental_state: Option<JsonValue>,
    ) -> Self {
        Self {
            state_type: StateType::Ctid,
            version: STATE_VERSION,
            ctid,
            relation_filenode,
            incremental_state,
        }
    }

    /// State of a sync that has not read anything yet
    pub fn initial(incremental_state: Option<JsonValue>) -> Self {
        Self::new(None, None, incremental_state)
    }

    /// Restore a persisted state, validating its kind and version
    pub fn from_value(stream: &StreamDescriptor, value: &JsonValue) -> Result<Self> {
        let state_type = StateType::of_value(stream, value)?;
        if state_type != StateType::Ctid {
            return Err(Error::state(format!(
                "expected a ctid state for stream '{stream}', found {state_type:?}"
            )));
        }
        check_version(stream, value)?;
        serde_json::from_value(value.clone()).map_err(|e| {
            Error::state(format!("invalid ctid state for stream '{stream}': {e}"))
        })
    }

    /// Serialize to a JSON value
    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

fn check_version(stream: &StreamDescriptor, value: &JsonValue) -> Result<()> {
    let found = value
        .get("version")
        .and_then(JsonValue::as_u64)
        .ok_or_else(|| Error::state(format!("state for stream '{stream}' has no version")))?;
    if found != u64::from(STATE_VERSION) {
        return Err(Error::StateVersion {
            stream: stream.to_string(),
            found: found as u32,
            expected: STATE_VERSION,
        });
    }
    Ok(())
}

// ============================================================================
// xmin
// ============================================================================

/// Saved watermark of the xmin incremental strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XminState {
    /// Always `xmin`
    pub state_type: StateType,
    /// Format version
    pub version: u32,
    /// Times the 32-bit transaction id had wrapped when saved
    pub num_wraparound: u64,
    /// 32-bit transaction id
    pub xmin_xid_value: u64,
    /// 64-bit epoch-extended transaction id
    pub xmin_raw_value: u64,
}

impl XminState {
    /// Snapshot the server's current xmin status as a state
    pub fn from_status(status: &XminStatus) -> Self {
        Self {
            state_type: StateType::Xmin,
            version: STATE_VERSION,
            num_wraparound: status.num_wraparound,
            xmin_xid_value: status.xmin_xid_value,
            xmin_raw_value: status.xmin_raw_value,
        }
    }

    /// Restore a persisted xmin state
    pub fn from_value(stream: &StreamDescriptor, value: &JsonValue) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| {
            Error::state(format!("invalid xmin state for stream '{stream}': {e}"))
        })
    }

    /// Serialize to a JSON value
    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Current transaction id position of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct XminStatus {
    /// Times the 32-bit transaction id has wrapped
    pub num_wraparound: u64,
    /// 32-bit transaction id
    pub xmin_xid_value: u64,
    /// 64-bit epoch-extended transaction id
    pub xmin_raw_value: u64,
}

impl XminStatus {
    /// Whether a saved watermark is too old to be trusted.
    ///
    /// More than one wraparound since the save, or exactly one with the
    /// current xid back at or past the saved one, means rows may have
    /// become indistinguishable by xmin alone.
    pub fn requires_full_sync(&self, saved: &XminState) -> bool {
        if self.num_wraparound > saved.num_wraparound + 1 {
            return true;
        }
        self.num_wraparound == saved.num_wraparound + 1
            && self.xmin_xid_value >= saved.xmin_xid_value
    }
}

// ============================================================================
// cursor
// ============================================================================

/// Saved position of the cursor incremental strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    /// Always `standard`
    pub state_type: StateType,
    /// Format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Cursor column path
    #[serde(default)]
    pub cursor_field: Vec<String>,
    /// Last cursor value
    #[serde(default)]
    pub cursor: Option<JsonValue>,
    /// Rows sharing the last cursor value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_record_count: Option<u64>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl CursorState {
    /// Restore a persisted cursor state; a null cursor is a fatal error
    pub fn from_value(stream: &StreamDescriptor, value: &JsonValue) -> Result<Self> {
        let state: CursorState = serde_json::from_value(value.clone()).map_err(|e| {
            Error::state(format!("invalid cursor state for stream '{stream}': {e}"))
        })?;
        match &state.cursor {
            None | Some(JsonValue::Null) => Err(Error::MissingCursorValue {
                stream: stream.to_string(),
            }),
            Some(_) => Ok(state),
        }
    }
}

// ============================================================================
// Protocol envelope
// ============================================================================

/// State of one stream inside a STATE message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStateEntry {
    /// Stream the state belongs to
    pub stream_descriptor: StreamDescriptor,
    /// Opaque state value
    #[serde(default)]
    pub stream_state: Option<JsonValue>,
}

/// Shared position plus the per-stream states that go with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    /// Position shared by all streams (e.g. a replication slot offset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state: Option<JsonValue>,
    /// Per-stream states
    #[serde(default)]
    pub stream_states: Vec<StreamStateEntry>,
}

/// Payload of a STATE message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum StateMessage {
    /// State of a single stream
    Stream {
        /// The stream's state
        stream: StreamStateEntry,
    },
    /// Shared position with every stream's state
    Global {
        /// The combined state
        global: GlobalState,
    },
}

impl StateMessage {
    /// Per-stream state message
    pub fn stream(descriptor: StreamDescriptor, state: JsonValue) -> Self {
        Self::Stream {
            stream: StreamStateEntry {
                stream_descriptor: descriptor,
                stream_state: Some(state),
            },
        }
    }

    /// State of `stream` carried by this message, if any
    pub fn state_of(&self, stream: &StreamDescriptor) -> Option<&JsonValue> {
        match self {
            StateMessage::Stream { stream: entry } => (&entry.stream_descriptor == stream)
                .then_some(entry.stream_state.as_ref())
                .flatten(),
            StateMessage::Global { global } => global
                .stream_states
                .iter()
                .find(|e| &e.stream_descriptor == stream)
                .and_then(|e| e.stream_state.as_ref()),
        }
    }
}

/// Whether persisted states were per stream or global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    /// Independent state per stream
    #[default]
    PerStream,
    /// One shared position plus per-stream states
    Global,
}

/// States handed in at sync start
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedStates {
    /// Scope the states were written with
    pub scope: StateScope,
    /// Shared position, global scope only
    pub shared_state: Option<JsonValue>,
    /// Raw per-stream state values
    pub streams: HashMap<StreamDescriptor, JsonValue>,
}

impl PersistedStates {
    /// No previous state
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the state input of a sync.
    ///
    /// Accepts a list of STATE messages (bare or wrapped in
    /// `{"type":"STATE","state":...}`) or a single such message. Untyped legacy
    /// blobs are rejected.
    pub fn parse(input: &JsonValue) -> Result<Self> {
        let messages: Vec<StateMessage> = match input {
            JsonValue::Null => return Ok(Self::empty()),
            JsonValue::Array(items) => items
                .iter()
                .map(parse_state_message)
                .collect::<Result<_>>()?,
            other => vec![parse_state_message(other)?],
        };

        let mut states = Self::empty();
        for message in messages {
            match message {
                StateMessage::Stream { stream } => {
                    if states.scope == StateScope::Global {
                        return Err(Error::state("mixed STREAM and GLOBAL state messages"));
                    }
                    if let Some(value) = stream.stream_state {
                        states.streams.insert(stream.stream_descriptor, value);
                    }
                }
                StateMessage::Global { global } => {
                    if !states.streams.is_empty() && states.scope != StateScope::Global {
                        return Err(Error::state("mixed STREAM and GLOBAL state messages"));
                    }
                    states.scope = StateScope::Global;
                    states.shared_state = global.shared_state;
                    states.streams.clear();
                    for entry in global.stream_states {
                        if let Some(value) = entry.stream_state {
                            states.streams.insert(entry.stream_descriptor, value);
                        }
                    }
                }
            }
        }
        Ok(states)
    }

    /// Raw state of a stream
    pub fn get(&self, stream: &StreamDescriptor) -> Option<&JsonValue> {
        self.streams.get(stream)
    }
}

fn parse_state_message(value: &JsonValue) -> Result<StateMessage> {
    let inner = match value.get("type").and_then(JsonValue::as_str) {
        Some("STATE") => value
            .get("state")
            .ok_or_else(|| Error::state("STATE message without a 'state' field"))?,
        Some(_) => value,
        None => {
            return Err(Error::state(
                "untyped legacy state is not supported; expected STREAM or GLOBAL state messages",
            ))
        }
    };
    serde_json::from_value(inner.clone())
        .map_err(|e| Error::state(format!("invalid state message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn users() -> StreamDescriptor {
        StreamDescriptor::new("public", "users")
    }

    #[test]
    fn test_ctid_state_round_trip() {
        let state = CtidState::new(
            Some(Ctid::new(12, 4)),
            Some(16_384),
            Some(json!({"state_type": "xmin", "version": 2})),
        );
        let json = serde_json::to_string(&state).unwrap();
        let value: JsonValue = serde_json::from_str(&json).unwrap();
        let restored = CtidState::from_value(&users(), &value).unwrap();

        assert_eq!(restored, state);
        assert_eq!(serde_json::to_string(&restored).unwrap(), json);
    }

    #[test]
    fn test_ctid_state_shape() {
        let state = CtidState::new(Some(Ctid::new(0, 7)), Some(99), None);
        assert_eq!(
            state.to_value(),
            json!({
                "state_type": "ctid",
                "version": 2,
                "ctid": "(0,7)",
                "relation_filenode": 99
            })
        );

        let initial = CtidState::initial(None).to_value();
        assert_eq!(initial["ctid"], JsonValue::Null);
    }

    #[test]
    fn test_ctid_state_rejects_wrong_version() {
        let value = json!({"state_type": "ctid", "version": 1, "ctid": "(0,1)"});
        assert!(matches!(
            CtidState::from_value(&users(), &value),
            Err(Error::StateVersion { found: 1, .. })
        ));
    }

    #[test]
    fn test_ctid_state_rejects_wrong_kind() {
        let value = json!({"state_type": "xmin", "version": 2});
        let err = CtidState::from_value(&users(), &value).unwrap_err();
        assert!(err.is_fatal_config());
    }

    #[test]
    fn test_unknown_state_type() {
        let value = json!({"state_type": "lsn", "version": 2});
        assert!(matches!(
            StateType::of_value(&users(), &value),
            Err(Error::UnknownStateType { .. })
        ));
    }

    #[test]
    fn test_wraparound_rule() {
        let saved = XminState::from_status(&XminStatus {
            num_wraparound: 3,
            xmin_xid_value: 1_000,
            xmin_raw_value: 3 * (1 << 32) + 1_000,
        });
        let status = |num_wraparound, xmin_xid_value| XminStatus {
            num_wraparound,
            xmin_xid_value,
            xmin_raw_value: 0,
        };

        assert!(!status(3, 5_000).requires_full_sync(&saved));
        assert!(!status(4, 999).requires_full_sync(&saved));
        assert!(status(4, 1_000).requires_full_sync(&saved));
        assert!(status(5, 0).requires_full_sync(&saved));
    }

    #[test]
    fn test_cursor_state_requires_value() {
        let value = json!({"state_type": "standard", "cursor_field": ["id"], "cursor": null});
        assert!(matches!(
            CursorState::from_value(&users(), &value),
            Err(Error::MissingCursorValue { .. })
        ));

        let value = json!({"state_type": "standard", "cursor_field": ["id"], "cursor": "42"});
        let state = CursorState::from_value(&users(), &value).unwrap();
        assert_eq!(state.cursor, Some(json!("42")));
    }

    #[test]
    fn test_state_message_envelope() {
        let message = StateMessage::stream(users(), json!({"state_type": "ctid"}));
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "STREAM",
                "stream": {
                    "stream_descriptor": {"name": "users", "namespace": "public"},
                    "stream_state": {"state_type": "ctid"}
                }
            })
        );
        assert_eq!(
            message.state_of(&users()),
            Some(&json!({"state_type": "ctid"}))
        );
    }

    #[test]
    fn test_parse_stream_states() {
        let input = json!([
            {"type": "STATE", "state": {"type": "STREAM", "stream": {
                "stream_descriptor": {"name": "users", "namespace": "public"},
                "stream_state": {"state_type": "ctid", "version": 2, "ctid": "(1,1)"}
            }}},
            {"type": "STREAM", "stream": {
                "stream_descriptor": {"name": "orders", "namespace": "public"},
                "stream_state": {"state_type": "xmin", "version": 2}
            }}
        ]);
        let states = PersistedStates::parse(&input).unwrap();
        assert_eq!(states.scope, StateScope::PerStream);
        assert_eq!(states.streams.len(), 2);
        assert_eq!(states.get(&users()).unwrap()["ctid"], "(1,1)");
    }

    #[test]
    fn test_parse_global_state() {
        let input = json!({"type": "GLOBAL", "global": {
            "shared_state": {"lsn": 1234},
            "stream_states": [{
                "stream_descriptor": {"name": "users", "namespace": "public"},
                "stream_state": {"state_type": "ctid", "version": 2, "ctid": null}
            }]
        }});
        let states = PersistedStates::parse(&input).unwrap();
        assert_eq!(states.scope, StateScope::Global);
        assert_eq!(states.shared_state, Some(json!({"lsn": 1234})));
        assert!(states.get(&users()).is_some());
    }

    #[test]
    fn test_parse_rejects_legacy_blob() {
        let input = json!({"cdc": false, "streams": []});
        assert!(PersistedStates::parse(&input)
            .unwrap_err()
            .is_fatal_config());
    }

    #[test]
    fn test_parse_null_is_empty() {
        assert_eq!(
            PersistedStates::parse(&JsonValue::Null).unwrap(),
            PersistedStates::empty()
        );
    }
}
