//! State management module
//!
//! Handles resume points, checkpoints and the handoff to incremental syncs.
//! There is no durable store here: states are read once at sync start and
//! emitted as STATE messages for the platform to persist.
//!
//! # Overview
//!
//! The state module provides:
//! - `CtidState`, `XminState`, `CursorState` - persisted state shapes
//! - `StateMessage` - the STREAM / GLOBAL protocol envelope
//! - `PersistedStates` - parsed state input of a sync
//! - `CtidStateManager` - checkpoint and terminal records, per stream or global

mod manager;
mod types;

pub use manager::{
    restore_ctid_state, state_manager, CtidStateManager, GlobalStateManager,
    PerStreamStateManager,
};
pub use types::{
    CtidState, CursorState, GlobalState, PersistedStates, StateMessage, StateScope, StateType,
    StreamStateEntry, XminState, XminStatus, STATE_TYPE_KEY, STATE_VERSION,
};
