//! Decoder types

use serde::{Deserialize, Serialize};

/// What a field length of `-1` means in a single-column export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullFieldPolicy {
    /// Treat it as a truncated stream and fail
    #[default]
    Error,
    /// Decode it as an SQL NULL
    Null,
}
