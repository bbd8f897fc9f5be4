//! Error types for pgctid-sync
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// The main error type for pgctid-sync
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Persisted State Errors
    // ============================================================================
    #[error("State error: {message}")]
    State { message: String },

    #[error("Unsupported state version {found} for stream '{stream}' (expected {expected})")]
    StateVersion {
        stream: String,
        found: u32,
        expected: u32,
    },

    #[error("Unrecognized state type '{state_type}' for stream '{stream}'")]
    UnknownStateType { stream: String, state_type: String },

    #[error("Stream '{stream}' has cursor state without a cursor value")]
    MissingCursorValue { stream: String },

    // ============================================================================
    // Catalog / Query Errors
    // ============================================================================
    #[error("Stream '{stream}' not found in catalog")]
    StreamNotFound { stream: String },

    #[error("Catalog probe failed for stream '{stream}': {message}")]
    Probe { stream: String, message: String },

    #[error("Query failed for stream '{stream}': {message}")]
    Query { stream: String, message: String },

    #[error("Bulk export failed for stream '{stream}' chunk {chunk}: {message}")]
    Export {
        stream: String,
        chunk: usize,
        message: String,
    },

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    // ============================================================================
    // Data Format Errors
    // ============================================================================
    #[error("Invalid ctid '{value}'")]
    InvalidCtid { value: String },

    #[error("Binary copy format error: {message}")]
    Format { message: String },

    #[error("Unexpected end of binary copy stream: {message}")]
    UnexpectedEof { message: String },

    #[error("Failed to decode row: {message}")]
    Decode { message: String },

    // ============================================================================
    // Rewrite Detection Errors
    // ============================================================================
    #[error(
        "Stream '{stream}' was resynced {resyncs} times because its relation filenode kept \
         changing; a table rewrite (VACUUM FULL, CLUSTER, ALTER TABLE ... SET TABLESPACE) is \
         likely running concurrently with the sync"
    )]
    TooManyResyncs { stream: String, resyncs: u32 },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Output error: {message}")]
    Output { message: String },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create a catalog probe error
    pub fn probe(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Probe {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create a query error
    pub fn query(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create a bulk export error
    pub fn export(stream: impl Into<String>, chunk: usize, message: impl Into<String>) -> Self {
        Self::Export {
            stream: stream.into(),
            chunk,
            message: message.into(),
        }
    }

    /// Create a binary format error
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Create an unexpected EOF error
    pub fn eof(message: impl Into<String>) -> Self {
        Self::UnexpectedEof {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an output error
    pub fn output(message: impl Into<String>) -> Self {
        Self::Output {
            message: message.into(),
        }
    }

    /// Whether this error comes from validating configuration or persisted state.
    ///
    /// These are raised before extraction starts and are never retried per stream.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::InvalidConfigValue { .. }
                | Error::YamlParse(_)
                | Error::State { .. }
                | Error::StateVersion { .. }
                | Error::UnknownStateType { .. }
                | Error::MissingCursorValue { .. }
        )
    }
}

/// Result type alias for pgctid-sync
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::MissingCursorValue {
            stream: "public.users".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Stream 'public.users' has cursor state without a cursor value"
        );

        let err = Error::export("public.users", 3, "connection reset");
        assert_eq!(
            err.to_string(),
            "Bulk export failed for stream 'public.users' chunk 3: connection reset"
        );
    }

    #[test]
    fn test_too_many_resyncs_names_cause() {
        let err = Error::TooManyResyncs {
            stream: "public.events".to_string(),
            resyncs: 6,
        };
        let msg = err.to_string();
        assert!(msg.contains("public.events"));
        assert!(msg.contains("VACUUM FULL"));
    }

    #[test]
    fn test_is_fatal_config() {
        assert!(Error::config("bad").is_fatal_config());
        assert!(Error::state("bad").is_fatal_config());
        assert!(Error::UnknownStateType {
            stream: "s".to_string(),
            state_type: "weird".to_string()
        }
        .is_fatal_config());

        assert!(!Error::format("bad header").is_fatal_config());
        assert!(!Error::query("s", "timeout").is_fatal_config());
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(Error::config("inner"));
        let with_context = result.context("outer");
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("outer: Configuration error: inner"));
    }
}
