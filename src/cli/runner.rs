//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::{load_config, ConfiguredCatalog, ConfiguredStream, SourceConfig};
use crate::ctid::Ctid;
use crate::database::DatabaseEngine;
use crate::engine::{CtidSync, JsonLinesSink, Message, MessageSink};
use crate::error::{Error, Result};
use crate::state::{PersistedStates, XminStatus};
use crate::types::{JsonValue, StreamDescriptor, SyncMode};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Check => self.check().await,
            Commands::Validate => self.validate(),
            Commands::Read {
                catalog,
                state,
                state_json,
                xmin_status,
            } => {
                self.read(
                    catalog,
                    state.as_deref(),
                    state_json.as_deref(),
                    xmin_status.as_deref(),
                )
                .await
            }
            Commands::Plan {
                table,
                namespace,
                start,
            } => self.plan(namespace, table, start).await,
        }
    }

    /// Load the source configuration
    fn load_config(&self) -> Result<SourceConfig> {
        let path = self
            .cli
            .config
            .as_ref()
            .ok_or_else(|| Error::config("Configuration file not specified (use -C flag)"))?;
        load_config(path)
    }

    fn connect(&self, config: &SourceConfig) -> Result<DatabaseEngine> {
        Ok(DatabaseEngine::new(&config.connection)?.with_fetch_size(config.sync.fetch_size))
    }

    /// Test connection
    async fn check(&self) -> Result<()> {
        let config = self.load_config()?;
        let status = match self.connect(&config) {
            Ok(engine) => match engine.check_connection().await {
                Ok(()) => json!({"status": "SUCCEEDED", "source": engine.connection_info()}),
                Err(e) => json!({"status": "FAILED", "message": e.to_string()}),
            },
            Err(e) => json!({"status": "FAILED", "message": e.to_string()}),
        };
        self.output(&json!({"type": "CONNECTION_STATUS", "connectionStatus": status}));
        Ok(())
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let config = self.load_config()?;
        config.connection.validate()?;
        self.output(&json!({
            "type": "LOG",
            "log": {"level": "INFO", "message": "Configuration is valid"}
        }));
        Ok(())
    }

    /// Read data
    async fn read(
        &self,
        catalog_path: &Path,
        state_path: Option<&Path>,
        state_json: Option<&str>,
        xmin_path: Option<&Path>,
    ) -> Result<()> {
        let config = self.load_config()?;
        let catalog = ConfiguredCatalog::from_file(catalog_path)?;
        let input_state = load_state(state_path, state_json)?;
        let engine = Arc::new(self.connect(&config)?);

        let xmin_status = match xmin_path {
            Some(path) => Some(read_json::<XminStatus>(path)?),
            None if needs_watermark(&catalog) => Some(engine.xmin_status().await?),
            None => None,
        };

        let sync = CtidSync::new(engine.clone(), engine).with_config(config.sync);
        let mut sink = JsonLinesSink::new(tokio::io::stdout());
        let report = sync
            .read(&catalog, &input_state, xmin_status.as_ref(), &mut sink)
            .await?;

        sink.emit(Message::info(format!(
            "Synced {} records in {} streams ({} failed, {} resyncs)",
            report.stats.records_synced,
            report.stats.streams_synced,
            report.failed_streams.len(),
            report.stats.resyncs
        )))
        .await?;
        sink.flush().await?;

        info!(
            completed = report.completed_streams.len(),
            watermark = report.watermark_streams.len(),
            cursor = report.cursor_streams.len(),
            duration_ms = report.stats.duration_ms,
            "Read finished"
        );

        if report.is_success() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "{} stream(s) failed",
                report.failed_streams.len()
            )))
        }
    }

    /// Print chunk queries
    async fn plan(&self, namespace: &str, table: &str, start: &str) -> Result<()> {
        let config = self.load_config()?;
        let start: Ctid = start.parse()?;
        let engine = Arc::new(self.connect(&config)?);
        let sync = CtidSync::new(engine.clone(), engine).with_config(config.sync);

        let stream = ConfiguredStream::new(StreamDescriptor::new(namespace, table));
        for query in sync.plan(&stream, start).await? {
            self.output(&json!({
                "chunk": query.chunk_index,
                "range": query.range.to_string(),
                "sql": query.sql,
            }));
        }
        Ok(())
    }

    fn output(&self, msg: &JsonValue) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

/// Whether any stream hands off to the xmin strategy
fn needs_watermark(catalog: &ConfiguredCatalog) -> bool {
    catalog
        .streams
        .iter()
        .any(|s| s.sync_mode == SyncMode::Incremental)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("Failed to read '{}': {e}", path.display())))?;
    Ok(serde_json::from_str(&content)?)
}

/// State from a file or inline JSON; none means a fresh sync
fn load_state(path: Option<&Path>, inline: Option<&str>) -> Result<PersistedStates> {
    let value: JsonValue = match (path, inline) {
        (Some(path), _) => read_json(path)?,
        (None, Some(json)) => serde_json::from_str(json)?,
        (None, None) => JsonValue::Null,
    };
    PersistedStates::parse(&value)
}
